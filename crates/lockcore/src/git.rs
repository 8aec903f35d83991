// moon: The build system and package manager for MoonBit.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.

//! Git sources.
//!
//! Every repository is kept as a bare clone under
//! `<home>/git/db/<ident>-<hash>`. Manifests are read straight out of the
//! object database with `git show`, no working tree is ever checked out.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use lockutil::{common::MANIFEST_FILE, lockstep_dir::LockstepHome, package::GitReference};
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("`{0}` has no local clone and the network is disabled")]
    NotCached(String),
    #[error("`{revision}` does not name a commit in `{url}`")]
    UnknownRevision { url: String, revision: String },
    #[error("commit `{commit}` of `{url}` has no `{MANIFEST_FILE}`")]
    MissingManifest { url: String, commit: String },
    #[error("invalid `{MANIFEST_FILE}` at commit `{commit}` of `{url}`: {reason}")]
    InvalidManifest {
        url: String,
        commit: String,
        reason: String,
    },
    #[error(transparent)]
    Command(#[from] std::io::Error),
}

pub trait GitRemote {
    /// The commit `reference` currently points at.
    fn resolve(&self, url: &str, reference: &GitReference, offline: bool)
    -> Result<String, GitError>;

    /// The text of the package manifest at `commit`.
    fn manifest_at(&self, url: &str, commit: &str, offline: bool) -> Result<String, GitError>;
}

fn ident(url: &str) -> String {
    let last = match url::Url::parse(url) {
        Ok(u) => u
            .path_segments()
            .and_then(|mut s| s.next_back())
            .unwrap_or("")
            .to_owned(),
        Err(_) => url
            .trim_end_matches('/')
            .rsplit(['/', '\\', ':'])
            .next()
            .unwrap_or("")
            .to_owned(),
    };
    let last = last.trim_end_matches(".git");
    if last.is_empty() {
        "_empty".into()
    } else {
        last.into()
    }
}

fn short_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{:x}", digest)[..16].to_owned()
}

pub fn repo_name(url: &str) -> String {
    format!("{}-{}", ident(url), short_hash(url))
}

fn run(command: &mut Command) -> Result<(), std::io::Error> {
    run_stdout(command).map(|_| ())
}

fn run_stdout(command: &mut Command) -> Result<String, std::io::Error> {
    let output = command.output()?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(std::io::Error::other(format!(
            "Command {:?} failed with status: {}\nstdout: {}\nstderr: {}",
            command, output.status, stdout, stderr
        )));
    }
    String::from_utf8(output.stdout).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to parse stdout of command {:?}: {}", command, e),
        )
    })
}

/// [`GitRemote`] calling the `git` command line tool.
pub struct GitCommand {
    db: PathBuf,
}

impl GitCommand {
    pub fn new(home: &LockstepHome) -> Self {
        GitCommand {
            db: home.git_db_dir(),
        }
    }

    fn git(repo: &Path) -> Command {
        let mut command = Command::new("git");
        command
            .env("GIT_TERMINAL_PROMPT", "0")
            .arg("-C")
            .arg(repo);
        command
    }

    fn repo_path(&self, url: &str) -> PathBuf {
        self.db.join(repo_name(url))
    }

    fn open_or_init(&self, url: &str, offline: bool) -> Result<PathBuf, GitError> {
        let path = self.repo_path(url);
        if path.join("HEAD").exists() {
            return Ok(path);
        }
        if offline {
            return Err(GitError::NotCached(url.to_owned()));
        }
        log::debug!("Initializing {} for {}", path.display(), url);
        std::fs::create_dir_all(&path)?;
        run(Command::new("git").arg("init").arg("--bare").arg(&path))?;
        run(Self::git(&path).args(["remote", "add", "origin", url]))?;
        Ok(path)
    }

    fn fetch(&self, repo: &Path, refspec: &str) -> Result<(), GitError> {
        log::debug!("Fetching {} into {}", refspec, repo.display());
        run(Self::git(repo).args(["fetch", "--force", "--no-tags", "origin", refspec]))?;
        Ok(())
    }

    fn rev_parse(&self, repo: &Path, rev: &str) -> Option<String> {
        run_stdout(Self::git(repo).args(["rev-parse", "--verify", "--quiet"]).arg(format!("{rev}^{{commit}}")))
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }
}

impl GitRemote for GitCommand {
    fn resolve(
        &self,
        url: &str,
        reference: &GitReference,
        offline: bool,
    ) -> Result<String, GitError> {
        let repo = self.open_or_init(url, offline)?;
        let (refspec, local) = match reference {
            GitReference::DefaultBranch => (
                "+HEAD:refs/remotes/origin/HEAD".to_owned(),
                "refs/remotes/origin/HEAD".to_owned(),
            ),
            GitReference::Branch(b) => (
                format!("+refs/heads/{b}:refs/remotes/origin/{b}"),
                format!("refs/remotes/origin/{b}"),
            ),
            GitReference::Tag(t) => (
                format!("+refs/tags/{t}:refs/tags/{t}"),
                format!("refs/tags/{t}"),
            ),
            GitReference::Rev(r) => {
                if let Some(commit) = self.rev_parse(&repo, r) {
                    return Ok(commit);
                }
                if !offline {
                    self.fetch(&repo, r)?;
                    if let Some(commit) = self
                        .rev_parse(&repo, r)
                        .or_else(|| self.rev_parse(&repo, "FETCH_HEAD"))
                    {
                        return Ok(commit);
                    }
                }
                return Err(GitError::UnknownRevision {
                    url: url.to_owned(),
                    revision: r.clone(),
                });
            }
        };
        if !offline {
            self.fetch(&repo, &refspec)?;
        }
        self.rev_parse(&repo, &local)
            .ok_or_else(|| GitError::UnknownRevision {
                url: url.to_owned(),
                revision: reference.to_string(),
            })
    }

    fn manifest_at(&self, url: &str, commit: &str, offline: bool) -> Result<String, GitError> {
        let repo = self.open_or_init(url, offline)?;
        if self.rev_parse(&repo, commit).is_none() {
            if offline {
                return Err(GitError::UnknownRevision {
                    url: url.to_owned(),
                    revision: commit.to_owned(),
                });
            }
            self.fetch(&repo, commit)?;
        }
        run_stdout(Self::git(&repo).arg("show").arg(format!("{commit}:{MANIFEST_FILE}"))).map_err(
            |e| {
                log::debug!("{}", e);
                GitError::MissingManifest {
                    url: url.to_owned(),
                    commit: commit.to_owned(),
                }
            },
        )
    }
}

#[cfg(test)]
pub mod mock {
    use std::{
        cell::Cell,
        collections::{HashMap, HashSet},
    };

    use super::*;

    /// An in-memory set of repositories. Repositories not marked cached are
    /// unavailable offline.
    #[derive(Default)]
    pub struct MockGit {
        refs: HashMap<(String, GitReference), String>,
        manifests: HashMap<(String, String), String>,
        cached: HashSet<String>,
        pub calls: Cell<usize>,
    }

    impl MockGit {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_commit(&mut self, url: &str, commit: &str, manifest: &str) -> &mut Self {
            self.manifests
                .insert((url.to_owned(), commit.to_owned()), manifest.to_owned());
            self
        }

        pub fn point(&mut self, url: &str, reference: GitReference, commit: &str) -> &mut Self {
            self.refs.insert((url.to_owned(), reference), commit.to_owned());
            self
        }

        pub fn cache(&mut self, url: &str) -> &mut Self {
            self.cached.insert(url.to_owned());
            self
        }

        fn check(&self, url: &str, offline: bool) -> Result<(), GitError> {
            self.calls.set(self.calls.get() + 1);
            if offline && !self.cached.contains(url) {
                return Err(GitError::NotCached(url.to_owned()));
            }
            Ok(())
        }
    }

    impl GitRemote for MockGit {
        fn resolve(
            &self,
            url: &str,
            reference: &GitReference,
            offline: bool,
        ) -> Result<String, GitError> {
            self.check(url, offline)?;
            if let GitReference::Rev(r) = reference {
                if self.manifests.contains_key(&(url.to_owned(), r.clone())) {
                    return Ok(r.clone());
                }
            }
            self.refs
                .get(&(url.to_owned(), reference.clone()))
                .cloned()
                .ok_or_else(|| GitError::UnknownRevision {
                    url: url.to_owned(),
                    revision: reference.to_string(),
                })
        }

        fn manifest_at(&self, url: &str, commit: &str, offline: bool) -> Result<String, GitError> {
            self.check(url, offline)?;
            self.manifests
                .get(&(url.to_owned(), commit.to_owned()))
                .cloned()
                .ok_or_else(|| GitError::UnknownRevision {
                    url: url.to_owned(),
                    revision: commit.to_owned(),
                })
        }
    }
}
