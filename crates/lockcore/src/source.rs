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

//! Candidate sources: what the resolver may pick for a requirement, and in
//! which order.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::anyhow;
use lockutil::{
    dependency::{DependencyInfo, Requirement},
    locked::{LockedGraph, Node},
    lockfile::normalize_path,
    manifest::{Manifest, ManifestError, ManifestErrorKind, manifest_path_in, read_manifest_in_dir},
    package::{DEFAULT_VERSION, GitReference, PackageId, PackageKey, PackageName, SourceKind},
};
use semver::Version;

use crate::{
    error::UpdateError,
    git::{GitError, GitRemote},
    registry::RegistryList,
};

/// Everything a source knows about one version of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub id: PackageId,
    /// Commit id, for git packages.
    pub revision: Option<String>,
    pub requirements: Vec<Requirement>,
    pub checksum: Option<String>,
    pub yanked: bool,
}

impl Summary {
    /// Builds a summary for a manifest found in `source`. `base_dir` is the
    /// directory holding the manifest; relative `path` dependencies are only
    /// resolved against it.
    pub fn from_manifest(
        manifest: &Manifest,
        source: SourceKind,
        revision: Option<String>,
        base_dir: Option<&Path>,
    ) -> Result<Self, ManifestErrorKind> {
        let version = manifest.version.clone().unwrap_or(DEFAULT_VERSION.clone());
        let id = PackageId::new(manifest.name.clone(), version, source);
        let mut requirements = Vec::new();
        for (name, info, kind) in manifest.all_deps() {
            let source = dependency_source(&id, name, info, base_dir)?;
            requirements.push(Requirement::new(
                name.clone(),
                info.version.clone(),
                source,
                kind,
            ));
        }
        Ok(Summary {
            id,
            revision,
            requirements,
            checksum: manifest.checksum.clone(),
            yanked: manifest.yanked,
        })
    }

    pub fn key(&self) -> PackageKey {
        self.id.key()
    }
}

fn dependency_source(
    dependant: &PackageId,
    name: &PackageName,
    info: &DependencyInfo,
    base_dir: Option<&Path>,
) -> Result<SourceKind, ManifestErrorKind> {
    if let Some(path) = &info.path {
        match (&dependant.source, base_dir) {
            (SourceKind::Local(_), Some(base)) => {
                let joined = base.join(path);
                let path = dunce::canonicalize(&joined).unwrap_or_else(|_| normalize_path(&joined));
                return Ok(SourceKind::Local(path));
            }
            _ => log::warn!(
                "{} declares a path dependency on {}, resolving it from the registry instead",
                dependant,
                name
            ),
        }
    }
    if let Some(url) = &info.git {
        if dependant.source.is_registry() {
            log::warn!(
                "{} declares a git dependency on {}, resolving it from the registry instead",
                dependant,
                name
            );
        } else {
            let reference = info
                .git_reference()
                .map_err(|reason| ManifestErrorKind::Dependency {
                    dep: name.to_string(),
                    reason,
                })?;
            return Ok(SourceKind::Git {
                url: url.clone(),
                reference,
            });
        }
    }
    // without an explicit registry, registry packages depend on their own one
    let registry = match (&info.registry, &dependant.source) {
        (Some(r), _) => Some(r.clone()),
        (None, SourceKind::Registry(r)) => r.clone(),
        (None, _) => None,
    };
    Ok(SourceKind::Registry(registry))
}

/// Where the resolver gets candidates from.
pub trait CandidateSource {
    /// Admissible summaries for `req`, most preferred first.
    fn query(&mut self, req: &Requirement) -> Result<Rc<Vec<Rc<Summary>>>, UpdateError>;

    /// The summary of a node from the previous lock, without remote access.
    /// `None` if the source no longer knows that version.
    fn locked(&mut self, node: &Node) -> Result<Option<Rc<Summary>>, UpdateError>;

    /// The summary for `--precise <value>` on `key`.
    fn precise(&mut self, key: &PackageKey, value: &str) -> Result<Rc<Summary>, UpdateError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionOrdering {
    #[default]
    MaximumVersionsFirst,
    MinimumVersionsFirst,
}

/// Candidate ordering: versions of the previous lock first, unless the key
/// is fresh, then the rest by [`VersionOrdering`].
#[derive(Debug, Clone, Default)]
pub struct VersionPreferences {
    locked: HashMap<PackageKey, Vec<(Version, Option<String>)>>,
    fresh: HashSet<PackageKey>,
    prefer_locked: bool,
    ordering: VersionOrdering,
}

impl VersionPreferences {
    pub fn new(ordering: VersionOrdering) -> Self {
        VersionPreferences {
            ordering,
            ..Default::default()
        }
    }

    /// Records every node of `graph` as locked.
    pub fn lock_from(&mut self, graph: &LockedGraph) {
        for node in graph.nodes() {
            self.locked
                .entry(node.id.key())
                .or_default()
                .push((node.id.version.clone(), node.revision.clone()));
        }
    }

    pub fn mark_fresh(&mut self, key: PackageKey) {
        self.fresh.insert(key);
    }

    pub fn set_prefer_locked(&mut self, prefer: bool) {
        self.prefer_locked = prefer;
    }

    /// Whether the previous lock has exactly this version (and revision).
    /// Freshness does not matter here.
    pub fn is_locked(&self, id: &PackageId, revision: Option<&str>) -> bool {
        self.locked.get(&id.key()).is_some_and(|vs| {
            vs.iter().any(|(v, r)| {
                v == &id.version && (revision.is_none() || r.as_deref() == revision)
            })
        })
    }

    /// Locked revisions of a git key that should be tried before its head.
    pub fn preferred_revisions(&self, key: &PackageKey) -> Vec<String> {
        if !self.prefer_locked || self.fresh.contains(key) {
            return Vec::new();
        }
        self.locked
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|(_, r)| r.clone())
            .collect()
    }

    pub fn prefers(&self, summary: &Summary) -> bool {
        self.prefer_locked
            && !self.fresh.contains(&summary.id.key())
            && self.is_locked(&summary.id, summary.revision.as_deref())
    }

    pub fn sort_summaries(&self, summaries: &mut [Rc<Summary>]) {
        summaries.sort_by(|a, b| {
            self.prefers(b)
                .cmp(&self.prefers(a))
                .then_with(|| match self.ordering {
                    VersionOrdering::MaximumVersionsFirst => b.id.version.cmp(&a.id.version),
                    VersionOrdering::MinimumVersionsFirst => a.id.version.cmp(&b.id.version),
                })
        });
    }
}

/// The [`CandidateSource`] backed by registries, git remotes and the local
/// disk. Results are memoized for the lifetime of the queryer.
pub struct SourceQueryer<'a> {
    registries: &'a RegistryList,
    git: &'a dyn GitRemote,
    prefs: VersionPreferences,
    offline: bool,
    query_cache: HashMap<Requirement, Rc<Vec<Rc<Summary>>>>,
    local_cache: HashMap<PathBuf, Rc<Summary>>,
    git_cache: HashMap<(SourceKind, String), Rc<Summary>>,
    git_heads: HashMap<SourceKind, Option<String>>,
}

impl<'a> SourceQueryer<'a> {
    pub fn new(
        registries: &'a RegistryList,
        git: &'a dyn GitRemote,
        prefs: VersionPreferences,
        offline: bool,
    ) -> Self {
        SourceQueryer {
            registries,
            git,
            prefs,
            offline,
            query_cache: HashMap::new(),
            local_cache: HashMap::new(),
            git_cache: HashMap::new(),
            git_heads: HashMap::new(),
        }
    }

    /// Makes an already loaded local package known, so it is not read twice.
    pub fn seed_local(&mut self, path: PathBuf, summary: Rc<Summary>) {
        self.local_cache.insert(path, summary);
    }

    fn registry(&self, name: Option<&str>) -> Result<&'a dyn crate::registry::Registry, UpdateError> {
        self.registries
            .get_registry(name)
            .ok_or_else(|| anyhow!("registry `{}` is not configured", name.unwrap_or("default")).into())
    }

    fn local_summary(&mut self, path: &Path) -> Result<Rc<Summary>, UpdateError> {
        if let Some(s) = self.local_cache.get(path) {
            return Ok(Rc::clone(s));
        }
        let manifest = read_manifest_in_dir(path)?;
        let summary = Summary::from_manifest(
            &manifest,
            SourceKind::Local(path.to_owned()),
            None,
            Some(path),
        )
        .map_err(|kind| ManifestError {
            path: manifest_path_in(path).into(),
            kind,
        })?;
        let summary = Rc::new(summary);
        self.local_cache.insert(path.to_owned(), Rc::clone(&summary));
        Ok(summary)
    }

    fn git_summary(
        &mut self,
        source: &SourceKind,
        url: &str,
        commit: &str,
    ) -> Result<Rc<Summary>, GitError> {
        let cache_key = (source.clone(), commit.to_owned());
        if let Some(s) = self.git_cache.get(&cache_key) {
            return Ok(Rc::clone(s));
        }
        let text = self.git.manifest_at(url, commit, self.offline)?;
        let manifest = lockutil::manifest::parse_manifest_str(&text).map_err(|e| {
            GitError::InvalidManifest {
                url: url.to_owned(),
                commit: commit.to_owned(),
                reason: e.to_string(),
            }
        })?;
        let summary = Summary::from_manifest(&manifest, source.clone(), Some(commit.to_owned()), None)
            .map_err(|e| GitError::InvalidManifest {
                url: url.to_owned(),
                commit: commit.to_owned(),
                reason: e.to_string(),
            })?;
        let summary = Rc::new(summary);
        self.git_cache.insert(cache_key, Rc::clone(&summary));
        Ok(summary)
    }

    /// The commit a git source currently points at. `None` when offline and
    /// the repository is not cached.
    fn git_head(&mut self, source: &SourceKind) -> Result<Option<String>, UpdateError> {
        if let Some(head) = self.git_heads.get(source) {
            return Ok(head.clone());
        }
        let SourceKind::Git { url, reference } = source else {
            return Ok(None);
        };
        let head = match self.git.resolve(url, reference, self.offline) {
            Ok(commit) => Some(commit),
            Err(e) if self.offline => {
                log::debug!("cannot resolve {source} offline: {e}");
                None
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("failed to resolve {source}")).into()),
        };
        self.git_heads.insert(source.clone(), head.clone());
        Ok(head)
    }

    fn query_registry(
        &mut self,
        registry: Option<&str>,
        req: &Requirement,
    ) -> Result<Vec<Rc<Summary>>, UpdateError> {
        let reg = self.registry(registry)?;
        let all = reg.all_versions_of(&req.name)?;
        let mut res = Vec::new();
        for summary in all.values() {
            if !req.version_req.matches(&summary.id.version) {
                continue;
            }
            if summary.yanked && !self.prefs.is_locked(&summary.id, None) {
                continue;
            }
            if self.offline && !reg.is_materialized(summary) {
                continue;
            }
            res.push(Rc::clone(summary));
        }
        Ok(res)
    }

    fn query_git(&mut self, req: &Requirement) -> Result<Vec<Rc<Summary>>, UpdateError> {
        let SourceKind::Git { url, .. } = &req.source else {
            return Ok(Vec::new());
        };
        let mut commits = self.prefs.preferred_revisions(&req.key());
        if let Some(head) = self.git_head(&req.source)? {
            if !commits.contains(&head) {
                commits.push(head);
            }
        }
        let mut res = Vec::new();
        for commit in commits {
            match self.git_summary(&req.source, url, &commit) {
                Ok(s) => {
                    if req.version_req.matches(&s.id.version) {
                        res.push(s);
                    }
                }
                Err(e) if self.offline => log::debug!("skipping {commit} of {}: {e}", req.source),
                Err(e) => return Err(anyhow::Error::new(e).into()),
            }
        }
        Ok(res)
    }
}

impl CandidateSource for SourceQueryer<'_> {
    fn query(&mut self, req: &Requirement) -> Result<Rc<Vec<Rc<Summary>>>, UpdateError> {
        if let Some(res) = self.query_cache.get(req) {
            return Ok(Rc::clone(res));
        }
        let mut res = match &req.source {
            SourceKind::Registry(r) => self.query_registry(r.as_deref(), req)?,
            SourceKind::Git { .. } => self.query_git(req)?,
            SourceKind::Local(path) => {
                let s = self.local_summary(path)?;
                if req.version_req.matches(&s.id.version) {
                    vec![s]
                } else {
                    vec![]
                }
            }
        };
        if res.is_empty() && self.offline && !req.source.is_local() {
            return Err(UpdateError::OfflineNoCandidate {
                requirement: req.clone(),
            });
        }
        // a git head resolved after the locked commits still goes last
        if !req.source.is_git() {
            self.prefs.sort_summaries(&mut res);
        }
        log::debug!("{} candidates for {}", res.len(), req);
        let res = Rc::new(res);
        self.query_cache.insert(req.clone(), Rc::clone(&res));
        Ok(res)
    }

    fn locked(&mut self, node: &Node) -> Result<Option<Rc<Summary>>, UpdateError> {
        let id = &node.id;
        match &id.source {
            SourceKind::Registry(r) => {
                let reg = self.registry(r.as_deref())?;
                Ok(reg.get_package_version(&id.name, &id.version)?)
            }
            SourceKind::Git { url, .. } => {
                let Some(commit) = &node.revision else {
                    return Ok(None);
                };
                match self.git_summary(&id.source, url, commit) {
                    Ok(s) if s.id == *id => Ok(Some(s)),
                    Ok(_) => Ok(None),
                    Err(GitError::NotCached(_) | GitError::UnknownRevision { .. }) => Ok(None),
                    Err(e) => Err(anyhow::Error::new(e).into()),
                }
            }
            SourceKind::Local(path) => {
                let s = self.local_summary(path)?;
                Ok((s.id == *id).then_some(s))
            }
        }
    }

    fn precise(&mut self, key: &PackageKey, value: &str) -> Result<Rc<Summary>, UpdateError> {
        let unavailable = |reason: String| UpdateError::ExactVersionUnavailable {
            id: format!("{}@{}", key.name, value),
            reason,
        };
        match &key.source {
            SourceKind::Registry(r) => {
                let version = Version::parse(value)
                    .map_err(|e| unavailable(format!("`{value}` is not a valid version: {e}")))?;
                let reg = self.registry(r.as_deref())?;
                let summary = reg
                    .get_package_version(&key.name, &version)?
                    .ok_or_else(|| unavailable(format!("no such version in the {}", key.source)))?;
                if self.offline && !reg.is_materialized(&summary) {
                    return Err(unavailable(
                        "it is not cached and the network is disabled".into(),
                    ));
                }
                if summary.yanked {
                    log::warn!("{} is yanked", summary.id);
                }
                Ok(summary)
            }
            SourceKind::Git { url, .. } => {
                let commit = self
                    .git
                    .resolve(url, &GitReference::Rev(value.to_owned()), self.offline)
                    .map_err(|source| UpdateError::InvalidGitRevision {
                        url: url.clone(),
                        revision: value.to_owned(),
                        source,
                    })?;
                self.git_summary(&key.source, url, &commit)
                    .map_err(|source| UpdateError::InvalidGitRevision {
                        url: url.clone(),
                        revision: value.to_owned(),
                        source,
                    })
            }
            SourceKind::Local(_) => Err(unavailable(
                "path packages are always taken from disk".into(),
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use expect_test::expect;
    use lockutil::{dependency::DepKind, manifest::parse_manifest_str};
    use semver::VersionReq;

    use super::*;
    use crate::{git::mock::MockGit, registry::mock::MockRegistry};

    fn req(name: &str, version_req: &str) -> Requirement {
        Requirement::new(
            name.parse().unwrap(),
            VersionReq::parse(version_req).unwrap(),
            SourceKind::Registry(None),
            DepKind::Normal,
        )
    }

    fn versions(list: &[Rc<Summary>]) -> Vec<String> {
        list.iter().map(|s| s.id.version.to_string()).collect()
    }

    fn registry() -> Rc<MockRegistry> {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "1.0.0", [])
            .add_package_full("dep/one", "1.1.0", [])
            .add_package_full("dep/one", "1.2.0", [])
            .add_package_full("dep/one", "2.0.0", [])
            .yank("dep/one", "1.2.0")
            .materialize("dep/one", "1.0.0");
        Rc::new(registry)
    }

    #[test]
    fn test_locked_versions_come_first() {
        let registry = registry();
        let registries = RegistryList::with_registry(Box::new(Rc::clone(&registry)));
        let git = MockGit::new();
        let mut prefs = VersionPreferences::default();
        prefs.lock_from(&LockedGraph::from_nodes([Node::new(
            "dep/one@1.0.0".parse().unwrap(),
        )]));
        prefs.set_prefer_locked(true);
        let mut source = SourceQueryer::new(&registries, &git, prefs, false);

        let res = source.query(&req("dep/one", "^1")).unwrap();
        // the yanked 1.2.0 is not locked, so it is left out
        assert_eq!(versions(&res), ["1.0.0", "1.1.0"]);
        source.query(&req("dep/one", "^1")).unwrap();
        assert_eq!(registry.calls.get(), 1);
    }

    #[test]
    fn test_fresh_and_minimal_ordering() {
        let registries = RegistryList::with_registry(Box::new(registry()));
        let git = MockGit::new();
        let mut prefs = VersionPreferences::new(VersionOrdering::MinimumVersionsFirst);
        prefs.lock_from(&LockedGraph::from_nodes([Node::new(
            "dep/one@1.1.0".parse().unwrap(),
        )]));
        prefs.set_prefer_locked(true);
        prefs.mark_fresh(req("dep/one", "*").key());
        let mut source = SourceQueryer::new(&registries, &git, prefs, false);
        let res = source.query(&req("dep/one", "*")).unwrap();
        assert_eq!(versions(&res), ["1.0.0", "1.1.0", "2.0.0"]);
    }

    #[test]
    fn test_offline_needs_cached_archive() {
        let registries = RegistryList::with_registry(Box::new(registry()));
        let git = MockGit::new();
        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), true);
        let res = source.query(&req("dep/one", "^1")).unwrap();
        assert_eq!(versions(&res), ["1.0.0"]);

        let err = source.query(&req("dep/one", "^2")).unwrap_err();
        expect!["no cached version of `dep/one ^2` is available while offline"]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn test_precise_registry_version() {
        let registries = RegistryList::with_registry(Box::new(registry()));
        let git = MockGit::new();
        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), false);
        let key = req("dep/one", "*").key();
        let s = source.precise(&key, "1.2.0").unwrap();
        assert!(s.yanked);

        let err = source.precise(&key, "1.3.0").unwrap_err();
        expect!["cannot update to `dep/one@1.3.0`: no such version in the default registry"]
            .assert_eq(&err.to_string());
        let err = source.precise(&key, "latest").unwrap_err();
        assert!(matches!(err, UpdateError::ExactVersionUnavailable { .. }));
    }

    fn git_source() -> SourceKind {
        SourceKind::Git {
            url: "https://example.com/lib.git".into(),
            reference: GitReference::DefaultBranch,
        }
    }

    fn mock_git() -> MockGit {
        let url = "https://example.com/lib.git";
        let mut git = MockGit::new();
        git.add_commit(url, "c1", r#"{ "name": "g/lib", "version": "0.1.0" }"#)
            .add_commit(url, "c2", r#"{ "name": "g/lib", "version": "0.2.0", "deps": { "dep/one": "1" } }"#)
            .point(url, GitReference::DefaultBranch, "c2");
        git
    }

    #[test]
    fn test_git_locked_commit_before_head() {
        let registries = RegistryList::with_registry(Box::new(registry()));
        let git = mock_git();
        let mut locked = Node::new(PackageId::new(
            "g/lib".parse().unwrap(),
            Version::new(0, 1, 0),
            git_source(),
        ));
        locked.revision = Some("c1".into());
        let mut prefs = VersionPreferences::default();
        prefs.lock_from(&LockedGraph::from_nodes([locked.clone()]));
        prefs.set_prefer_locked(true);
        let mut source = SourceQueryer::new(&registries, &git, prefs, false);

        let r = Requirement::new(
            "g/lib".parse().unwrap(),
            VersionReq::STAR,
            git_source(),
            DepKind::Normal,
        );
        let res = source.query(&r).unwrap();
        let revs: Vec<_> = res.iter().map(|s| s.revision.clone().unwrap()).collect();
        assert_eq!(revs, ["c1", "c2"]);
        // git packages depend on the default registry
        assert_eq!(res[1].requirements[0].source, SourceKind::Registry(None));

        let s = source.locked(&locked).unwrap().unwrap();
        assert_eq!(s.revision.as_deref(), Some("c1"));
    }

    #[test]
    fn test_precise_git_revision() {
        let registries = RegistryList::with_registry(Box::new(registry()));
        let git = mock_git();
        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), false);
        let key = PackageKey {
            name: "g/lib".parse().unwrap(),
            source: git_source(),
        };
        let s = source.precise(&key, "c1").unwrap();
        assert_eq!(s.id.version, Version::new(0, 1, 0));

        let err = source.precise(&key, "c9").unwrap_err();
        expect!["revision `c9` of `https://example.com/lib.git` cannot be resolved"]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn test_offline_git_without_clone() {
        let registries = RegistryList::with_registry(Box::new(registry()));
        let git = mock_git();
        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), true);
        let r = Requirement::new(
            "g/lib".parse().unwrap(),
            VersionReq::STAR,
            git_source(),
            DepKind::Normal,
        );
        assert!(matches!(
            source.query(&r),
            Err(UpdateError::OfflineNoCandidate { .. })
        ));
    }

    #[test]
    fn test_registry_packages_cannot_use_paths() {
        let manifest = parse_manifest_str(
            r#"{
                "name": "dep/two",
                "version": "1.0.0",
                "deps": {
                    "dep/one": { "path": "../one", "version": "1" },
                    "dep/three": { "version": "2", "registry": "alt" }
                }
            }"#,
        )
        .unwrap();
        let s = Summary::from_manifest(&manifest, SourceKind::Registry(Some("mirror".into())), None, None)
            .unwrap();
        let sources: Vec<String> = s.requirements.iter().map(|r| r.source.to_string()).collect();
        assert_eq!(sources, ["registry mirror", "registry alt"]);
    }

    #[test]
    fn test_unreadable_index_is_not_a_missing_version() {
        let dir = tempfile::tempdir().unwrap();
        let home = lockutil::lockstep_dir::LockstepHome::new(dir.path());
        let name: PackageName = "dep/one".parse().unwrap();
        let index = home.index_file(None, &name);
        std::fs::create_dir_all(index.parent().unwrap()).unwrap();
        std::fs::write(&index, b"\xff\xfe\n").unwrap();

        let registries = RegistryList::with_registry(Box::new(
            crate::registry::IndexRegistry::new(&home, None),
        ));
        let git = MockGit::new();
        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), false);

        let err = source
            .locked(&Node::new("dep/one@1.0.0".parse().unwrap()))
            .unwrap_err();
        assert!(matches!(err, UpdateError::Source(_)), "{err:?}");
        let key = PackageKey {
            name,
            source: SourceKind::Registry(None),
        };
        let err = source.precise(&key, "1.0.0").unwrap_err();
        assert!(matches!(err, UpdateError::Source(_)), "{err:?}");
    }
}
