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

//! Comparing two locked graphs, and writing the new one.

use std::collections::BTreeSet;

use lockutil::{
    common::{FileLock, LOCK_GUARD},
    dirs::WorkspaceDirs,
    locked::{LockedGraph, Node},
    lockfile::{render, write_atomic},
    package::{PackageId, PackageKey},
};

use crate::error::UpdateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEntry {
    Added(PackageId),
    Removed(PackageId),
    /// One version of a key replaced by another, or a git package moved to
    /// another commit.
    Changed {
        from: PackageId,
        from_revision: Option<String>,
        to: PackageId,
        to_revision: Option<String>,
    },
}

fn short_rev(rev: Option<&str>) -> &str {
    match rev {
        Some(r) => r.get(..8).unwrap_or(r),
        None => "?",
    }
}

fn source_suffix(id: &PackageId) -> String {
    if id.source.is_default() {
        String::new()
    } else {
        format!(" ({})", id.source)
    }
}

impl DiffEntry {
    pub fn id(&self) -> &PackageId {
        match self {
            DiffEntry::Added(id) | DiffEntry::Removed(id) => id,
            DiffEntry::Changed { to, .. } => to,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            DiffEntry::Added(_) => "Adding",
            DiffEntry::Removed(_) => "Removing",
            DiffEntry::Changed { from, to, .. } if to.version < from.version => "Downgrading",
            DiffEntry::Changed { .. } => "Updating",
        }
    }

    /// The entry without its verb, e.g. `dep/one v1.0.0 -> v1.1.0`.
    pub fn describe(&self) -> String {
        match self {
            DiffEntry::Added(id) | DiffEntry::Removed(id) => {
                format!("{} v{}{}", id.name, id.version, source_suffix(id))
            }
            DiffEntry::Changed {
                from,
                from_revision,
                to,
                to_revision,
            } if from.version == to.version => format!(
                "{} v{}{} {} -> {}",
                to.name,
                to.version,
                source_suffix(to),
                short_rev(from_revision.as_deref()),
                short_rev(to_revision.as_deref())
            ),
            DiffEntry::Changed { from, to, .. } => format!(
                "{} v{} -> v{}{}",
                to.name,
                from.version,
                to.version,
                source_suffix(to)
            ),
        }
    }
}

impl std::fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.verb(), self.describe())
    }
}

/// Differences between two graphs, grouped by key and in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockDiff {
    entries: Vec<DiffEntry>,
}

impl LockDiff {
    pub fn between(old: &LockedGraph, new: &LockedGraph) -> Self {
        let old_by_key = old.by_key();
        let new_by_key = new.by_key();
        let keys: BTreeSet<&PackageKey> = old_by_key.keys().chain(new_by_key.keys()).collect();

        let mut entries = Vec::new();
        for key in keys {
            let before: &[&Node] = old_by_key.get(key).map(Vec::as_slice).unwrap_or_default();
            let after: &[&Node] = new_by_key.get(key).map(Vec::as_slice).unwrap_or_default();

            for n in before {
                if let Some(m) = after
                    .iter()
                    .find(|m| m.id == n.id && m.revision != n.revision)
                {
                    entries.push(DiffEntry::Changed {
                        from: n.id.clone(),
                        from_revision: n.revision.clone(),
                        to: m.id.clone(),
                        to_revision: m.revision.clone(),
                    });
                }
            }

            let removed: Vec<&Node> = before
                .iter()
                .filter(|n| !after.iter().any(|m| m.id == n.id))
                .copied()
                .collect();
            let added: Vec<&Node> = after
                .iter()
                .filter(|m| !before.iter().any(|n| n.id == m.id))
                .copied()
                .collect();
            match (removed.as_slice(), added.as_slice()) {
                ([from], [to]) => entries.push(DiffEntry::Changed {
                    from: from.id.clone(),
                    from_revision: from.revision.clone(),
                    to: to.id.clone(),
                    to_revision: to.revision.clone(),
                }),
                _ => {
                    entries.extend(removed.iter().map(|n| DiffEntry::Removed(n.id.clone())));
                    entries.extend(added.iter().map(|n| DiffEntry::Added(n.id.clone())));
                }
            }
        }
        LockDiff { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }
}

impl std::fmt::Display for LockDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Writes `graph` to the workspace lock file. Returns whether the file
/// changed.
pub fn persist(graph: &LockedGraph, dirs: &WorkspaceDirs) -> Result<bool, UpdateError> {
    let _guard = FileLock::lock(&dirs.root_dir).map_err(|source| UpdateError::PersistIoError {
        path: dirs.root_dir.join(LOCK_GUARD),
        source,
    })?;
    let contents = render(graph, &dirs.root_dir).map_err(|e| UpdateError::PersistIoError {
        path: dirs.lock_path.clone(),
        source: std::io::Error::other(e),
    })?;
    let written =
        write_atomic(&dirs.lock_path, &contents).map_err(|source| UpdateError::PersistIoError {
            path: dirs.lock_path.clone(),
            source,
        })?;
    if written {
        log::debug!("wrote {}", dirs.lock_path.display());
    }
    Ok(written)
}

#[cfg(test)]
mod test {
    use expect_test::expect;
    use lockutil::package::{GitReference, SourceKind};
    use semver::Version;

    use super::*;

    fn graph(ids: &[&str]) -> LockedGraph {
        LockedGraph::from_nodes(ids.iter().map(|id| Node::new(id.parse().unwrap())))
    }

    fn git_node(version: Version, commit: &str) -> Node {
        let mut node = Node::new(PackageId::new(
            "g/lib".parse().unwrap(),
            version,
            SourceKind::Git {
                url: "https://example.com/lib.git".into(),
                reference: GitReference::DefaultBranch,
            },
        ));
        node.revision = Some(commit.into());
        node
    }

    #[test]
    fn test_diff_by_key() {
        let old = graph(&["dep/a@1.0.0", "dep/b@2.1.0", "dep/c@0.1.0", "dep/d@1.0.0", "dep/d@2.0.0"]);
        let new = graph(&["dep/a@1.1.0", "dep/b@2.0.0", "dep/d@2.0.0", "dep/e@0.3.0"]);
        let diff = LockDiff::between(&old, &new);
        expect![[r#"
            Updating dep/a v1.0.0 -> v1.1.0
            Downgrading dep/b v2.1.0 -> v2.0.0
            Removing dep/c v0.1.0
            Removing dep/d v1.0.0
            Adding dep/e v0.3.0
        "#]]
        .assert_eq(&diff.to_string());
    }

    #[test]
    fn test_revision_change() {
        let old = LockedGraph::from_nodes([git_node(Version::new(0, 1, 0), "0123456789abcdef")]);
        let new = LockedGraph::from_nodes([git_node(Version::new(0, 1, 0), "fedcba9876543210")]);
        let diff = LockDiff::between(&old, &new);
        expect![[r#"
            Updating g/lib v0.1.0 (git https://example.com/lib.git) 01234567 -> fedcba98
        "#]]
        .assert_eq(&diff.to_string());
        assert!(LockDiff::between(&new, &new).is_empty());
    }

    #[test]
    fn test_persist_skips_identical() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = WorkspaceDirs::from_root(dir.path().to_owned());
        let g = graph(&["dep/a@1.0.0"]);
        assert!(persist(&g, &dirs).unwrap());
        let first = std::fs::read(&dirs.lock_path).unwrap();
        assert!(!persist(&g, &dirs).unwrap());
        assert_eq!(std::fs::read(&dirs.lock_path).unwrap(), first);
    }
}
