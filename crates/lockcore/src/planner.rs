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

//! Which packages an update may touch.
//!
//! A [`Plan`] splits the keys of the previous lock into fixed keys, held at
//! their locked versions, and free keys, which the resolver may move. When a
//! solve fails because of a fixed key, that key is unpinned and the solve
//! retried, until it succeeds or nothing is left to unpin.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    rc::Rc,
};

use lockutil::{
    locked::{LockedGraph, Node},
    lockfile::render,
    package::{PackageId, PackageKey},
};

use crate::{
    diff::LockDiff,
    error::UpdateError,
    resolver::{
        PreciseTarget, Resolver,
        conflict::{ConflictChain, ConflictReason},
    },
    source::{CandidateSource, Summary, VersionOrdering, VersionPreferences},
    specifier::Specifier,
};

/// What the user asked for.
#[derive(Debug, Clone, Default)]
pub struct UpdateMode {
    pub targets: Vec<Specifier>,
    /// Also update everything the targets depend on.
    pub aggressive: bool,
    /// Move the single target to exactly this version or revision.
    pub precise: Option<String>,
    /// Only re-resolve workspace members.
    pub workspace_only: bool,
    pub dry_run: bool,
    /// Fail instead of changing the lock file.
    pub frozen: bool,
    pub offline: bool,
    pub minimal_versions: bool,
}

impl UpdateMode {
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.aggressive && self.precise.is_some() {
            return Err(UpdateError::ConflictingFlags(
                "cannot specify both --aggressive and --precise".into(),
            ));
        }
        if self.precise.is_some() && self.targets.len() != 1 {
            return Err(UpdateError::ConflictingFlags(
                "--precise requires exactly one package to be specified".into(),
            ));
        }
        if self.workspace_only && (self.aggressive || self.precise.is_some()) {
            return Err(UpdateError::ConflictingFlags(
                "--workspace cannot be combined with --aggressive or --precise".into(),
            ));
        }
        Ok(())
    }

    pub fn ordering(&self) -> VersionOrdering {
        if self.minimal_versions {
            VersionOrdering::MinimumVersionsFirst
        } else {
            VersionOrdering::MaximumVersionsFirst
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Keys held at their previously locked nodes.
    pub fixed: BTreeMap<PackageKey, Vec<Node>>,
    /// Free keys whose locked versions get no preference.
    pub fresh: BTreeSet<PackageKey>,
    pub prefer_locked: bool,
    /// The key `--precise` applies to.
    pub precise: Option<PackageKey>,
}

fn fix_all_but(previous: &LockedGraph, free: &BTreeSet<PackageKey>) -> BTreeMap<PackageKey, Vec<Node>> {
    previous
        .by_key()
        .into_iter()
        .filter(|(key, _)| !free.contains(key) && !key.source.is_local())
        .map(|(key, nodes)| (key, nodes.into_iter().cloned().collect()))
        .collect()
}

impl Plan {
    /// `targets` are the ids the specifiers matched.
    pub fn new(
        mode: &UpdateMode,
        previous: &LockedGraph,
        targets: &[PackageId],
        workspace_keys: &BTreeSet<PackageKey>,
    ) -> Self {
        let target_keys: BTreeSet<PackageKey> = targets.iter().map(PackageId::key).collect();
        let precise = mode
            .precise
            .as_ref()
            .and_then(|_| target_keys.first().cloned());

        if mode.workspace_only {
            let mut free = workspace_keys.clone();
            free.extend(target_keys.iter().cloned());
            return Plan {
                fixed: fix_all_but(previous, &free),
                fresh: BTreeSet::new(),
                prefer_locked: true,
                precise,
            };
        }
        if target_keys.is_empty() {
            return Plan {
                fixed: BTreeMap::new(),
                fresh: BTreeSet::new(),
                prefer_locked: false,
                precise,
            };
        }
        let free = if mode.aggressive {
            previous.reachable_keys(&target_keys)
        } else {
            target_keys
        };
        Plan {
            fixed: fix_all_but(previous, &free),
            fresh: free,
            prefer_locked: true,
            precise,
        }
    }

    /// Every non-local key held at its locked nodes.
    pub fn frozen(previous: &LockedGraph) -> Self {
        Plan {
            fixed: fix_all_but(previous, &BTreeSet::new()),
            fresh: BTreeSet::new(),
            prefer_locked: true,
            precise: None,
        }
    }

    /// Keys of `previous` the resolver may move.
    pub fn free_keys(&self, previous: &LockedGraph) -> BTreeSet<PackageKey> {
        previous
            .keys()
            .into_iter()
            .filter(|k| !self.fixed.contains_key(k))
            .collect()
    }

    /// Unpins `keys`. They keep their locked preference. Returns whether
    /// anything was unpinned.
    pub fn promote(&mut self, keys: &BTreeSet<PackageKey>) -> bool {
        let mut promoted = false;
        for key in keys {
            if self.fixed.remove(key).is_some() {
                log::debug!("unpinning {key}");
                promoted = true;
            }
        }
        promoted
    }

    pub fn preferences(&self, previous: &LockedGraph, ordering: VersionOrdering) -> VersionPreferences {
        let mut prefs = VersionPreferences::new(ordering);
        prefs.lock_from(previous);
        prefs.set_prefer_locked(self.prefer_locked);
        for key in &self.fresh {
            prefs.mark_fresh(key.clone());
        }
        prefs
    }
}

fn conflict_error(chain: ConflictChain, precise: Option<&PreciseTarget>) -> UpdateError {
    if chain.reason == ConflictReason::Offline {
        return UpdateError::OfflineNoCandidate {
            requirement: chain.requirement,
        };
    }
    match precise {
        // everything else was consistent before the precise version came in
        Some(p) => UpdateError::ExactVersionUnavailable {
            id: p.summary.id.to_string(),
            reason: chain.to_string(),
        },
        None => UpdateError::VersionConflict(Box::new(chain)),
    }
}

/// Resolves `roots` under `plan`, unpinning fixed keys that get in the way.
#[tracing::instrument(level = "debug", skip_all)]
pub fn solve(
    plan: &mut Plan,
    source: &mut dyn CandidateSource,
    roots: &[Rc<Summary>],
    precise: Option<&PreciseTarget>,
    parallel_versions: bool,
) -> Result<LockedGraph, UpdateError> {
    loop {
        let outcome = Resolver::new(&mut *source, &plan.fixed)
            .with_precise(precise)
            .parallel_versions(parallel_versions)
            .resolve(roots)?;
        match outcome {
            Ok(res) => {
                if let Some(p) = precise {
                    if !res.graph.contains(&p.summary.id) {
                        return Err(UpdateError::ExactVersionUnavailable {
                            id: p.summary.id.to_string(),
                            reason: format!("no requirement on `{}` accepts it", p.key),
                        });
                    }
                }
                return Ok(res.graph);
            }
            Err(conflicts) => {
                if !plan.promote(&conflicts.promotable) {
                    return Err(conflict_error(conflicts.chain, precise));
                }
            }
        }
    }
}

/// Resolves with every key held at its locked version. The lock file is up
/// to date if that succeeds and renders to the same file.
pub fn check_frozen(
    previous: &LockedGraph,
    source: &mut dyn CandidateSource,
    roots: &[Rc<Summary>],
    parallel_versions: bool,
    root_dir: &Path,
) -> Result<LockedGraph, UpdateError> {
    let plan = Plan::frozen(previous);
    let outcome = Resolver::new(source, &plan.fixed)
        .parallel_versions(parallel_versions)
        .resolve(roots);
    let reason = match outcome {
        Ok(Ok(res)) => {
            ensure_unchanged(&LockDiff::between(previous, &res.graph))?;
            let before = render(previous, root_dir).map_err(anyhow::Error::new)?;
            let after = render(&res.graph, root_dir).map_err(anyhow::Error::new)?;
            if before == after {
                return Ok(res.graph);
            }
            "the dependencies of locked packages changed".into()
        }
        Ok(Err(conflicts)) => conflicts.chain.to_string(),
        Err(e) => e.to_string(),
    };
    Err(UpdateError::LockOutOfDate { reason })
}

/// Fails with [`UpdateError::LockOutOfDate`], naming the first change, unless
/// `diff` is empty.
pub fn ensure_unchanged(diff: &LockDiff) -> Result<(), UpdateError> {
    match diff.entries().first() {
        Some(entry) => Err(UpdateError::LockOutOfDate {
            reason: format!("{} {}", entry.verb().to_lowercase(), entry.describe()),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use expect_test::expect;
    use lockutil::package::SourceKind;

    use super::*;
    use crate::{
        git::mock::MockGit,
        registry::{
            RegistryList,
            mock::{MockRegistry, create_mock_summary},
        },
        source::SourceQueryer,
    };

    fn id(s: &str) -> PackageId {
        s.parse().unwrap()
    }

    fn key(name: &str) -> PackageKey {
        id(&format!("{name}@0.0.0")).key()
    }

    fn create_mock_root<'a>(deps: impl IntoIterator<Item = (&'a str, &'a str)>) -> Rc<Summary> {
        let mut root = create_mock_summary(None, "app/main", "0.1.0", deps);
        root.id.source = SourceKind::Local(PathBuf::from("/ws"));
        Rc::new(root)
    }

    /// app/main -> dep/a -> dep/b, plus app/main -> dep/c.
    fn previous() -> LockedGraph {
        let root = create_mock_root([("dep/a", "^1"), ("dep/c", "^1")]);
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/a", "1.0.0", [("dep/b", "^1")])
            .add_package_full("dep/b", "1.0.0", [])
            .add_package_full("dep/c", "1.0.0", []);
        let registries = RegistryList::with_registry(Box::new(registry));
        let git = MockGit::new();
        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), false);
        solve(&mut Plan::default(), &mut source, &[root], None, true).unwrap()
    }

    fn mode(targets: &[&str]) -> UpdateMode {
        UpdateMode {
            targets: targets.iter().map(|t| t.parse().unwrap()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_flags() {
        let check = |m: UpdateMode| match m.validate() {
            Err(e) => e.to_string(),
            Ok(()) => "ok".into(),
        };
        let mut m = mode(&["dep/a"]);
        m.aggressive = true;
        m.precise = Some("1.0.0".into());
        expect!["cannot specify both --aggressive and --precise"].assert_eq(&check(m));

        let mut m = mode(&[]);
        m.precise = Some("1.0.0".into());
        expect!["--precise requires exactly one package to be specified"].assert_eq(&check(m));

        let mut m = mode(&[]);
        m.workspace_only = true;
        m.aggressive = true;
        expect!["--workspace cannot be combined with --aggressive or --precise"]
            .assert_eq(&check(m));

        let mut m = mode(&["dep/a"]);
        m.precise = Some("1.0.0".into());
        expect!["ok"].assert_eq(&check(m));
    }

    #[test]
    fn test_scopes() {
        let prev = previous();
        let none = BTreeSet::new();
        let full = Plan::new(&mode(&[]), &prev, &[], &none);
        assert!(full.fixed.is_empty());
        assert!(!full.prefer_locked);

        let targets = [id("dep/a@1.0.0")];
        let conservative = Plan::new(&mode(&["dep/a"]), &prev, &targets, &none);
        let mut m = mode(&["dep/a"]);
        m.aggressive = true;
        let aggressive = Plan::new(&m, &prev, &targets, &none);

        let names = |plan: &Plan| {
            plan.free_keys(&prev)
                .into_iter()
                .map(|k| k.name.to_string())
                .collect::<Vec<_>>()
        };
        // the local root is never fixed
        assert_eq!(names(&conservative), ["app/main", "dep/a"]);
        assert_eq!(names(&aggressive), ["app/main", "dep/a", "dep/b"]);
        assert!(conservative.free_keys(&prev).is_subset(&aggressive.free_keys(&prev)));
        assert!(aggressive.fresh.contains(&key("dep/b")));
    }

    #[test]
    fn test_workspace_only_fixes_externals() {
        let prev = previous();
        let mut m = mode(&[]);
        m.workspace_only = true;
        let plan = Plan::new(&m, &prev, &[], &BTreeSet::new());
        assert_eq!(
            plan.fixed.keys().cloned().collect::<Vec<_>>(),
            [key("dep/a"), key("dep/b"), key("dep/c")]
        );
    }

    #[test]
    fn test_promotion_unpins_blocking_key() {
        let prev = LockedGraph::from_nodes([
            Node::new(id("dep/one@1.0.0")),
            Node::new(id("dep/two@1.0.0")),
        ]);
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "1.0.0", [])
            .add_package_full("dep/one", "1.1.0", [])
            .add_package_full("dep/one", "1.2.0", [])
            .add_package_full("dep/two", "1.0.0", [("dep/one", "^1.0")])
            .add_package_full("dep/two", "1.1.0", [("dep/one", "^1.1")]);
        let registries = RegistryList::with_registry(Box::new(registry));
        let git = MockGit::new();

        let mut plan = Plan::new(&mode(&["dep/two"]), &prev, &[id("dep/two@1.0.0")], &BTreeSet::new());
        assert!(plan.fixed.contains_key(&key("dep/one")));
        let prefs = plan.preferences(&prev, VersionOrdering::default());
        let mut source = SourceQueryer::new(&registries, &git, prefs, false);
        let root = create_mock_root([("dep/two", "^1.1")]);
        let graph = solve(&mut plan, &mut source, &[root], None, true).unwrap();

        assert!(plan.fixed.is_empty());
        let ids: Vec<String> = graph.ids().map(|id| id.to_string()).collect();
        assert_eq!(
            ids,
            ["app/main@0.1.0 (path /ws)", "dep/one@1.2.0", "dep/two@1.1.0"]
        );
    }

    #[test]
    fn test_precise_must_be_selected() {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "1.0.0", [])
            .add_package_full("dep/one", "2.0.0", []);
        let registries = RegistryList::with_registry(Box::new(registry));
        let git = MockGit::new();
        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), false);
        let precise = PreciseTarget {
            key: key("dep/one"),
            summary: Rc::new(create_mock_summary(None, "dep/one", "2.0.0", [])),
            others: vec![],
        };
        let root = create_mock_root([("dep/one", "^1")]);
        let err = solve(&mut Plan::default(), &mut source, &[root], Some(&precise), true).unwrap_err();
        expect![[r#"
            cannot update to `dep/one@2.0.0`: failed to select a version for the requirement `dep/one ^1`
                required by package `app/main@0.1.0 (path /ws)`
            no version of `dep/one` matches `^1`"#]]
        .assert_eq(&err.to_string());
    }

    #[test]
    fn test_check_frozen() {
        let prev = previous();
        let root_dir = Path::new("/ws");
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/a", "1.0.0", [("dep/b", "^1")])
            .add_package_full("dep/a", "1.5.0", [("dep/b", "^1")])
            .add_package_full("dep/b", "1.0.0", [])
            .add_package_full("dep/c", "1.0.0", []);
        let registries = RegistryList::with_registry(Box::new(registry));
        let git = MockGit::new();

        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), true);
        let root = create_mock_root([("dep/a", "^1"), ("dep/c", "^1")]);
        let graph = check_frozen(&prev, &mut source, &[root], true, root_dir).unwrap();
        assert_eq!(graph, prev);

        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), true);
        let root = create_mock_root([("dep/a", "^1.5"), ("dep/c", "^1")]);
        let err = check_frozen(&prev, &mut source, &[root], true, root_dir).unwrap_err();
        assert!(matches!(err, UpdateError::LockOutOfDate { .. }));

        let mut source = SourceQueryer::new(&registries, &git, VersionPreferences::default(), true);
        let root = create_mock_root([("dep/a", "^1")]);
        let err = check_frozen(&prev, &mut source, &[root], true, root_dir).unwrap_err();
        expect!["the lock file needs to be updated but --locked was passed to prevent this: removing dep/c v1.0.0"]
            .assert_eq(&err.to_string());
    }
}
