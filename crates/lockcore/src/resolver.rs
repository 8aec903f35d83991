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

//! The backtracking resolver.
//!
//! Pending requirements are kept on a LIFO queue. Popping one yields a
//! [`Frame`] holding every option for it; the first option is applied and
//! the frame pushed on the undo stack. When a requirement has no option at
//! all, frames are undone in reverse order until one has an untried option
//! left. The search is chronological and fully deterministic.

pub mod conflict;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    rc::Rc,
};

use lockutil::{
    dependency::Requirement,
    locked::{Edge, LockedGraph, Node},
    package::{PackageId, PackageKey},
    version::SemverCompat,
};

use self::conflict::{ConflictChain, ConflictReason};
use crate::{
    error::UpdateError,
    source::{CandidateSource, Summary},
};

/// The version `--precise` asks for.
#[derive(Debug, Clone)]
pub struct PreciseTarget {
    pub key: PackageKey,
    pub summary: Rc<Summary>,
    /// Other locked versions of the key. Requirements the precise version
    /// does not satisfy may still use them.
    pub others: Vec<Node>,
}

#[derive(Debug)]
pub struct Resolution {
    pub graph: LockedGraph,
}

/// A failed search.
#[derive(Debug)]
pub struct Conflicts {
    /// The first conflict met.
    pub chain: ConflictChain,
    /// Fixed keys whose pinned versions were rejected somewhere in the
    /// search.
    pub promotable: BTreeSet<PackageKey>,
}

#[derive(Debug, Clone)]
struct Pending {
    parent: PackageId,
    requirement: Requirement,
}

enum Choice {
    /// Reuse a package that is already selected.
    Existing(Rc<Summary>),
    /// Select a new package.
    New(Rc<Summary>),
}

impl Choice {
    fn summary(&self) -> &Rc<Summary> {
        match self {
            Choice::Existing(s) | Choice::New(s) => s,
        }
    }
}

struct Applied {
    activated: bool,
    queue_len: usize,
}

struct Frame {
    pending: Pending,
    options: Vec<Choice>,
    next: usize,
    applied: Option<Applied>,
}

#[derive(Default)]
struct State {
    activations: HashMap<PackageKey, BTreeMap<SemverCompat, Rc<Summary>>>,
    /// The package that first required each selected package.
    parents: HashMap<PackageId, PackageId>,
    edges: Vec<(PackageId, Requirement, PackageId)>,
    queue: Vec<Pending>,
}

impl State {
    /// `id` and the packages that led to it, root first.
    fn path_to(&self, id: &PackageId) -> Vec<PackageId> {
        let mut path = vec![id.clone()];
        let mut cur = id;
        while let Some(parent) = self.parents.get(cur) {
            path.push(parent.clone());
            cur = parent;
        }
        path.reverse();
        path
    }

    fn undo(&mut self, frame: &mut Frame) {
        let Some(applied) = frame.applied.take() else {
            return;
        };
        if let Some((_, _, target)) = self.edges.pop() {
            if applied.activated {
                let key = target.key();
                if let Some(buckets) = self.activations.get_mut(&key) {
                    buckets.remove(&SemverCompat::from(&target.version));
                    if buckets.is_empty() {
                        self.activations.remove(&key);
                    }
                }
                self.parents.remove(&target);
            }
        }
        self.queue.truncate(applied.queue_len);
    }
}

type Candidates = Rc<Vec<Rc<Summary>>>;

pub struct Resolver<'a> {
    source: &'a mut dyn CandidateSource,
    fixed: &'a BTreeMap<PackageKey, Vec<Node>>,
    precise: Option<&'a PreciseTarget>,
    parallel_versions: bool,
    pinned: HashMap<PackageKey, Candidates>,
    roots: HashSet<PackageId>,
    first_conflict: Option<ConflictChain>,
    promotable: BTreeSet<PackageKey>,
}

impl<'a> Resolver<'a> {
    /// `fixed` keys only get their listed nodes as candidates.
    pub fn new(
        source: &'a mut dyn CandidateSource,
        fixed: &'a BTreeMap<PackageKey, Vec<Node>>,
    ) -> Self {
        Resolver {
            source,
            fixed,
            precise: None,
            parallel_versions: true,
            pinned: HashMap::new(),
            roots: HashSet::new(),
            first_conflict: None,
            promotable: BTreeSet::new(),
        }
    }

    pub fn with_precise(mut self, precise: Option<&'a PreciseTarget>) -> Self {
        self.precise = precise;
        self
    }

    /// With parallel versions off, a key gets at most one version.
    pub fn parallel_versions(mut self, on: bool) -> Self {
        self.parallel_versions = on;
        self
    }

    fn locked_summaries<'n>(
        &mut self,
        key: &PackageKey,
        first: Option<&Rc<Summary>>,
        nodes: impl Iterator<Item = &'n Node>,
    ) -> Result<Candidates, UpdateError> {
        if let Some(c) = self.pinned.get(key) {
            return Ok(Rc::clone(c));
        }
        let mut list: Vec<Rc<Summary>> = first.into_iter().cloned().collect();
        for node in nodes {
            if list.iter().any(|s| s.id == node.id) {
                continue;
            }
            match self.source.locked(node)? {
                Some(s) => list.push(s),
                None => log::debug!("locked {} is no longer available", node.id),
            }
        }
        let list = Rc::new(list);
        self.pinned.insert(key.clone(), Rc::clone(&list));
        Ok(list)
    }

    /// Candidates for a requirement, before checking it. `None` when the
    /// source has nothing cached for it while offline.
    fn candidates(&mut self, req: &Requirement) -> Result<Option<Candidates>, UpdateError> {
        let key = req.key();
        if let Some(p) = self.precise.filter(|p| p.key == key) {
            // newest locked versions first
            return self
                .locked_summaries(&key, Some(&p.summary), p.others.iter().rev())
                .map(Some);
        }
        let fixed = self.fixed;
        if let Some(nodes) = fixed.get(&key) {
            return self
                .locked_summaries(&key, None, nodes.iter().rev())
                .map(Some);
        }
        match self.source.query(req) {
            Ok(c) => Ok(Some(c)),
            Err(UpdateError::OfflineNoCandidate { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn options_for(
        &mut self,
        state: &State,
        pending: &Pending,
    ) -> Result<Result<Vec<Choice>, ConflictReason>, UpdateError> {
        let req = &pending.requirement;
        let key = req.key();
        let existing = state.activations.get(&key);

        let mut options = Vec::new();
        let mut mismatched = None;
        for s in existing.into_iter().flat_map(|b| b.values().rev()) {
            if req.matches(&s.id) {
                options.push(Choice::Existing(Rc::clone(s)));
            } else if mismatched.is_none() {
                mismatched = Some(s.id.clone());
            }
        }

        let allow_new = self.parallel_versions || existing.is_none_or(|b| b.is_empty());
        let mut offline = false;
        if allow_new {
            match self.candidates(req)? {
                Some(list) => {
                    for s in list.iter() {
                        if !req.matches(&s.id) {
                            continue;
                        }
                        // an occupied bucket only admits its own activation
                        let compat = SemverCompat::from(&s.id.version);
                        if existing.is_some_and(|b| b.contains_key(&compat)) {
                            continue;
                        }
                        options.push(Choice::New(Rc::clone(s)));
                    }
                }
                None => offline = true,
            }
        }
        if !options.is_empty() {
            return Ok(Ok(options));
        }

        let reason = if let Some(nodes) = self.fixed.get(&key) {
            ConflictReason::Pinned {
                locked: nodes.iter().map(|n| n.id.clone()).collect(),
            }
        } else if let Some(existing) = mismatched {
            let mut path = state.path_to(&existing);
            path.pop();
            ConflictReason::Activated { existing, path }
        } else if offline {
            ConflictReason::Offline
        } else {
            ConflictReason::NoCandidates
        };
        Ok(Err(reason))
    }

    fn activate(
        &mut self,
        state: &mut State,
        summary: &Rc<Summary>,
        parent: Option<&PackageId>,
    ) -> Result<(), UpdateError> {
        state
            .activations
            .entry(summary.key())
            .or_default()
            .insert(SemverCompat::from(&summary.id.version), Rc::clone(summary));
        if let Some(parent) = parent {
            state.parents.insert(summary.id.clone(), parent.clone());
        }

        let is_root = self.roots.contains(&summary.id);
        let mut deps = Vec::new();
        for req in &summary.requirements {
            if req.kind.is_dev() && !is_root {
                continue;
            }
            let count = match self.candidates(req)? {
                Some(list) => list.iter().filter(|s| req.matches(&s.id)).count(),
                None => 0,
            };
            deps.push((
                count,
                Pending {
                    parent: summary.id.clone(),
                    requirement: req.clone(),
                },
            ));
        }
        // the most constrained dependency is popped first
        deps.sort_by_key(|(count, _)| *count);
        state.queue.extend(deps.into_iter().rev().map(|(_, p)| p));
        Ok(())
    }

    fn apply(&mut self, state: &mut State, frame: &mut Frame) -> Result<(), UpdateError> {
        let choice = &frame.options[frame.next];
        frame.next += 1;
        let queue_len = state.queue.len();
        let summary = Rc::clone(choice.summary());
        let activated = matches!(choice, Choice::New(_));
        state.edges.push((
            frame.pending.parent.clone(),
            frame.pending.requirement.clone(),
            summary.id.clone(),
        ));
        if activated {
            log::debug!(
                "selecting {} for {} (option {} of {})",
                summary.id,
                frame.pending.requirement,
                frame.next,
                frame.options.len()
            );
            self.activate(state, &summary, Some(&frame.pending.parent))?;
        }
        frame.applied = Some(Applied {
            activated,
            queue_len,
        });
        Ok(())
    }

    /// Undoes frames until one has an option left, and applies it.
    fn backtrack(&mut self, state: &mut State, frames: &mut Vec<Frame>) -> Result<bool, UpdateError> {
        while let Some(mut frame) = frames.pop() {
            state.undo(&mut frame);
            if frame.next < frame.options.len() {
                self.apply(state, &mut frame)?;
                frames.push(frame);
                return Ok(true);
            }
            state.queue.push(frame.pending);
        }
        Ok(false)
    }

    fn conflict(&mut self, state: &State, pending: &Pending, reason: ConflictReason) -> ConflictChain {
        if matches!(reason, ConflictReason::Pinned { .. }) {
            self.promotable.insert(pending.requirement.key());
        }
        log::debug!("no option for {} required by {}", pending.requirement, pending.parent);
        let chain = ConflictChain {
            requirement: pending.requirement.clone(),
            path: state.path_to(&pending.parent),
            reason,
        };
        if self.first_conflict.is_none() {
            self.first_conflict = Some(chain.clone());
        }
        chain
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn resolve(
        &mut self,
        roots: &[Rc<Summary>],
    ) -> Result<Result<Resolution, Conflicts>, UpdateError> {
        let mut state = State::default();
        self.roots = roots.iter().map(|r| r.id.clone()).collect();
        for root in roots {
            self.activate(&mut state, root, None)?;
        }

        let mut frames: Vec<Frame> = Vec::new();
        while let Some(pending) = state.queue.pop() {
            match self.options_for(&state, &pending)? {
                Ok(options) => {
                    let mut frame = Frame {
                        pending,
                        options,
                        next: 0,
                        applied: None,
                    };
                    self.apply(&mut state, &mut frame)?;
                    frames.push(frame);
                }
                Err(reason) => {
                    let chain = self.conflict(&state, &pending, reason);
                    state.queue.push(pending);
                    if !self.backtrack(&mut state, &mut frames)? {
                        return Ok(Err(Conflicts {
                            chain: self.first_conflict.take().unwrap_or(chain),
                            promotable: std::mem::take(&mut self.promotable),
                        }));
                    }
                }
            }
        }

        Ok(Ok(Resolution {
            graph: build_graph(&state)?,
        }))
    }
}

fn build_graph(state: &State) -> Result<LockedGraph, UpdateError> {
    let mut nodes: BTreeMap<PackageId, Node> = BTreeMap::new();
    for summary in state.activations.values().flat_map(|b| b.values()) {
        let mut node = Node::new(summary.id.clone());
        node.revision = summary.revision.clone();
        node.checksum = summary.checksum.clone();
        nodes.insert(summary.id.clone(), node);
    }
    for (from, requirement, target) in &state.edges {
        if let Some(node) = nodes.get_mut(from) {
            node.edges.push(Edge {
                requirement: requirement.clone(),
                target: target.clone(),
            });
        }
    }
    let graph = LockedGraph::from_nodes(nodes.into_values());
    graph
        .check_cycles()
        .map_err(|members| UpdateError::StructuralCycle {
            path: members.iter().map(|id| id.to_string()).collect(),
        })?;
    Ok(graph)
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use expect_test::expect;
    use lockutil::{
        dependency::DepKind,
        package::{PackageName, SourceKind},
    };
    use semver::VersionReq;

    use super::*;
    use crate::{
        git::mock::MockGit,
        registry::{
            RegistryList,
            mock::{MockRegistry, create_mock_summary},
        },
        source::{SourceQueryer, VersionPreferences},
    };

    fn create_mock_root<'a>(deps: impl IntoIterator<Item = (&'a str, &'a str)>) -> Rc<Summary> {
        let mut root = create_mock_summary(None, "app/main", "0.1.0", deps);
        root.id.source = SourceKind::Local(PathBuf::from("/ws"));
        Rc::new(root)
    }

    fn run(
        registry: MockRegistry,
        roots: &[Rc<Summary>],
        fixed: &BTreeMap<PackageKey, Vec<Node>>,
        precise: Option<&PreciseTarget>,
        parallel: bool,
    ) -> Result<Resolution, Conflicts> {
        let registries = RegistryList::with_registry(Box::new(registry));
        let git = MockGit::new();
        let mut source =
            SourceQueryer::new(&registries, &git, VersionPreferences::default(), false);
        Resolver::new(&mut source, fixed)
            .with_precise(precise)
            .parallel_versions(parallel)
            .resolve(roots)
            .expect("resolve failed")
    }

    fn ids(res: &Resolution) -> Vec<String> {
        res.graph.ids().map(|id| id.to_string()).collect()
    }

    fn key(name: &str) -> PackageKey {
        PackageKey {
            name: name.parse().unwrap(),
            source: SourceKind::Registry(None),
        }
    }

    #[test]
    fn test_selects_newest_matching() {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "0.1.0", [])
            .add_package_full("dep/one", "0.1.1", [])
            .add_package_full("dep/one", "0.2.0", []);
        let roots = [create_mock_root([("dep/one", "0.1.0")])];
        let res = run(registry, &roots, &BTreeMap::new(), None, true).unwrap();
        assert_eq!(ids(&res), ["app/main@0.1.0 (path /ws)", "dep/one@0.1.1"]);
        assert!(res.graph.verify().is_ok());
    }

    #[test]
    fn test_backtracks_to_older_candidate() {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/a", "1.0.0", [("dep/b", "^1")])
            .add_package_full("dep/a", "1.1.0", [("dep/b", "^2")])
            .add_package_full("dep/b", "1.0.0", []);
        let roots = [create_mock_root([("dep/a", "^1")])];
        let res = run(registry, &roots, &BTreeMap::new(), None, true).unwrap();
        assert_eq!(
            ids(&res),
            ["app/main@0.1.0 (path /ws)", "dep/a@1.0.0", "dep/b@1.0.0"]
        );
    }

    #[test]
    fn test_shared_activation_is_reused() {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "1.0.0", [])
            .add_package_full("dep/one", "1.2.0", [])
            .add_package_full("dep/two", "1.0.0", [("dep/one", "^1.1")]);
        let roots = [create_mock_root([("dep/one", "^1.0"), ("dep/two", "^1")])];
        let res = run(registry, &roots, &BTreeMap::new(), None, true).unwrap();
        assert_eq!(
            ids(&res),
            ["app/main@0.1.0 (path /ws)", "dep/one@1.2.0", "dep/two@1.0.0"]
        );
    }

    fn two_majors() -> MockRegistry {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "1.0.0", [])
            .add_package_full("dep/one", "2.0.0", [])
            .add_package_full("dep/two", "1.0.0", [("dep/one", "^1")]);
        registry
    }

    #[test]
    fn test_parallel_major_versions() {
        let roots = [create_mock_root([("dep/one", "^2"), ("dep/two", "^1")])];
        let res = run(two_majors(), &roots, &BTreeMap::new(), None, true).unwrap();
        assert_eq!(
            ids(&res),
            [
                "app/main@0.1.0 (path /ws)",
                "dep/one@1.0.0",
                "dep/one@2.0.0",
                "dep/two@1.0.0"
            ]
        );
    }

    #[test]
    fn test_single_version_conflict_chain() {
        let roots = [create_mock_root([("dep/one", "^2"), ("dep/two", "^1")])];
        let err = run(two_majors(), &roots, &BTreeMap::new(), None, false).unwrap_err();
        assert!(err.promotable.is_empty());
        expect![[r#"
            failed to select a version for `dep/one`
                required by package `dep/two@1.0.0`
                ... which is required by package `app/main@0.1.0 (path /ws)`
            the requirement `dep/one ^1` conflicts with the previously selected `dep/one@2.0.0`
                required by package `app/main@0.1.0 (path /ws)`"#]]
        .assert_eq(&err.chain.to_string());
    }

    #[test]
    fn test_pinned_conflict_is_promotable() {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "1.0.0", [])
            .add_package_full("dep/one", "1.1.0", []);
        let roots = [create_mock_root([("dep/one", "^1.1")])];
        let mut fixed = BTreeMap::new();
        fixed.insert(
            key("dep/one"),
            vec![Node::new("dep/one@1.0.0".parse().unwrap())],
        );
        let err = run(registry, &roots, &fixed, None, true).unwrap_err();
        assert!(matches!(err.chain.reason, ConflictReason::Pinned { .. }));
        assert_eq!(err.promotable.into_iter().collect::<Vec<_>>(), [key("dep/one")]);
    }

    #[test]
    fn test_fixed_keys_keep_locked_version() {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "1.0.0", [])
            .add_package_full("dep/one", "1.1.0", []);
        let roots = [create_mock_root([("dep/one", "^1")])];
        let mut fixed = BTreeMap::new();
        fixed.insert(
            key("dep/one"),
            vec![Node::new("dep/one@1.0.0".parse().unwrap())],
        );
        let res = run(registry, &roots, &fixed, None, true).unwrap();
        assert_eq!(ids(&res), ["app/main@0.1.0 (path /ws)", "dep/one@1.0.0"]);
    }

    #[test]
    fn test_precise_target_wins_over_newer() {
        let mut registry = MockRegistry::new();
        registry
            .add_package_full("dep/one", "1.0.0", [])
            .add_package_full("dep/one", "1.1.0", [])
            .add_package_full("dep/one", "1.2.0", []);
        let precise = PreciseTarget {
            key: key("dep/one"),
            summary: Rc::new(create_mock_summary(None, "dep/one", "1.1.0", [])),
            others: vec![],
        };
        let roots = [create_mock_root([("dep/one", "^1")])];
        let res = run(registry, &roots, &BTreeMap::new(), Some(&precise), true).unwrap();
        assert_eq!(ids(&res), ["app/main@0.1.0 (path /ws)", "dep/one@1.1.0"]);
    }

    #[test]
    fn test_dev_requirements_only_from_roots() {
        let dev = |name: &str| {
            Requirement::new(
                name.parse::<PackageName>().unwrap(),
                VersionReq::STAR,
                SourceKind::Registry(None),
                DepKind::Dev,
            )
        };
        let mut a = create_mock_summary(None, "dep/a", "1.0.0", []);
        a.requirements.push(dev("dep/missing"));
        let mut registry = MockRegistry::new();
        registry.add_package(a);

        let mut root = create_mock_root([]);
        Rc::get_mut(&mut root).unwrap().requirements.push(dev("dep/a"));
        let res = run(registry, &[root], &BTreeMap::new(), None, true).unwrap();
        assert_eq!(ids(&res), ["app/main@0.1.0 (path /ws)", "dep/a@1.0.0"]);
    }

    #[test]
    fn test_missing_package_reports_no_candidates() {
        let roots = [create_mock_root([("dep/none", "^1")])];
        let err = run(MockRegistry::new(), &roots, &BTreeMap::new(), None, true).unwrap_err();
        expect![[r#"
            failed to select a version for the requirement `dep/none ^1`
                required by package `app/main@0.1.0 (path /ws)`
            no version of `dep/none` matches `^1`"#]]
        .assert_eq(&err.chain.to_string());
    }
}
