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

//! The workspace side of a resolution: the root package, its workspace
//! members and every package reachable from them through path
//! dependencies.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    path::{Path, PathBuf},
    rc::Rc,
};

use lockutil::{
    dependency::Requirement,
    manifest::{
        Manifest, ManifestError, ManifestErrorKind, manifest_path_in, read_manifest_in_dir,
    },
    package::{PackageId, PackageKey, PackageName, SourceKind},
};
use petgraph::{
    graphmap::DiGraphMap,
    visit::{Control, DfsEvent, depth_first_search},
};

use crate::{error::UpdateError, source::Summary};

#[derive(Debug)]
pub struct RequirementGraph {
    /// Canonical workspace root.
    root_dir: PathBuf,
    /// The root package followed by the workspace members, in manifest order.
    roots: Vec<Rc<Summary>>,
    /// Every local package, roots included, by canonical directory.
    locals: BTreeMap<PathBuf, Rc<Summary>>,
}

fn summarize(manifest: &Manifest, dir: &Path) -> Result<Summary, UpdateError> {
    let summary = Summary::from_manifest(manifest, SourceKind::Local(dir.to_owned()), None, Some(dir))
        .map_err(|kind| ManifestError {
            path: manifest_path_in(dir).into(),
            kind,
        })?;
    Ok(summary)
}

fn load_local(dir: &Path) -> Result<Summary, UpdateError> {
    summarize(&read_manifest_in_dir(dir)?, dir)
}

fn canonical_member(root: &Path, member: &str) -> Result<PathBuf, UpdateError> {
    let dir = root.join(member);
    dunce::canonicalize(&dir).map_err(|e| {
        UpdateError::Manifest(ManifestError {
            path: manifest_path_in(&dir).into(),
            kind: ManifestErrorKind::IO(e),
        })
    })
}

impl RequirementGraph {
    #[tracing::instrument(level = "debug")]
    pub fn load(root_dir: &Path) -> Result<Self, UpdateError> {
        let root_dir = dunce::canonicalize(root_dir).map_err(|e| {
            UpdateError::Manifest(ManifestError {
                path: manifest_path_in(root_dir).into(),
                kind: ManifestErrorKind::IO(e),
            })
        })?;
        let root_manifest = read_manifest_in_dir(&root_dir)?;
        let root = summarize(&root_manifest, &root_dir)?;
        let mut member_dirs = Vec::new();
        for member in &root_manifest.workspace {
            let dir = canonical_member(&root_dir, member)?;
            if dir != root_dir && !member_dirs.contains(&dir) {
                member_dirs.push(dir);
            }
        }

        let mut locals = BTreeMap::new();
        let mut roots = vec![Rc::new(root)];
        locals.insert(root_dir.clone(), Rc::clone(&roots[0]));
        for dir in member_dirs {
            let member = Rc::new(load_local(&dir)?);
            locals.insert(dir, Rc::clone(&member));
            roots.push(member);
        }

        // dev dependencies only count for the workspace itself
        let mut queue: VecDeque<(Rc<Summary>, bool)> =
            roots.iter().map(|r| (Rc::clone(r), true)).collect();
        while let Some((summary, is_root)) = queue.pop_front() {
            for req in &summary.requirements {
                if req.kind.is_dev() && !is_root {
                    continue;
                }
                let SourceKind::Local(path) = &req.source else {
                    continue;
                };
                if locals.contains_key(path) {
                    continue;
                }
                log::debug!("Loading path dependency {} from {}", req.name, path.display());
                let dep = Rc::new(load_local(path)?);
                locals.insert(path.clone(), Rc::clone(&dep));
                queue.push_back((dep, false));
            }
        }

        let graph = RequirementGraph {
            root_dir,
            roots,
            locals,
        };
        graph.check_structural_cycles()?;
        Ok(graph)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn roots(&self) -> &[Rc<Summary>] {
        &self.roots
    }

    pub fn locals(&self) -> impl Iterator<Item = (&Path, &Rc<Summary>)> {
        self.locals.iter().map(|(p, s)| (p.as_path(), s))
    }

    pub fn local_ids(&self) -> impl Iterator<Item = &PackageId> {
        self.locals.values().map(|s| &s.id)
    }

    /// Keys of every local package: the workspace members and the path
    /// dependencies they pull in.
    pub fn workspace_keys(&self) -> BTreeSet<PackageKey> {
        self.locals.values().map(|s| s.key()).collect()
    }

    /// Registry packages named directly by local packages.
    pub fn registry_names(&self) -> BTreeSet<(Option<String>, PackageName)> {
        self.locals
            .values()
            .flat_map(|s| {
                let is_root = self.roots.iter().any(|r| Rc::ptr_eq(r, s));
                s.requirements
                    .iter()
                    .filter(move |r| is_root || !r.kind.is_dev())
            })
            .filter_map(|r| match &r.source {
                SourceKind::Registry(reg) => Some((reg.clone(), r.name.clone())),
                _ => None,
            })
            .collect()
    }

    fn local_edges<'a>(&'a self, summary: &'a Summary) -> impl Iterator<Item = &'a Path> + 'a {
        summary
            .requirements
            .iter()
            .filter(|r| !r.kind.is_dev())
            .filter_map(|r: &Requirement| match &r.source {
                SourceKind::Local(p) => Some(p.as_path()),
                _ => None,
            })
            .filter(|p| self.locals.contains_key(*p))
    }

    /// Local packages may depend on each other through dev dependencies in
    /// both directions, but not through normal or build ones.
    fn check_structural_cycles(&self) -> Result<(), UpdateError> {
        let mut graph: DiGraphMap<&Path, ()> = DiGraphMap::new();
        for (dir, summary) in &self.locals {
            graph.add_node(dir.as_path());
            for dep in self.local_edges(summary) {
                graph.add_edge(dir.as_path(), dep, ());
            }
        }

        // the parent of each node in the spanning forest
        let mut parents: BTreeMap<&Path, &Path> = BTreeMap::new();
        let res = depth_first_search(&graph, graph.nodes(), |ev| match ev {
            DfsEvent::TreeEdge(parent, n) => {
                parents.insert(n, parent);
                Control::Continue
            }
            DfsEvent::BackEdge(u, v) => Control::Break((u, v)),
            _ => Control::Continue,
        });
        let Some((last, first)) = res.break_value() else {
            return Ok(());
        };

        // walk the tree back from `last` to the start of the back edge
        let mut cycle = vec![first];
        let mut curr = last;
        loop {
            cycle.push(curr);
            if curr == first {
                break;
            }
            match parents.get(curr) {
                Some(&parent) => curr = parent,
                None => break,
            }
        }
        cycle.reverse();
        let path = cycle
            .into_iter()
            .map(|dir| self.locals[dir].id.name.to_string())
            .collect();
        Err(UpdateError::StructuralCycle { path })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_manifest(dir: &Path, contents: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(manifest_path_in(dir), contents).unwrap();
    }

    #[test]
    fn test_load_workspace_with_path_deps() {
        let tmp = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(tmp.path()).unwrap().join("ws");
        write_manifest(
            &root,
            r#"{
                "name": "app/main",
                "version": "0.1.0",
                "deps": { "dep/one": "1.2", "app/util": { "path": "members/util" } },
                "dev-deps": { "app/testkit": { "path": "../testkit" } },
                "workspace": ["members/util", "members/cli"]
            }"#,
        );
        write_manifest(
            &root.join("members/util"),
            r#"{ "name": "app/util", "version": "0.2.0", "deps": { "app/core": { "path": "../../core" } } }"#,
        );
        write_manifest(
            &root.join("members/cli"),
            r#"{ "name": "app/cli", "deps": { "app/util": { "path": "../util", "version": "0.2" } } }"#,
        );
        write_manifest(
            &root.join("core"),
            r#"{ "name": "app/core", "version": "1.0.0", "dev-deps": { "dep/never": "1" }, "deps": { "alt/pkg": { "version": "2", "registry": "alt" } } }"#,
        );
        // a sibling of the workspace, only reachable as a dev dependency
        let testkit = root.join("../testkit");
        write_manifest(&testkit, r#"{ "name": "app/testkit", "version": "0.1.0" }"#);

        let graph = RequirementGraph::load(&root).unwrap();
        let roots: Vec<String> = graph.roots().iter().map(|s| s.id.to_string()).collect();
        assert_eq!(roots.len(), 3);
        assert!(roots[0].starts_with("app/main@0.1.0"));
        assert!(roots[1].starts_with("app/util@0.2.0"));
        assert!(roots[2].starts_with("app/cli@0.0.0"));

        let mut names: Vec<String> = graph.local_ids().map(|id| id.name.to_string()).collect();
        names.sort();
        assert_eq!(names, ["app/cli", "app/core", "app/main", "app/testkit", "app/util"]);

        let registry: Vec<String> = graph
            .registry_names()
            .into_iter()
            .map(|(r, n)| format!("{}:{}", r.unwrap_or_default(), n))
            .collect();
        assert_eq!(registry, [":dep/one", "alt:alt/pkg"]);
    }

    #[test]
    fn test_structural_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(tmp.path()).unwrap();
        write_manifest(
            &root,
            r#"{ "name": "app/main", "deps": { "app/a": { "path": "a" } } }"#,
        );
        write_manifest(
            &root.join("a"),
            r#"{ "name": "app/a", "deps": { "app/b": { "path": "../b" } } }"#,
        );
        write_manifest(
            &root.join("b"),
            r#"{ "name": "app/b", "build-deps": { "app/a": { "path": "../a" } } }"#,
        );
        let err = RequirementGraph::load(&root).unwrap_err();
        let UpdateError::StructuralCycle { path } = &err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(path, &["app/a", "app/b", "app/a"]);
        assert_eq!(
            err.to_string(),
            "cyclic package dependency: app/a -> app/b -> app/a"
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(tmp.path()).unwrap();
        write_manifest(
            &root,
            r#"{ "name": "app/main", "deps": { "app/main": { "path": "." } } }"#,
        );
        let err = RequirementGraph::load(&root).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cyclic package dependency: app/main -> app/main"
        );
    }

    #[test]
    fn test_dev_cycle_is_fine() {
        let tmp = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(tmp.path()).unwrap();
        write_manifest(
            &root,
            r#"{ "name": "app/main", "deps": { "app/a": { "path": "a" } } }"#,
        );
        write_manifest(
            &root.join("a"),
            r#"{ "name": "app/a", "dev-deps": { "app/main": { "path": ".." } } }"#,
        );
        let graph = RequirementGraph::load(&root).unwrap();
        assert_eq!(graph.workspace_keys().len(), 2);
    }
}
