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

//! The locked dependency graph: one node per resolved package, each edge
//! labelled with the requirement it satisfies.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::{graphmap::DiGraphMap, visit::Dfs};

use crate::{
    dependency::Requirement,
    package::{PackageId, PackageKey},
};

pub const LOCK_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub requirement: Requirement,
    pub target: PackageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: PackageId,
    /// Commit id, for git packages.
    pub revision: Option<String>,
    pub checksum: Option<String>,
    pub edges: Vec<Edge>,
}

impl Node {
    pub fn new(id: PackageId) -> Self {
        Node {
            id,
            revision: None,
            checksum: None,
            edges: Vec::new(),
        }
    }
}

/// An edge whose target does not satisfy its requirement, or is missing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{from} requires {requirement}, but the locked graph has {target}")]
pub struct UnsatisfiedEdge {
    pub from: PackageId,
    pub requirement: Requirement,
    pub target: PackageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedGraph {
    version: u32,
    nodes: BTreeMap<PackageId, Node>,
}

impl Default for LockedGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl LockedGraph {
    pub fn new() -> Self {
        LockedGraph {
            version: LOCK_FORMAT_VERSION,
            nodes: BTreeMap::new(),
        }
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut g = Self::new();
        for node in nodes {
            g.insert(node);
        }
        g
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: &PackageId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PackageId> {
        self.nodes.keys()
    }

    pub fn keys(&self) -> BTreeSet<PackageKey> {
        self.nodes.keys().map(PackageId::key).collect()
    }

    /// Every locked version of `key`, lowest first.
    pub fn nodes_of_key<'a>(&'a self, key: &'a PackageKey) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| n.id.is_key(key))
    }

    pub fn by_key(&self) -> BTreeMap<PackageKey, Vec<&Node>> {
        let mut res: BTreeMap<_, Vec<_>> = BTreeMap::new();
        for node in self.nodes.values() {
            res.entry(node.id.key()).or_default().push(node);
        }
        res
    }

    /// Keys reachable from `from` (inclusive) along edges of any kind.
    pub fn reachable_keys(&self, from: &BTreeSet<PackageKey>) -> BTreeSet<PackageKey> {
        let mut graph = DiGraphMap::<&PackageId, ()>::new();
        for node in self.nodes.values() {
            graph.add_node(&node.id);
            for edge in &node.edges {
                graph.add_edge(&node.id, &edge.target, ());
            }
        }

        let mut seen = from.clone();
        let mut dfs = Dfs::empty(&graph);
        for start in self.nodes.keys().filter(|id| from.contains(&id.key())) {
            dfs.move_to(start);
            while let Some(id) = dfs.next(&graph) {
                seen.insert(id.key());
            }
        }
        seen
    }

    /// Checks that every edge points at a node that satisfies it.
    pub fn verify(&self) -> Result<(), UnsatisfiedEdge> {
        for node in self.nodes.values() {
            for edge in &node.edges {
                if !self.nodes.contains_key(&edge.target) || !edge.requirement.matches(&edge.target)
                {
                    return Err(UnsatisfiedEdge {
                        from: node.id.clone(),
                        requirement: edge.requirement.clone(),
                        target: edge.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks that the subgraph of normal and build edges is acyclic. On
    /// failure returns the members of one cycle, in id order.
    pub fn check_cycles(&self) -> Result<(), Vec<PackageId>> {
        let ids: Vec<&PackageId> = self.nodes.keys().collect();
        let index: HashMap<&PackageId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let mut graph = DiGraphMap::<usize, ()>::new();
        for (i, node) in self.nodes.values().enumerate() {
            graph.add_node(i);
            for edge in node.edges.iter().filter(|e| !e.requirement.kind.is_dev()) {
                if let Some(&j) = index.get(&edge.target) {
                    if i == j {
                        return Err(vec![node.id.clone()]);
                    }
                    graph.add_edge(i, j, ());
                }
            }
        }
        for scc in petgraph::algo::tarjan_scc(&graph) {
            if scc.len() > 1 {
                let mut members: Vec<PackageId> = scc.iter().map(|&i| ids[i].clone()).collect();
                members.sort();
                return Err(members);
            }
        }
        Ok(())
    }
}
