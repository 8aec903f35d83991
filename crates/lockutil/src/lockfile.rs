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

//! Textual encoding of a [`LockedGraph`] as `lockstep.lock`.

use std::{
    collections::{BTreeSet, HashMap},
    io::Write,
    path::{Component, Path, PathBuf},
};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{
    dependency::{DepKind, Requirement},
    locked::{Edge, LOCK_FORMAT_VERSION, LockedGraph, Node},
    package::{GitReference, PackageId, PackageName, SourceKind},
    version::as_exact_version_req,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockFileJson {
    pub version: u32,
    #[serde(default)]
    pub packages: Vec<LockedPackageJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedPackageJson {
    pub name: String,
    pub version: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LockFileError {
    #[error("failed to read lock file `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse lock file")]
    Parse(#[from] serde_json_lenient::Error),
    #[error("failed to serialize lock file")]
    Serialize(#[source] serde_json::Error),
    #[error("unsupported lock file version {0}, expected {LOCK_FORMAT_VERSION}")]
    UnsupportedVersion(u32),
    #[error("invalid lock entry `{entry}`: {reason}")]
    InvalidEntry { entry: String, reason: String },
    #[error("`{from}` depends on `{dep}`, which is not in the lock file")]
    UnknownDependency { from: String, dep: String },
}

fn invalid(entry: &str, reason: impl Into<String>) -> LockFileError {
    LockFileError::InvalidEntry {
        entry: entry.to_owned(),
        reason: reason.into(),
    }
}

/// Lexically resolves `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut res = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !res.pop() {
                    res.push(c);
                }
            }
            c => res.push(c),
        }
    }
    res
}

/// `path` relative to `base`, using `..` where needed. Both must be absolute.
pub fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path = normalize_path(path);
    let base = normalize_path(base);
    let mut p = path.components().peekable();
    let mut b = base.components().peekable();
    while let (Some(x), Some(y)) = (p.peek(), b.peek()) {
        if x != y {
            break;
        }
        p.next();
        b.next();
    }
    let mut res = PathBuf::new();
    for _ in b {
        res.push("..");
    }
    for c in p {
        res.push(c);
    }
    if res.as_os_str().is_empty() {
        res.push(".");
    }
    res
}

pub fn encode_source(source: &SourceKind, revision: Option<&str>, root: &Path) -> String {
    match source {
        SourceKind::Registry(None) => "registry+default".into(),
        SourceKind::Registry(Some(name)) => format!("registry+{name}"),
        SourceKind::Git { url, reference } => {
            let mut s = format!("git+{url}");
            match reference {
                GitReference::DefaultBranch => {}
                GitReference::Branch(b) => s.push_str(&format!("?branch={b}")),
                GitReference::Tag(t) => s.push_str(&format!("?tag={t}")),
                GitReference::Rev(r) => s.push_str(&format!("?rev={r}")),
            }
            if let Some(rev) = revision {
                s.push('#');
                s.push_str(rev);
            }
            s
        }
        SourceKind::Local(path) => {
            let rel = relative_path(path, root);
            let parts: Vec<_> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            format!("path+{}", parts.join("/"))
        }
    }
}

pub fn decode_source(s: &str, root: &Path) -> Result<(SourceKind, Option<String>), LockFileError> {
    if let Some(name) = s.strip_prefix("registry+") {
        if name.is_empty() {
            return Err(invalid(s, "empty registry name"));
        }
        let registry = (name != "default").then(|| name.to_owned());
        return Ok((SourceKind::Registry(registry), None));
    }
    if let Some(rest) = s.strip_prefix("git+") {
        let (rest, revision) = match rest.rsplit_once('#') {
            Some((r, rev)) if !rev.is_empty() => (r, Some(rev.to_owned())),
            Some(_) => return Err(invalid(s, "empty git revision")),
            None => (rest, None),
        };
        let (url, reference) = match rest.split_once('?') {
            None => (rest, GitReference::DefaultBranch),
            Some((url, query)) => {
                let reference = match query.split_once('=') {
                    Some(("branch", b)) => GitReference::Branch(b.to_owned()),
                    Some(("tag", t)) => GitReference::Tag(t.to_owned()),
                    Some(("rev", r)) => GitReference::Rev(r.to_owned()),
                    _ => return Err(invalid(s, format!("unknown git query `{query}`"))),
                };
                (url, reference)
            }
        };
        if url.is_empty() {
            return Err(invalid(s, "empty git url"));
        }
        let source = SourceKind::Git {
            url: url.to_owned(),
            reference,
        };
        return Ok((source, revision));
    }
    if let Some(rel) = s.strip_prefix("path+") {
        let path = normalize_path(&root.join(rel));
        return Ok((SourceKind::Local(path), None));
    }
    Err(invalid(s, "unknown source kind"))
}

fn node_sort_key(node: &Node, root: &Path) -> (PackageName, Version, String) {
    (
        node.id.name.clone(),
        node.id.version.clone(),
        encode_source(&node.id.source, node.revision.as_deref(), root),
    )
}

pub fn to_json(graph: &LockedGraph, root: &Path) -> LockFileJson {
    // name + version pairs that occur with more than one source need the
    // source spelled out in dependency references
    let mut seen: HashMap<(&PackageName, &Version), usize> = HashMap::new();
    for id in graph.ids() {
        *seen.entry((&id.name, &id.version)).or_default() += 1;
    }
    let dep_ref = |target: &PackageId| {
        let ambiguous = seen.get(&(&target.name, &target.version)).copied() > Some(1);
        if ambiguous {
            let revision = graph.get(target).and_then(|n| n.revision.as_deref());
            format!(
                "{} {} ({})",
                target.name,
                target.version,
                encode_source(&target.source, revision, root)
            )
        } else {
            format!("{} {}", target.name, target.version)
        }
    };

    let mut nodes: Vec<&Node> = graph.nodes().collect();
    nodes.sort_by_cached_key(|n| node_sort_key(n, root));
    let packages = nodes
        .into_iter()
        .map(|node| {
            let deps: BTreeSet<String> = node.edges.iter().map(|e| dep_ref(&e.target)).collect();
            LockedPackageJson {
                name: node.id.name.to_string(),
                version: node.id.version.to_string(),
                source: encode_source(&node.id.source, node.revision.as_deref(), root),
                checksum: node.checksum.clone(),
                dependencies: deps.into_iter().collect(),
            }
        })
        .collect();
    LockFileJson {
        version: graph.version(),
        packages,
    }
}

fn parse_dep_ref(s: &str) -> Option<(&str, &str, Option<&str>)> {
    let (name, rest) = s.split_once(' ')?;
    match rest.split_once(' ') {
        None => Some((name, rest, None)),
        Some((version, source)) => {
            let source = source.strip_prefix('(')?.strip_suffix(')')?;
            Some((name, version, Some(source)))
        }
    }
}

pub fn from_json(json: LockFileJson, root: &Path) -> Result<LockedGraph, LockFileError> {
    if json.version != LOCK_FORMAT_VERSION {
        return Err(LockFileError::UnsupportedVersion(json.version));
    }

    let mut parsed = Vec::with_capacity(json.packages.len());
    for p in &json.packages {
        let entry = format!("{} {}", p.name, p.version);
        let name: PackageName = p.name.parse().map_err(|e: String| invalid(&entry, e))?;
        let version = Version::parse(&p.version).map_err(|e| invalid(&entry, e.to_string()))?;
        let (source, revision) = decode_source(&p.source, root)?;
        if source.is_git() && revision.is_none() {
            return Err(invalid(&entry, "git packages must record a revision"));
        }
        let mut node = Node::new(PackageId::new(name, version, source));
        node.revision = revision;
        node.checksum = p.checksum.clone();
        parsed.push(node);
    }

    let mut by_name_version: HashMap<(String, String), Vec<usize>> = HashMap::new();
    for (i, node) in parsed.iter().enumerate() {
        by_name_version
            .entry((node.id.name.to_string(), node.id.version.to_string()))
            .or_default()
            .push(i);
    }

    let mut edges_of = Vec::with_capacity(parsed.len());
    for (p, node) in json.packages.iter().zip(&parsed) {
        let mut edges = Vec::new();
        for dep in &p.dependencies {
            let unknown = || LockFileError::UnknownDependency {
                from: node.id.to_string(),
                dep: dep.clone(),
            };
            let (name, version, source) = parse_dep_ref(dep)
                .ok_or_else(|| invalid(dep, "expected `name version [(source)]`"))?;
            let candidates = by_name_version
                .get(&(name.to_owned(), version.to_owned()))
                .ok_or_else(unknown)?;
            let target = match source {
                None if candidates.len() == 1 => &parsed[candidates[0]],
                None => return Err(invalid(dep, "ambiguous dependency, source required")),
                Some(source) => {
                    let (kind, revision) = decode_source(source, root)?;
                    candidates
                        .iter()
                        .map(|&i| &parsed[i])
                        .find(|n| n.id.source == kind && (revision.is_none() || n.revision == revision))
                        .ok_or_else(unknown)?
                }
            };
            edges.push(Edge {
                requirement: Requirement::new(
                    target.id.name.clone(),
                    as_exact_version_req(target.id.version.clone()),
                    target.id.source.clone(),
                    DepKind::Normal,
                ),
                target: target.id.clone(),
            });
        }
        edges_of.push(edges);
    }

    Ok(LockedGraph::from_nodes(
        parsed.into_iter().zip(edges_of).map(|(mut node, edges)| {
            node.edges = edges;
            node
        }),
    ))
}

/// Serializes a graph. Equal graphs always render to identical bytes.
pub fn render(graph: &LockedGraph, root: &Path) -> Result<String, LockFileError> {
    let json = to_json(graph, root);
    let mut s = serde_json::to_string_pretty(&json).map_err(LockFileError::Serialize)?;
    s.push('\n');
    Ok(s)
}

pub fn parse(s: &str, root: &Path) -> Result<LockedGraph, LockFileError> {
    let json: LockFileJson = serde_json_lenient::from_str(s)?;
    from_json(json, root)
}

/// Reads the lock file at `path`, `Ok(None)` if there is none.
pub fn read_lock_file(path: &Path, root: &Path) -> Result<Option<LockedGraph>, LockFileError> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LockFileError::Io {
                path: path.to_owned(),
                source,
            });
        }
    };
    parse(&s, root).map(Some)
}

/// Replaces `path` with `contents` by writing a sibling temp file and
/// renaming it over. Returns `false` without writing if the file already has
/// exactly these contents.
pub fn write_atomic(path: &Path, contents: &str) -> std::io::Result<bool> {
    if let Ok(existing) = std::fs::read(path) {
        if existing == contents.as_bytes() {
            return Ok(false);
        }
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(true)
}
