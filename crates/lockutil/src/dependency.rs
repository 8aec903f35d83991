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

//! Dependency info requires a detour to support both string and structured formats

use std::str::FromStr;

use semver::VersionReq;
use serde::{Deserialize, Serialize, Serializer};

use crate::package::{GitReference, PackageName, SourceKind};

/// Information about a specific dependency
#[derive(Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DependencyInfo {
    #[serde(serialize_with = "serialize_version_req")]
    #[serde(default, skip_serializing_if = "version_is_default")]
    pub version: VersionReq,
    /// Local path to the dependency, relative to the dependant's directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Git repository URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Named registry. Absent means the default registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

fn version_is_default(version: &VersionReq) -> bool {
    version.comparators.is_empty()
}

impl std::fmt::Debug for DependencyInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_simple() {
            write!(f, "{}", self.version)
        } else {
            let mut d = f.debug_struct("DependencyInfo");
            d.field("version", &format_args!("{}", self.version));
            if let Some(path) = &self.path {
                d.field("path", path);
            }
            if let Some(git) = &self.git {
                d.field("git", git);
            }
            if let Some(registry) = &self.registry {
                d.field("registry", registry);
            }
            d.finish()
        }
    }
}

/// The JSON representation of a dependency info
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyInfoJson {
    /// A simple version requirement
    Simple(#[serde(serialize_with = "serialize_version_req")] VersionReq),
    /// A detailed dependency info
    Detailed(DependencyInfo),
}

impl DependencyInfo {
    /// Check if the requirement is simple. That is, it only contains a version requirement
    fn is_simple(&self) -> bool {
        self.path.is_none()
            && self.git.is_none()
            && self.branch.is_none()
            && self.tag.is_none()
            && self.rev.is_none()
            && self.registry.is_none()
    }

    pub fn from_simple(version: VersionReq) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    /// The git reference selected by `branch`, `tag` or `rev`. At most one of
    /// them may be present.
    pub fn git_reference(&self) -> Result<GitReference, String> {
        match (&self.branch, &self.tag, &self.rev) {
            (None, None, None) => Ok(GitReference::DefaultBranch),
            (Some(b), None, None) => Ok(GitReference::Branch(b.clone())),
            (None, Some(t), None) => Ok(GitReference::Tag(t.clone())),
            (None, None, Some(r)) => Ok(GitReference::Rev(r.clone())),
            _ => Err("only one of `branch`, `tag` and `rev` may be specified".into()),
        }
    }
}

impl From<DependencyInfo> for DependencyInfoJson {
    fn from(dep: DependencyInfo) -> Self {
        if dep.is_simple() {
            DependencyInfoJson::Simple(dep.version)
        } else {
            DependencyInfoJson::Detailed(dep)
        }
    }
}

impl From<DependencyInfoJson> for DependencyInfo {
    fn from(dep: DependencyInfoJson) -> Self {
        match dep {
            DependencyInfoJson::Simple(v) => DependencyInfo::from_simple(v),
            DependencyInfoJson::Detailed(d) => d,
        }
    }
}

fn serialize_version_req<S: Serializer>(v: &VersionReq, s: S) -> Result<S::Ok, S::Error> {
    if v.comparators.len() == 1 && v.comparators[0].op == semver::Op::Caret {
        // Format `^a.b.c` as `a.b.c`
        s.collect_str(&ComparatorFormatWrapper(&v.comparators[0]))
    } else {
        v.serialize(s)
    }
}

struct ComparatorFormatWrapper<'a>(&'a semver::Comparator);

impl std::fmt::Display for ComparatorFormatWrapper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.major)?;
        if let Some(minor) = &self.0.minor {
            write!(f, ".{}", minor)?;
            if let Some(patch) = &self.0.patch {
                write!(f, ".{}", patch)?;
                if !self.0.pre.is_empty() {
                    write!(f, "-{}", self.0.pre)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for DependencyInfo {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DependencyInfo::from_simple(VersionReq::parse(s)?))
    }
}

/// Which manifest table a dependency was declared in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DepKind {
    Normal,
    Build,
    Dev,
}

impl DepKind {
    /// Dev edges are allowed to form cycles.
    pub fn is_dev(self) -> bool {
        matches!(self, DepKind::Dev)
    }
}

/// A resolved-source dependency edge: which package, from where, and which
/// versions are acceptable.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub name: PackageName,
    pub version_req: VersionReq,
    pub source: SourceKind,
    pub kind: DepKind,
}

impl Requirement {
    pub fn new(name: PackageName, version_req: VersionReq, source: SourceKind, kind: DepKind) -> Self {
        Requirement {
            name,
            version_req,
            source,
            kind,
        }
    }

    pub fn matches(&self, id: &crate::package::PackageId) -> bool {
        self.name == id.name && self.source == id.source && self.version_req.matches(&id.version)
    }

    pub fn key(&self) -> crate::package::PackageKey {
        crate::package::PackageKey {
            name: self.name.clone(),
            source: self.source.clone(),
        }
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version_req)?;
        if !self.source.is_default() {
            write!(f, " ({})", self.source)?;
        }
        match self.kind {
            DepKind::Normal => Ok(()),
            DepKind::Build => write!(f, " [build]"),
            DepKind::Dev => write!(f, " [dev]"),
        }
    }
}

impl std::fmt::Debug for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use expect_test::expect;

    use super::*;

    #[test]
    fn test_simple_and_detailed() {
        let simple: DependencyInfoJson = serde_json_lenient::from_str(r#""0.1.2""#).unwrap();
        let simple: DependencyInfo = simple.into();
        expect!["^0.1.2"].assert_eq(&format!("{:?}", simple));

        let detailed: DependencyInfoJson =
            serde_json_lenient::from_str(r#"{ "git": "https://example.com/x.git", "tag": "v1" }"#)
                .unwrap();
        let detailed: DependencyInfo = detailed.into();
        assert_eq!(detailed.git_reference(), Ok(GitReference::Tag("v1".into())));

        let back = serde_json::to_string(&DependencyInfoJson::from(simple)).unwrap();
        expect![[r#""0.1.2""#]].assert_eq(&back);
    }

    #[test]
    fn test_conflicting_git_refs() {
        let dep = DependencyInfo {
            git: Some("https://example.com/x.git".into()),
            branch: Some("main".into()),
            rev: Some("abc".into()),
            ..Default::default()
        };
        assert!(dep.git_reference().is_err());
    }
}
