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

//! Package names, sources and identities.

use std::{path::PathBuf, str::FromStr};

use semver::Version;
use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName {
    pub scope: String,
    pub name: String,
}

impl PackageName {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        PackageName {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Debug for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.scope.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.scope, self.name)
        }
    }
}

fn check_name_part(part: &str, whole: &str) -> Result<(), String> {
    if part.is_empty() {
        return Err(format!("empty segment in package name `{whole}`"));
    }
    if let Some(c) = part
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '@' | '#' | ':' | '/' | '\\'))
    {
        return Err(format!("invalid character `{c}` in package name `{whole}`"));
    }
    Ok(())
}

impl FromStr for PackageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((scope, name)) => {
                check_name_part(scope, s)?;
                check_name_part(name, s)?;
                Ok(PackageName::new(scope, name))
            }
            None => {
                check_name_part(s, s)?;
                Ok(PackageName::new("", s))
            }
        }
    }
}

/// Which commit of a git repository a dependency follows.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GitReference {
    #[default]
    DefaultBranch,
    Branch(String),
    Tag(String),
    Rev(String),
}

impl GitReference {
    /// The string handed to `git fetch`/`git rev-parse`, if any.
    pub fn as_refspec(&self) -> Option<&str> {
        match self {
            GitReference::DefaultBranch => None,
            GitReference::Branch(s) | GitReference::Tag(s) | GitReference::Rev(s) => Some(s),
        }
    }
}

impl std::fmt::Display for GitReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitReference::DefaultBranch => write!(f, "default branch"),
            GitReference::Branch(b) => write!(f, "branch {b}"),
            GitReference::Tag(t) => write!(f, "tag {t}"),
            GitReference::Rev(r) => write!(f, "rev {r}"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// Package comes from some registry. `None` is the default registry.
    Registry(Option<String>),
    /// Package comes from a git repository.
    Git { url: String, reference: GitReference },
    /// Package comes from a local path. The path must be absolute.
    Local(PathBuf),
}

impl Default for SourceKind {
    fn default() -> Self {
        SourceKind::Registry(None)
    }
}

impl SourceKind {
    pub fn is_default(&self) -> bool {
        matches!(self, SourceKind::Registry(None))
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, SourceKind::Registry(_))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SourceKind::Local(_))
    }

    pub fn is_git(&self) -> bool {
        matches!(self, SourceKind::Git { .. })
    }

    pub fn registry_name(&self) -> Option<Option<&str>> {
        match self {
            SourceKind::Registry(name) => Some(name.as_deref()),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Registry(None) => write!(f, "default registry"),
            SourceKind::Registry(Some(name)) => write!(f, "registry {name}"),
            SourceKind::Local(path) => write!(f, "path {}", path.display()),
            SourceKind::Git {
                url,
                reference: GitReference::DefaultBranch,
            } => write!(f, "git {url}"),
            SourceKind::Git { url, reference } => write!(f, "git {url}, {reference}"),
        }
    }
}

/// The identity of a resolved package: one version from one source.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    pub name: PackageName,
    pub version: Version,
    pub source: SourceKind,
}

/// A package name together with its source. Lock entries, update targets and
/// resolver activations are all grouped by key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageKey {
    pub name: PackageName,
    pub source: SourceKind,
}

impl std::fmt::Display for PackageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.source.is_default() {
            write!(f, " ({})", self.source)?;
        }
        Ok(())
    }
}

impl PackageId {
    pub fn new(name: PackageName, version: Version, source: SourceKind) -> Self {
        PackageId {
            name,
            version,
            source,
        }
    }

    pub fn from_registry(name: PackageName, version: Version) -> Self {
        PackageId::new(name, version, SourceKind::Registry(None))
    }

    pub fn key(&self) -> PackageKey {
        PackageKey {
            name: self.name.clone(),
            source: self.source.clone(),
        }
    }

    pub fn is_key(&self, key: &PackageKey) -> bool {
        self.name == key.name && self.source == key.source
    }

    /// `name@version (source)`, including the source even for the default
    /// registry.
    pub fn full(&self) -> String {
        format!("{}@{} ({})", self.name, self.version, self.source)
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)?;
        if !self.source.is_default() {
            write!(f, " ({})", self.source)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl FromStr for PackageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s.split_once('@').ok_or("missing version")?;
        let version = Version::parse(version).map_err(|e| e.to_string())?;
        Ok(PackageId::from_registry(name.parse()?, version))
    }
}

/// The version given to packages whose manifest does not declare one.
pub static DEFAULT_VERSION: Version = Version::new(0, 0, 0);
