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

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{
    common::MANIFEST_FILE,
    dependency::{DepKind, DependencyInfo, DependencyInfoJson},
    package::PackageName,
};

/// A parsed `lockstep.mod.json`, or one line of a registry index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub name: PackageName,
    pub version: Option<Version>,
    pub deps: IndexMap<PackageName, DependencyInfo>,
    pub build_deps: IndexMap<PackageName, DependencyInfo>,
    pub dev_deps: IndexMap<PackageName, DependencyInfo>,
    /// Workspace member directories, relative to this manifest.
    pub workspace: Vec<String>,
    /// Only meaningful for registry index entries.
    pub checksum: Option<String>,
    pub yanked: bool,
}

impl Manifest {
    /// Every declared dependency with the table it came from, in declaration
    /// order: normal, then build, then dev.
    pub fn all_deps(&self) -> impl Iterator<Item = (&PackageName, &DependencyInfo, DepKind)> {
        let normal = self.deps.iter().map(|(n, d)| (n, d, DepKind::Normal));
        let build = self.build_deps.iter().map(|(n, d)| (n, d, DepKind::Build));
        let dev = self.dev_deps.iter().map(|(n, d)| (n, d, DepKind::Dev));
        normal.chain(build).chain(dev)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestJson {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<IndexMap<String, DependencyInfoJson>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_deps: Option<IndexMap<String, DependencyInfoJson>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_deps: Option<IndexMap<String, DependencyInfoJson>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub yanked: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to load manifest `{}`", path.display())]
pub struct ManifestError {
    pub path: Box<Path>,
    #[source]
    pub kind: ManifestErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestErrorKind {
    #[error("I/O error")]
    IO(#[from] std::io::Error),
    #[error("parse error")]
    Parse(#[from] serde_json_lenient::Error),
    #[error("`name` bad format: {0}")]
    Name(String),
    #[error("`version` bad format")]
    Version(#[from] semver::Error),
    #[error("dependency `{dep}` bad format: {reason}")]
    Dependency { dep: String, reason: String },
}

fn convert_deps(
    deps: Option<IndexMap<String, DependencyInfoJson>>,
) -> Result<IndexMap<PackageName, DependencyInfo>, ManifestErrorKind> {
    let mut res = IndexMap::new();
    for (name, info) in deps.into_iter().flatten() {
        let parsed: PackageName = name
            .parse()
            .map_err(|reason| ManifestErrorKind::Dependency {
                dep: name.clone(),
                reason,
            })?;
        let info: DependencyInfo = info.into();
        if info.path.is_some() && info.git.is_some() {
            return Err(ManifestErrorKind::Dependency {
                dep: name,
                reason: "`path` and `git` cannot both be specified".into(),
            });
        }
        if info.git.is_some() || info.branch.is_some() || info.tag.is_some() || info.rev.is_some()
        {
            info.git_reference()
                .map_err(|reason| ManifestErrorKind::Dependency {
                    dep: name.clone(),
                    reason,
                })?;
        }
        res.insert(parsed, info);
    }
    Ok(res)
}

impl TryFrom<ManifestJson> for Manifest {
    type Error = ManifestErrorKind;

    fn try_from(j: ManifestJson) -> Result<Self, Self::Error> {
        if j.name.is_empty() {
            return Err(ManifestErrorKind::Name("empty name".into()));
        }
        let name = j.name.parse().map_err(ManifestErrorKind::Name)?;
        let version = j.version.as_deref().map(Version::parse).transpose()?;

        Ok(Manifest {
            name,
            version,
            deps: convert_deps(j.deps)?,
            build_deps: convert_deps(j.build_deps)?,
            dev_deps: convert_deps(j.dev_deps)?,
            workspace: j.workspace.unwrap_or_default(),
            checksum: j.checksum,
            yanked: j.yanked,
        })
    }
}

/// Parses a manifest from a string, such as a registry index line or the
/// output of `git show`.
pub fn parse_manifest_str(s: &str) -> Result<Manifest, ManifestErrorKind> {
    let j: ManifestJson = serde_json_lenient::from_str(s)?;
    j.try_into()
}

pub fn read_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let err = |kind| ManifestError {
        path: path.into(),
        kind,
    };
    let file = File::open(path).map_err(|e| err(ManifestErrorKind::IO(e)))?;
    let reader = BufReader::new(file);
    let j: ManifestJson =
        serde_json_lenient::from_reader(reader).map_err(|e| err(ManifestErrorKind::Parse(e)))?;
    j.try_into().map_err(err)
}

pub fn manifest_path_in(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

pub fn read_manifest_in_dir(dir: &Path) -> Result<Manifest, ManifestError> {
    read_manifest(&manifest_path_in(dir))
}
