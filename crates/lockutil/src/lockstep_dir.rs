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

//! Layout of the lockstep home directory (`$LOCKSTEP_HOME`, else `~/.lockstep`).

use std::path::{Path, PathBuf};

use crate::package::{PackageName, SourceKind};

pub const HOME_ENV: &str = "LOCKSTEP_HOME";

/// Name of the directory used for the default registry.
pub const DEFAULT_REGISTRY_DIR: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockstepHome {
    root: PathBuf,
}

impl LockstepHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LockstepHome { root: root.into() }
    }

    /// Reads `LOCKSTEP_HOME`, falling back to `~/.lockstep`.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Ok(h) = std::env::var(HOME_ENV) {
            return Ok(Self::new(h));
        }
        let h = home::home_dir()
            .ok_or_else(|| anyhow::anyhow!("failed to get home directory"))?;
        Ok(Self::new(h.join(".lockstep")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_json(&self) -> PathBuf {
        self.root.join("config.json")
    }

    fn registry_dir_name(registry: Option<&str>) -> &str {
        registry.unwrap_or(DEFAULT_REGISTRY_DIR)
    }

    pub fn index_dir(&self, registry: Option<&str>) -> PathBuf {
        self.root
            .join("registry")
            .join("index")
            .join(Self::registry_dir_name(registry))
    }

    /// `<home>/registry/index/<registry>/<scope>/<name>.index`
    pub fn index_file(&self, registry: Option<&str>, name: &PackageName) -> PathBuf {
        index_file_in(&self.index_dir(registry), name)
    }

    pub fn cache_dir(&self, registry: Option<&str>) -> PathBuf {
        let cache = self.root.join("registry").join("cache");
        match registry {
            None => cache,
            // scopes never contain `@`
            Some(r) => cache.join(format!("@{r}")),
        }
    }

    /// `<home>/registry/cache/<scope>/<name>/<version>.zip`
    pub fn cache_file(
        &self,
        registry: Option<&str>,
        name: &PackageName,
        version: &semver::Version,
    ) -> PathBuf {
        let mut p = self.cache_dir(registry);
        if !name.scope.is_empty() {
            p.push(&name.scope);
        }
        p.join(&name.name).join(format!("{version}.zip"))
    }

    /// Guard for mutations of the registry index and cache.
    pub fn registry_lock(&self) -> PathBuf {
        self.root.join("registry").join(".lock")
    }

    pub fn git_db_dir(&self) -> PathBuf {
        self.root.join("git").join("db")
    }

    /// Index directory for a registry source, `None` for other sources.
    pub fn index_dir_of(&self, source: &SourceKind) -> Option<PathBuf> {
        source.registry_name().map(|r| self.index_dir(r))
    }
}

/// Get the path of the index file of a package inside an index directory.
pub fn index_file_in(base: &Path, name: &PackageName) -> PathBuf {
    let mut p = base.to_path_buf();
    if !name.scope.is_empty() {
        p.push(&name.scope);
    }
    p.join(format!("{}.index", name.name))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_layout() {
        let h = LockstepHome::new("/h");
        let name: PackageName = "dep/one".parse().unwrap();
        assert_eq!(
            h.index_file(None, &name),
            PathBuf::from("/h/registry/index/default/dep/one.index")
        );
        assert_eq!(
            h.index_file(Some("alt"), &"bare".parse().unwrap()),
            PathBuf::from("/h/registry/index/alt/bare.index")
        );
        assert_eq!(
            h.cache_file(None, &name, &semver::Version::new(1, 2, 0)),
            PathBuf::from("/h/registry/cache/dep/one/1.2.0.zip")
        );
    }
}
