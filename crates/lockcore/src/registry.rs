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

pub mod fetch;
pub mod index;
#[cfg(test)]
pub mod mock;

use std::{
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

pub use index::*;
use lockutil::{config::Settings, lockstep_dir::LockstepHome, package::PackageName};
use semver::Version;

use crate::source::Summary;

pub trait Registry {
    /// Get all versions of a package.
    fn all_versions_of(&self, name: &PackageName)
    -> anyhow::Result<Rc<BTreeMap<Version, Rc<Summary>>>>;

    fn get_package_version(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> anyhow::Result<Option<Rc<Summary>>> {
        let all_versions = self.all_versions_of(name)?;
        Ok(all_versions.get(version).cloned())
    }

    /// Whether the archive of this version is in the local cache, so it can
    /// be used without the network.
    fn is_materialized(&self, summary: &Summary) -> bool;
}

pub struct RegistryList {
    default_registry: String,
    registries: HashMap<String, Box<dyn Registry>>,
}

impl RegistryList {
    /// The default registry and every `registries.<name>.url` of `settings`,
    /// all read from the index cache under `home`.
    pub fn from_settings(home: &LockstepHome, settings: &Settings) -> Self {
        let mut list = Self::with_registry(Box::new(IndexRegistry::new(home, None)));
        for name in settings.registries.keys() {
            list.add_registry(
                name,
                Box::new(IndexRegistry::new(home, Some(name.clone()))),
            );
        }
        list
    }

    pub fn with_registry(registry: Box<dyn Registry>) -> Self {
        let mut registries = HashMap::new();
        let default_registry_name = "default";
        registries.insert(default_registry_name.to_owned(), registry);

        Self {
            registries,
            default_registry: default_registry_name.into(),
        }
    }

    pub fn add_registry(&mut self, name: &str, registry: Box<dyn Registry>) {
        self.registries.insert(name.to_owned(), registry);
    }

    pub fn get_registry(&self, name: Option<&str>) -> Option<&dyn Registry> {
        self.registries
            .get(name.unwrap_or(&self.default_registry))
            .map(|refbox| &**refbox)
    }
}
