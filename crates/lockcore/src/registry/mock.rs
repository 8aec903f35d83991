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
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, HashSet},
    rc::Rc,
};

use lockutil::{
    dependency::{DepKind, Requirement},
    package::{PackageId, PackageName, SourceKind},
};
use semver::{Version, VersionReq};

use super::Registry;
use crate::source::Summary;

pub struct MockRegistry {
    packages: HashMap<PackageName, Rc<BTreeMap<Version, Rc<Summary>>>>,
    materialized: HashSet<PackageId>,
    registry: Option<String>,
    pub calls: Cell<usize>,
    log: RefCell<Vec<PackageName>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        MockRegistry {
            packages: HashMap::new(),
            materialized: HashSet::new(),
            registry: None,
            calls: Cell::new(0),
            log: RefCell::new(Vec::new()),
        }
    }

    pub fn named(registry: &str) -> Self {
        MockRegistry {
            registry: Some(registry.to_owned()),
            ..Self::new()
        }
    }

    /// Add a package to the mock registry. Only available while the mock
    /// registry is not shared, since modifying a [`Rc`] is only possible when
    /// it is not.
    pub fn add_package(&mut self, summary: Summary) -> &mut Self {
        let entry = self.packages.entry(summary.id.name.clone()).or_default();
        Rc::get_mut(entry)
            .expect("This mock registry is already shared")
            .insert(summary.id.version.clone(), Rc::new(summary));
        self
    }

    pub fn add_package_full<'a>(
        &mut self,
        name: &'a str,
        version: &'a str,
        deps: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> &mut Self {
        let summary = create_mock_summary(self.registry.clone(), name, version, deps);
        self.add_package(summary)
    }

    pub fn yank(&mut self, name: &str, version: &str) -> &mut Self {
        let name: PackageName = name.parse().unwrap();
        let version = Version::parse(version).unwrap();
        let entry = self.packages.get_mut(&name).unwrap();
        let versions = Rc::get_mut(entry).expect("This mock registry is already shared");
        let summary = versions.get_mut(&version).unwrap();
        Rc::get_mut(summary).unwrap().yanked = true;
        self
    }

    /// Marks a version as present in the archive cache.
    pub fn materialize(&mut self, name: &str, version: &str) -> &mut Self {
        let id = PackageId::new(
            name.parse().unwrap(),
            Version::parse(version).unwrap(),
            SourceKind::Registry(self.registry.clone()),
        );
        self.materialized.insert(id);
        self
    }

    /// Names queried so far, in order.
    pub fn queried(&self) -> Vec<PackageName> {
        self.log.borrow().clone()
    }
}

pub fn create_mock_summary<'a>(
    registry: Option<String>,
    name: &'a str,
    version: &'a str,
    deps: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Summary {
    let source = SourceKind::Registry(registry);
    Summary {
        id: PackageId::new(
            name.parse().unwrap(),
            Version::parse(version).unwrap(),
            source.clone(),
        ),
        revision: None,
        requirements: deps
            .into_iter()
            .map(|(name, req)| {
                Requirement::new(
                    name.parse().unwrap(),
                    VersionReq::parse(req).unwrap(),
                    source.clone(),
                    DepKind::Normal,
                )
            })
            .collect(),
        checksum: None,
        yanked: false,
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for MockRegistry {
    fn all_versions_of(
        &self,
        name: &PackageName,
    ) -> anyhow::Result<Rc<BTreeMap<Version, Rc<Summary>>>> {
        self.calls.set(self.calls.get() + 1);
        self.log.borrow_mut().push(name.clone());
        Ok(self.packages.get(name).cloned().unwrap_or_default())
    }

    fn is_materialized(&self, summary: &Summary) -> bool {
        self.materialized.contains(&summary.id)
    }
}

/// Lets a test keep a handle on a registry after handing it to a
/// [`RegistryList`](super::RegistryList).
impl<R: Registry> Registry for Rc<R> {
    fn all_versions_of(
        &self,
        name: &PackageName,
    ) -> anyhow::Result<Rc<BTreeMap<Version, Rc<Summary>>>> {
        (**self).all_versions_of(name)
    }

    fn is_materialized(&self, summary: &Summary) -> bool {
        (**self).is_materialized(summary)
    }
}
