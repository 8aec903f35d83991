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
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    io::BufRead,
    path::{Path, PathBuf},
    rc::Rc,
};

use lockutil::{
    lockstep_dir::{LockstepHome, index_file_in},
    manifest::parse_manifest_str,
    package::{PackageName, SourceKind},
};
use semver::Version;

use crate::source::Summary;

/// A registry read from its JSON-lines index cache,
/// `<home>/registry/index/<registry>/<scope>/<name>.index`.
pub struct IndexRegistry {
    registry: Option<String>,
    index: PathBuf,
    home: LockstepHome,
    #[allow(clippy::type_complexity)]
    cache: RefCell<HashMap<PackageName, Rc<BTreeMap<Version, Rc<Summary>>>>>,
}

impl IndexRegistry {
    pub fn new(home: &LockstepHome, registry: Option<String>) -> Self {
        IndexRegistry {
            index: home.index_dir(registry.as_deref()),
            registry,
            home: home.clone(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn index_file_of(&self, name: &PackageName) -> PathBuf {
        index_file_in(&self.index, name)
    }

    fn parse_line(&self, line: &str) -> Result<Summary, String> {
        let manifest = parse_manifest_str(line).map_err(|e| e.to_string())?;
        if manifest.version.is_none() {
            return Err("missing `version`".into());
        }
        Summary::from_manifest(
            &manifest,
            SourceKind::Registry(self.registry.clone()),
            None,
            None,
        )
        .map_err(|e| e.to_string())
    }
}

impl super::Registry for IndexRegistry {
    fn all_versions_of(
        &self,
        name: &PackageName,
    ) -> anyhow::Result<Rc<BTreeMap<Version, Rc<Summary>>>> {
        // check cache
        if let Some(v) = self.cache.borrow().get(name) {
            return Ok(v.clone());
        }

        let index_file = self.index_file_of(name);
        log::debug!("Reading versions of {} from {}", name, index_file.display());
        let mut res = BTreeMap::new();
        match std::fs::File::open(&index_file) {
            Ok(file) => {
                let reader = std::io::BufReader::new(file);
                for line in reader.lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let summary = match self.parse_line(&line) {
                        Ok(s) => s,
                        Err(e) => {
                            log::warn!("Error when reading index file of {}: {}", name, e);
                            continue;
                        }
                    };
                    if summary.id.name != *name {
                        log::warn!(
                            "Index file of {} contains an entry for {}, skipping it",
                            name,
                            summary.id.name
                        );
                        continue;
                    }
                    res.insert(summary.id.version.clone(), Rc::new(summary));
                }
            }
            // an unknown package simply has no versions
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // put in cache
        let res = Rc::new(res);
        self.cache.borrow_mut().insert(name.clone(), res.clone());

        Ok(res)
    }

    fn is_materialized(&self, summary: &Summary) -> bool {
        let file = self.home.cache_file(
            self.registry.as_deref(),
            &summary.id.name,
            &summary.id.version,
        );
        if !file.is_file() {
            return false;
        }
        match &summary.checksum {
            None => true,
            Some(expected) => match calc_sha2(&file) {
                Ok(actual) => actual == *expected,
                Err(e) => {
                    log::warn!("Failed to hash {}: {}", file.display(), e);
                    false
                }
            },
        }
    }
}

pub fn calc_sha2(p: &Path) -> anyhow::Result<String> {
    use sha2::{Digest, Sha256};
    use std::fs::File;
    use std::io::prelude::*;

    let mut file = File::open(p)?;

    let mut hasher = Sha256::new();
    let mut buffer = [0; 1024];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let result = hasher.finalize();
    Ok(format!("{:x}", result))
}
