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

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::common::{LOCK_FILE, MANIFEST_FILE};

#[derive(Debug, clap::Parser, Serialize, Deserialize, Clone, Default)]
pub struct ManifestDirs {
    /// Run as if started in this directory
    #[arg(long = "directory", global = true, short = 'C')]
    pub directory: Option<PathBuf>,

    /// Path to the root `lockstep.mod.json`. Defaults to the nearest one in
    /// the current directory or its ancestors.
    #[clap(long, global = true)]
    pub manifest_path: Option<PathBuf>,
}

impl ManifestDirs {
    pub fn try_into_workspace_dirs(&self) -> anyhow::Result<WorkspaceDirs> {
        WorkspaceDirs::try_from(self)
    }
}

/// Where the workspace lives and where its lock file goes.
#[derive(Debug, Clone)]
pub struct WorkspaceDirs {
    pub root_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub lock_path: PathBuf,
}

impl WorkspaceDirs {
    pub fn from_root(root_dir: PathBuf) -> Self {
        WorkspaceDirs {
            manifest_path: root_dir.join(MANIFEST_FILE),
            lock_path: root_dir.join(LOCK_FILE),
            root_dir,
        }
    }
}

pub fn check_manifest_exists(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).exists()
}

fn find_ancestor_with_manifest(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .find(|dir| check_manifest_exists(dir))
        .map(|p| p.to_path_buf())
}

impl TryFrom<&ManifestDirs> for WorkspaceDirs {
    type Error = anyhow::Error;

    fn try_from(matches: &ManifestDirs) -> Result<Self, Self::Error> {
        let cwd = match matches.directory.clone() {
            Some(v) => v,
            None => std::env::current_dir().context("failed to get current directory")?,
        };
        let cwd = dunce::canonicalize(&cwd)
            .with_context(|| format!("failed to enter directory {}", cwd.display()))?;

        if let Some(manifest) = &matches.manifest_path {
            let manifest = cwd.join(manifest);
            if manifest.file_name().and_then(|n| n.to_str()) != Some(MANIFEST_FILE) {
                anyhow::bail!(
                    "the manifest path must point to a `{}` file, got {}",
                    MANIFEST_FILE,
                    manifest.display()
                );
            }
            let manifest = dunce::canonicalize(&manifest)
                .with_context(|| format!("manifest {} does not exist", manifest.display()))?;
            let root = manifest
                .parent()
                .map(Path::to_path_buf)
                .context("manifest path has no parent directory")?;
            return Ok(WorkspaceDirs::from_root(root));
        }

        let root = find_ancestor_with_manifest(&cwd).ok_or_else(|| {
            anyhow::anyhow!(
                "could not find a {} file in the current directory or its ancestors",
                MANIFEST_FILE
            )
        })?;
        Ok(WorkspaceDirs::from_root(root))
    }
}
