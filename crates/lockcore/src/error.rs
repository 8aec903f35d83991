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

use std::path::PathBuf;

use lockutil::{
    dependency::Requirement, lockfile::LockFileError, manifest::ManifestError, package::PackageId,
};
use thiserror::Error;

use crate::{git::GitError, registry::fetch::FetchError, resolver::conflict::ConflictChain};

/// Any error that aborts an update. None of them leave a partially written
/// lock file behind.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("package ID specification `{0}` did not match any packages")]
    SpecifierNotFound(String),

    #[error(
        "package ID specification `{spec}` is ambiguous, it matches:\n{}",
        matches.iter().map(|id| format!("  {}", id.full())).collect::<Vec<_>>().join("\n")
    )]
    AmbiguousSpecifier {
        spec: String,
        matches: Vec<PackageId>,
    },

    #[error("cyclic package dependency: {}", path.join(" -> "))]
    StructuralCycle { path: Vec<String> },

    #[error("{0}")]
    VersionConflict(Box<ConflictChain>),

    #[error("no cached version of `{requirement}` is available while offline")]
    OfflineNoCandidate { requirement: Requirement },

    #[error("cannot update to `{id}`: {reason}")]
    ExactVersionUnavailable { id: String, reason: String },

    #[error("revision `{revision}` of `{url}` cannot be resolved")]
    InvalidGitRevision {
        url: String,
        revision: String,
        #[source]
        source: GitError,
    },

    #[error("{0}")]
    ConflictingFlags(String),

    #[error("the lock file needs to be updated but --locked was passed to prevent this: {reason}")]
    LockOutOfDate { reason: String },

    #[error("failed to update the registry index")]
    NetworkUnavailable(#[source] FetchError),

    #[error("failed to write `{}`", path.display())]
    PersistIoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to load the previous lock file")]
    LockFile(#[from] LockFileError),

    #[error(transparent)]
    Source(#[from] anyhow::Error),

    #[error("interrupted")]
    Interrupted,
}
