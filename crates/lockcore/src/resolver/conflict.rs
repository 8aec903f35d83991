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

use lockutil::{dependency::Requirement, package::PackageId};

/// Why a requirement could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// No version of the package satisfies the requirement.
    NoCandidates,
    /// Nothing that satisfies the requirement is cached, and the network is
    /// disabled.
    Offline,
    /// The package is held at its previously locked versions, none of which
    /// satisfies the requirement.
    Pinned { locked: Vec<PackageId> },
    /// A semver-compatible version is already selected and does not satisfy
    /// the requirement.
    Activated {
        existing: PackageId,
        path: Vec<PackageId>,
    },
}

/// A failed requirement, with the packages that led to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictChain {
    pub requirement: Requirement,
    /// From a workspace member down to the package declaring `requirement`.
    pub path: Vec<PackageId>,
    pub reason: ConflictReason,
}

fn write_path(f: &mut std::fmt::Formatter<'_>, path: &[PackageId]) -> std::fmt::Result {
    for (i, id) in path.iter().rev().enumerate() {
        if i == 0 {
            write!(f, "\n    required by package `{id}`")?;
        } else {
            write!(f, "\n    ... which is required by package `{id}`")?;
        }
    }
    Ok(())
}

impl std::fmt::Display for ConflictChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let req = &self.requirement;
        match &self.reason {
            ConflictReason::NoCandidates | ConflictReason::Offline => {
                write!(f, "failed to select a version for the requirement `{req}`")?;
            }
            ConflictReason::Pinned { .. } | ConflictReason::Activated { .. } => {
                write!(f, "failed to select a version for `{}`", req.name)?;
            }
        }
        write_path(f, &self.path)?;
        match &self.reason {
            ConflictReason::NoCandidates => {
                write!(f, "\nno version of `{}` matches `{}`", req.name, req.version_req)
            }
            ConflictReason::Offline => write!(
                f,
                "\nno matching version is cached and the network is disabled"
            ),
            ConflictReason::Pinned { locked } => {
                let locked: Vec<String> = locked.iter().map(|id| id.to_string()).collect();
                write!(
                    f,
                    "\nthe requirement `{req}` cannot be met by the locked {}",
                    locked.join(", ")
                )
            }
            ConflictReason::Activated { existing, path } => {
                write!(
                    f,
                    "\nthe requirement `{req}` conflicts with the previously selected `{existing}`"
                )?;
                write_path(f, path)
            }
        }
    }
}
