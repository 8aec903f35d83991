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

use semver::{Comparator, Op, Version, VersionReq};

/// Converts a version into a semver comparator
pub fn as_comparator(version: Version, op: Op) -> Comparator {
    Comparator {
        op,
        major: version.major,
        minor: Some(version.minor),
        patch: Some(version.patch),
        pre: version.pre,
    }
}

/// Converts a version into a caret version requirement
pub fn as_caret_version_req(version: Version) -> VersionReq {
    VersionReq {
        comparators: vec![as_comparator(version, Op::Caret)],
    }
}

/// Converts a version into an `=version` requirement. Edges loaded from a
/// lock file carry these.
pub fn as_exact_version_req(version: Version) -> VersionReq {
    VersionReq {
        comparators: vec![as_comparator(version, Op::Exact)],
    }
}

/// The semver-compatibility bucket of a version: `1.x.y` and `1.z.w` share a
/// bucket, `0.2.x` and `0.3.x` do not, and every `0.0.x` is its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemverCompat {
    Major(u64),
    Minor(u64),
    Patch(u64),
}

impl From<&Version> for SemverCompat {
    fn from(v: &Version) -> Self {
        if v.major != 0 {
            SemverCompat::Major(v.major)
        } else if v.minor != 0 {
            SemverCompat::Minor(v.minor)
        } else {
            SemverCompat::Patch(v.patch)
        }
    }
}

impl std::fmt::Display for SemverCompat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SemverCompat::Major(m) => write!(f, "{m}.x"),
            SemverCompat::Minor(m) => write!(f, "0.{m}.x"),
            SemverCompat::Patch(p) => write!(f, "0.0.{p}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn compat(s: &str) -> SemverCompat {
        SemverCompat::from(&Version::parse(s).unwrap())
    }

    #[test]
    fn test_compat_buckets() {
        assert_eq!(compat("1.2.3"), compat("1.9.0"));
        assert_ne!(compat("1.2.3"), compat("2.0.0"));
        assert_eq!(compat("0.2.1"), compat("0.2.9"));
        assert_ne!(compat("0.2.1"), compat("0.3.0"));
        assert_ne!(compat("0.0.1"), compat("0.0.2"));
        assert_eq!(compat("0.3.1").to_string(), "0.3.x");
    }

    #[test]
    fn test_exact_req() {
        let req = as_exact_version_req(Version::parse("1.2.3").unwrap());
        assert_eq!(req.to_string(), "=1.2.3");
        assert!(req.matches(&Version::parse("1.2.3").unwrap()));
        assert!(!req.matches(&Version::parse("1.2.4").unwrap()));
    }
}
