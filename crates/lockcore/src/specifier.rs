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

//! Package ID specifications given on the command line.
//!
//! Accepted forms: `name`, `name@ver`, `name:ver`, `<source>#name` and
//! `<source>#name@ver`. The version may be partial: `dep/one@1.2` matches
//! every `1.2.x`.

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use lockutil::{
    lockfile::normalize_path,
    package::{PackageId, PackageName, SourceKind},
};
use semver::Comparator;

use crate::error::UpdateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub name: PackageName,
    pub version: Option<Comparator>,
    pub source: Option<String>,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid package ID specification `{spec}`: {reason}")]
pub struct SpecifierParseError {
    pub spec: String,
    pub reason: String,
}

impl FromStr for Specifier {
    type Err = SpecifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: String| SpecifierParseError {
            spec: s.to_owned(),
            reason,
        };
        let (source, rest) = match s.rsplit_once('#') {
            Some(("", _)) => return Err(err("empty source".into())),
            Some((source, rest)) => (Some(source.to_owned()), rest),
            None => (None, s),
        };
        let (name, version) = match rest.find(['@', ':']) {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        let name: PackageName = name.parse().map_err(err)?;
        let version = version
            .map(|v| {
                if v.is_empty() || v.starts_with(|c: char| !c.is_ascii_digit()) {
                    return Err(err(format!("`{v}` is not a version")));
                }
                Comparator::parse(&format!("={v}")).map_err(|e| err(e.to_string()))
            })
            .transpose()?;
        Ok(Specifier {
            name,
            version,
            source,
            raw: s.to_owned(),
        })
    }
}

impl std::fmt::Display for Specifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn trim_url(url: &str) -> &str {
    url.trim_end_matches('/').trim_end_matches(".git")
}

/// Whether a source written on the command line names `source`. Registries
/// are named as in the lock file (`registry+alt`) or bare (`alt`), git
/// sources by url, path sources by path relative to `root`.
fn source_matches(spec: &str, source: &SourceKind, root: &Path) -> bool {
    match source {
        SourceKind::Registry(name) => {
            let spec = spec.strip_prefix("registry+").unwrap_or(spec);
            spec == name.as_deref().unwrap_or("default")
        }
        SourceKind::Git { url, .. } => {
            let spec = spec.strip_prefix("git+").unwrap_or(spec);
            trim_url(spec) == trim_url(url)
        }
        SourceKind::Local(path) => {
            let spec = spec
                .strip_prefix("path+")
                .or_else(|| spec.strip_prefix("file://"))
                .unwrap_or(spec);
            let spec = PathBuf::from(spec);
            let full = if spec.is_absolute() { spec } else { root.join(spec) };
            normalize_path(&full) == normalize_path(path)
        }
    }
}

impl Specifier {
    pub fn matches(&self, id: &PackageId, root: &Path) -> bool {
        id.name == self.name
            && self.version.as_ref().is_none_or(|v| v.matches(&id.version))
            && self
                .source
                .as_deref()
                .is_none_or(|s| source_matches(s, &id.source, root))
    }

    /// The one package of `universe` this specification names.
    pub fn query<'a>(
        &self,
        universe: impl IntoIterator<Item = &'a PackageId>,
        root: &Path,
    ) -> Result<&'a PackageId, UpdateError> {
        let mut matches: Vec<&PackageId> = universe
            .into_iter()
            .filter(|id| self.matches(id, root))
            .collect();
        matches.sort();
        matches.dedup();
        match matches.as_slice() {
            [] => Err(UpdateError::SpecifierNotFound(self.raw.clone())),
            [one] => Ok(one),
            _ => Err(UpdateError::AmbiguousSpecifier {
                spec: self.raw.clone(),
                matches: matches.into_iter().cloned().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use expect_test::expect;
    use lockutil::package::GitReference;
    use semver::Version;

    use super::*;

    fn universe() -> Vec<PackageId> {
        vec![
            "dep/one@1.2.0".parse().unwrap(),
            "dep/one@2.0.1".parse().unwrap(),
            "dep/two@0.3.1".parse().unwrap(),
            PackageId::new(
                "dep/two".parse().unwrap(),
                Version::new(0, 3, 1),
                SourceKind::Git {
                    url: "https://example.com/two.git".into(),
                    reference: GitReference::DefaultBranch,
                },
            ),
            PackageId::new(
                "app/util".parse().unwrap(),
                Version::new(0, 1, 0),
                SourceKind::Local(PathBuf::from("/ws/members/util")),
            ),
        ]
    }

    fn query(spec: &str) -> Result<String, String> {
        let u = universe();
        let spec: Specifier = spec.parse().map_err(|e: SpecifierParseError| e.to_string())?;
        spec.query(&u, Path::new("/ws"))
            .map(|id| id.full())
            .map_err(|e| e.to_string())
    }

    #[test]
    fn test_parse_forms() {
        let s: Specifier = "dep/one".parse().unwrap();
        assert_eq!(s.version, None);
        let s: Specifier = "dep/one@1.2".parse().unwrap();
        assert_eq!(s.version.unwrap().minor, Some(2));
        let s: Specifier = "dep/one:1".parse().unwrap();
        assert_eq!(s.version.unwrap().minor, None);
        let s: Specifier = "https://example.com/two.git#dep/two@0.3.1".parse().unwrap();
        assert_eq!(s.source.as_deref(), Some("https://example.com/two.git"));
        assert_eq!(s.name.to_string(), "dep/two");

        assert!("dep/one@".parse::<Specifier>().is_err());
        assert!("dep/one@^1".parse::<Specifier>().is_err());
        assert!("#dep/one".parse::<Specifier>().is_err());
        assert!("dep one".parse::<Specifier>().is_err());
    }

    #[test]
    fn test_query() {
        assert_eq!(
            query("dep/one@1").unwrap(),
            "dep/one@1.2.0 (default registry)"
        );
        assert_eq!(
            query("dep/one:2.0").unwrap(),
            "dep/one@2.0.1 (default registry)"
        );
        assert_eq!(
            query("git+https://example.com/two#dep/two").unwrap(),
            "dep/two@0.3.1 (git https://example.com/two.git)"
        );
        assert_eq!(
            query("registry+default#dep/two").unwrap(),
            "dep/two@0.3.1 (default registry)"
        );
        assert_eq!(
            query("members/util#app/util").unwrap(),
            "app/util@0.1.0 (path /ws/members/util)"
        );
        expect!["package ID specification `dep/three` did not match any packages"]
            .assert_eq(&query("dep/three").unwrap_err());
        expect!["package ID specification `dep/one@3` did not match any packages"]
            .assert_eq(&query("dep/one@3").unwrap_err());
    }

    #[test]
    fn test_ambiguous_lists_every_match() {
        expect![[r#"
            package ID specification `dep/one` is ambiguous, it matches:
              dep/one@1.2.0 (default registry)
              dep/one@2.0.1 (default registry)"#]]
        .assert_eq(&query("dep/one").unwrap_err());
        expect![[r#"
            package ID specification `dep/two@0.3.1` is ambiguous, it matches:
              dep/two@0.3.1 (default registry)
              dep/two@0.3.1 (git https://example.com/two.git)"#]]
        .assert_eq(&query("dep/two@0.3.1").unwrap_err());
    }
}
