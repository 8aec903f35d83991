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

//! Refreshing the local registry index cache before a resolution.
//!
//! Index files are fetched with bounded concurrency, starting from the
//! packages the workspace and the previous lock name, then following the
//! dependencies found in every fetched file until nothing new turns up.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    future::Future,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use bytes::Bytes;
use futures::{StreamExt, future::BoxFuture, stream};
use lockutil::{
    config::Settings, lockstep_dir::LockstepHome, manifest::parse_manifest_str,
    package::PackageName,
};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to fetch `{url}`")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("`{url}` responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("registry `{0}` has no configured url")]
    UnknownRegistry(String),
    #[error("failed to write index file `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Connection failures, timeouts, 429 and 5xx are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http { source, .. } => source.is_connect() || source.is_timeout(),
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::UnknownRegistry(_) | FetchError::Io { .. } => false,
        }
    }
}

/// Transport for index files. `Ok(None)` means the registry does not know
/// the package.
pub trait IndexFetch: Send + Sync {
    fn fetch<'a>(
        &'a self,
        registry: Option<&'a str>,
        name: &'a PackageName,
    ) -> BoxFuture<'a, Result<Option<Bytes>, FetchError>>;
}

pub struct HttpIndexFetch {
    client: reqwest::Client,
    default_url: String,
    urls: BTreeMap<String, String>,
}

impl HttpIndexFetch {
    pub fn new(settings: &Settings) -> Self {
        HttpIndexFetch {
            client: reqwest::Client::new(),
            default_url: settings.registry_url.clone(),
            urls: settings.registries.clone(),
        }
    }

    fn index_url(&self, registry: Option<&str>, name: &PackageName) -> Result<String, FetchError> {
        let base = match registry {
            None => &self.default_url,
            Some(r) => self
                .urls
                .get(r)
                .ok_or_else(|| FetchError::UnknownRegistry(r.to_owned()))?,
        };
        let encode = |s: &str| {
            form_urlencoded::Serializer::new(String::new())
                .append_key_only(s)
                .finish()
        };
        let mut path = String::new();
        if !name.scope.is_empty() {
            path.push_str(&encode(&name.scope));
            path.push('/');
        }
        path.push_str(&encode(&name.name));
        Ok(format!("{}/index/{}.index", base.trim_end_matches('/'), path))
    }
}

impl IndexFetch for HttpIndexFetch {
    fn fetch<'a>(
        &'a self,
        registry: Option<&'a str>,
        name: &'a PackageName,
    ) -> BoxFuture<'a, Result<Option<Bytes>, FetchError>> {
        Box::pin(async move {
            let url = self.index_url(registry, name)?;
            log::debug!("Fetching {}", url);
            let http = |source| FetchError::Http {
                url: url.clone(),
                source,
            };
            let resp = self.client.get(&url).send().await.map_err(http)?;
            let status = resp.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            let data = resp.bytes().await.map_err(http)?;
            Ok(Some(data))
        })
    }
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    pub base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        RetryPolicy {
            attempts: settings.net_retry,
            ..Default::default()
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    pub async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.attempts.max(1) => {
                    let delay = self.delay(attempt);
                    log::debug!("{}, retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                res => return res,
            }
        }
    }
}

type IndexName = (Option<String>, PackageName);

pub struct Prefetcher<'a> {
    home: &'a LockstepHome,
    fetch: &'a dyn IndexFetch,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<'a> Prefetcher<'a> {
    pub fn new(home: &'a LockstepHome, fetch: &'a dyn IndexFetch, settings: &Settings) -> Self {
        Prefetcher {
            home,
            fetch,
            retry: RetryPolicy::from_settings(settings),
            concurrency: settings.net_concurrency.max(1),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetches the index files of `roots` and of everything they depend on.
    /// Returns the number of index files fetched.
    pub async fn prefetch(
        &self,
        roots: impl IntoIterator<Item = IndexName>,
    ) -> Result<usize, FetchError> {
        let mut seen: HashSet<IndexName> = HashSet::new();
        let mut round: BTreeSet<IndexName> = BTreeSet::new();
        for root in roots {
            if seen.insert(root.clone()) {
                round.insert(root);
            }
        }

        let mut fetched = 0;
        while !round.is_empty() {
            log::debug!("Fetching {} index files", round.len());
            let results: Vec<_> = stream::iter(round.iter())
                .map(|(registry, name)| self.fetch_one(registry.as_deref(), name))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
            let mut next = BTreeSet::new();
            for res in results {
                for dep in res? {
                    if seen.insert(dep.clone()) {
                        next.insert(dep);
                    }
                }
                fetched += 1;
            }
            round = next;
        }
        Ok(fetched)
    }

    async fn fetch_one(
        &self,
        registry: Option<&str>,
        name: &PackageName,
    ) -> Result<Vec<IndexName>, FetchError> {
        let data = self
            .retry
            .with_retry(|| self.fetch.fetch(registry, name))
            .await?;
        let path = self.home.index_file(registry, name);
        let Some(data) = data else {
            log::debug!("{} is not in the registry", name);
            return Ok(Vec::new());
        };
        write_index_file(&path, &data)?;
        Ok(dependency_names(registry, &data))
    }
}

/// Writes through a sibling temp file, so readers see the old file or the
/// new one, never a torn write.
fn write_index_file(path: &Path, data: &[u8]) -> Result<(), FetchError> {
    let io = |source| FetchError::Io {
        path: path.to_owned(),
        source,
    };
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(io)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
    tmp.write_all(data).map_err(io)?;
    tmp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

/// Registry dependencies named anywhere in an index file. Dev dependencies
/// of registry packages are never resolved, so they are left out.
fn dependency_names(registry: Option<&str>, data: &[u8]) -> Vec<IndexName> {
    let text = String::from_utf8_lossy(data);
    let mut res = BTreeSet::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(manifest) = parse_manifest_str(line) else {
            continue;
        };
        for (name, info, kind) in manifest.all_deps() {
            if kind.is_dev() {
                continue;
            }
            let dep_registry = info
                .registry
                .clone()
                .or_else(|| registry.map(str::to_owned));
            res.insert((dep_registry, name.clone()));
        }
    }
    res.into_iter().collect()
}
