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

//! Layered configuration: `<home>/config.json`, then the environment, then
//! `--config` arguments. Later layers win.

use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::lockstep_dir::LockstepHome;

pub const REGISTRY_ENV: &str = "LOCKSTEP_REGISTRY";
pub const DEFAULT_REGISTRY_URL: &str = "https://index.lockstep.dev";

pub const KEY_REGISTRY_URL: &str = "registry.url";
pub const KEY_NET_RETRY: &str = "net.retry";
pub const KEY_NET_CONCURRENCY: &str = "net.concurrency";
pub const KEY_NET_OFFLINE: &str = "net.offline";
pub const KEY_PARALLEL_VERSIONS: &str = "resolver.parallel-versions";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{}`", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json_lenient::Error,
    },
    #[error("config file `{}` must contain a JSON object", path.display())]
    NotAnObject { path: PathBuf },
    #[error("invalid `--config` argument `{0}`, expected KEY=VALUE or a path to a JSON file")]
    InvalidOverride(String),
    #[error("config key `{key}` must be {expected}, got `{value}`")]
    InvalidValue {
        key: String,
        expected: &'static str,
        value: Value,
    },
}

/// Read access to flattened, dotted configuration keys.
pub trait ConfigProvider {
    fn get(&self, key: &str) -> Option<&Value>;

    fn entries(&self) -> Box<dyn Iterator<Item = (&str, &Value)> + '_>;

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) if s == "true" => Ok(Some(true)),
            Some(Value::String(s)) if s == "false" => Ok(Some(false)),
            Some(v) => Err(ConfigError::InvalidValue {
                key: key.into(),
                expected: "a boolean",
                value: v.clone(),
            }),
        }
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) if n.as_u64().is_some() => Ok(n.as_u64()),
            Some(Value::String(s)) if s.parse::<u64>().is_ok() => Ok(s.parse().ok()),
            Some(v) => Err(ConfigError::InvalidValue {
                key: key.into(),
                expected: "a non-negative integer",
                value: v.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    values: BTreeMap<String, Value>,
}

impl ConfigProvider for JsonConfig {
    fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn entries(&self) -> Box<dyn Iterator<Item = (&str, &Value)> + '_> {
        Box::new(self.values.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

impl JsonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every layer, reading the process environment.
    pub fn load(home: &LockstepHome, overrides: &[String]) -> Result<Self, ConfigError> {
        Self::load_with_env(home, overrides, |k| std::env::var(k).ok())
    }

    pub fn load_with_env(
        home: &LockstepHome,
        overrides: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = JsonConfig::new();
        let file = home.config_json();
        if file.exists() {
            config.merge_file(&file)?;
        }
        if let Some(url) = env(REGISTRY_ENV) {
            config.set(KEY_REGISTRY_URL, Value::String(url));
        }
        for arg in overrides {
            config.apply_override(arg)?;
        }
        Ok(config)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_owned(), value);
    }

    fn merge_value(&mut self, prefix: &str, value: Value) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let key = if prefix.is_empty() {
                        k
                    } else {
                        format!("{prefix}.{k}")
                    };
                    self.merge_value(&key, v);
                }
            }
            v => self.set(prefix, v),
        }
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let value: Value = serde_json_lenient::from_reader(BufReader::new(file)).map_err(
            |source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
        )?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject {
                path: path.to_owned(),
            });
        }
        log::debug!("Merging config from {}", path.display());
        self.merge_value("", value);
        Ok(())
    }

    /// Applies one `--config` argument: `KEY=VALUE` or a path to a JSON file.
    /// Values that parse as JSON (`true`, `3`, `"x"`) are taken as such,
    /// anything else as a plain string.
    pub fn apply_override(&mut self, arg: &str) -> Result<(), ConfigError> {
        if let Some((key, value)) = arg.split_once('=') {
            let key = key.trim();
            let is_key = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
            if is_key {
                let value = serde_json::from_str(value)
                    .unwrap_or_else(|_| Value::String(value.to_owned()));
                self.merge_value(key, value);
                return Ok(());
            }
        }
        let path = Path::new(arg);
        if path.is_file() {
            return self.merge_file(path);
        }
        Err(ConfigError::InvalidOverride(arg.to_owned()))
    }
}

/// Typed view of the keys the engine reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub registry_url: String,
    pub registries: BTreeMap<String, String>,
    pub net_retry: u32,
    pub net_concurrency: usize,
    pub net_offline: bool,
    pub parallel_versions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            registry_url: DEFAULT_REGISTRY_URL.into(),
            registries: BTreeMap::new(),
            net_retry: 3,
            net_concurrency: 16,
            net_offline: false,
            parallel_versions: true,
        }
    }
}

impl Settings {
    pub fn from_provider(p: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let default = Settings::default();
        let mut registries = BTreeMap::new();
        for (key, value) in p.entries() {
            let name = key
                .strip_prefix("registries.")
                .and_then(|k| k.strip_suffix(".url"));
            if let (Some(name), Some(url)) = (name, value.as_str()) {
                registries.insert(name.to_owned(), url.to_owned());
            }
        }
        Ok(Settings {
            registry_url: p
                .get_str(KEY_REGISTRY_URL)
                .map(str::to_owned)
                .unwrap_or(default.registry_url),
            registries,
            net_retry: p
                .get_u64(KEY_NET_RETRY)?
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(default.net_retry),
            net_concurrency: p
                .get_u64(KEY_NET_CONCURRENCY)?
                .map(|n| (n as usize).max(1))
                .unwrap_or(default.net_concurrency),
            net_offline: p.get_bool(KEY_NET_OFFLINE)?.unwrap_or(default.net_offline),
            parallel_versions: p
                .get_bool(KEY_PARALLEL_VERSIONS)?
                .unwrap_or(default.parallel_versions),
        })
    }

    /// Base URL of a registry; `None` is the default registry.
    pub fn registry_url_of(&self, registry: Option<&str>) -> Option<&str> {
        match registry {
            None => Some(&self.registry_url),
            Some(name) => self.registries.get(name).map(String::as_str),
        }
    }
}
