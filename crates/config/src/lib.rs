//! Configuration for wheelhouse.
//!
//! Sources are layered with [figment], later sources overriding earlier ones:
//!
//! 1. Built-in defaults (local storage under `./data`, no database).
//! 2. A configuration file: the one given explicitly, otherwise
//!    `config.toml` in the platform configuration directory when present.
//!    TOML, YAML and JSON are recognised by extension.
//! 3. Environment variables prefixed `WHEELHOUSE_`, with `__` separating
//!    nested keys (`WHEELHOUSE_STORAGE__KIND=s3`).
//!
//! ```toml
//! log_level = "debug"
//!
//! [storage]
//! kind = "s3"
//! bucket = "packages"
//! region = "us-west-004"
//! endpoint = "https://s3.us-west-004.backblazeb2.com"
//! access_key = "..."
//! secret_key = "..."
//!
//! [database]
//! path = "/var/lib/wheelhouse/registry.sqlite3"
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENV_PREFIX: &str = "WHEELHOUSE_";
const DEFAULT_STORAGE_PATH: &str = "./data";
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// A tracing filter directive; `RUST_LOG` takes precedence.
    pub log_level: String,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Where package artifacts are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        #[serde(default = "default_storage_path")]
        path: PathBuf,
    },
    S3(S3Config),
}
impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local { path: default_storage_path() }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_PATH)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix inside the bucket.
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. Without one the index is read-only and serves
    /// the storage tree directly.
    pub path: Option<PathBuf>,
}

impl Config {
    /// Loads and validates the configuration.
    ///
    /// An explicitly given `file` must exist; the default location is only
    /// read when something is there.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(file)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// The layered sources, without extracting them.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let file = match file {
            Some(file) if !file.is_file() => exn::bail!(ErrorKind::MissingFile(file.to_path_buf())),
            Some(file) => Some(file.to_path_buf()),
            None => default_file().filter(|file| file.is_file()),
        };
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            debug!(file = %file.display(), "loading configuration file");
            figment = match file.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref() {
                Some("toml") => figment.merge(Toml::file(&file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(&file)),
                Some("json") => figment.merge(Json::file(&file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Checks values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.log_level.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("log_level must not be empty".into()));
        }
        match &self.storage {
            StorageConfig::Local { path } if path.as_os_str().is_empty() => {
                exn::bail!(ErrorKind::Invalid("storage.path must not be empty".into()))
            },
            StorageConfig::Local { .. } => (),
            StorageConfig::S3(s3) => s3.validate()?,
        }
        if let Some(path) = &self.database.path
            && path.as_os_str().is_empty()
        {
            exn::bail!(ErrorKind::Invalid("database.path must not be empty".into()));
        }
        Ok(())
    }
}

impl S3Config {
    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("bucket", &self.bucket),
            ("region", &self.region),
            ("access_key", &self.access_key),
            ("secret_key", &self.secret_key),
        ] {
            if value.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid(format!("storage.{key} must not be empty")));
            }
        }
        if let Some(endpoint) = &self.endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            exn::bail!(ErrorKind::Invalid(format!("storage.endpoint {endpoint:?} is not an http(s) URL")));
        }
        Ok(())
    }
}

/// `config.toml` in the platform configuration directory.
pub fn default_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "wheelhouse").map(|dirs| dirs.config_dir().join("config.toml"))
}
