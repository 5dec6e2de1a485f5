use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lock::LockOptions;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub samples_cache: SamplesCacheConfig,
    pub site: SiteConfig,
    pub binaries: BinariesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplesCacheConfig {
    /// Worker pool size for enumeration and staging.
    pub threads: usize,
    /// Store file. An empty path selects an in-memory store.
    pub db_path: PathBuf,
    pub lockfile: bool,
    pub lockfile_max_count: u32,
    /// Seconds after which a lock marker is considered abandoned.
    pub lockfile_max_age: u64,
    pub xrdcp_retry: u32,
}

impl Default for SamplesCacheConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            db_path: default_db_path(),
            lockfile: true,
            lockfile_max_count: 6,
            lockfile_max_age: 300,
            xrdcp_retry: 3,
        }
    }
}

impl SamplesCacheConfig {
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            enabled: self.lockfile,
            max_count: self.lockfile_max_count,
            max_age: Duration::from_secs(self.lockfile_max_age),
            ..LockOptions::default()
        }
    }

    pub fn store_path(&self) -> Option<&Path> {
        if self.db_path.as_os_str().is_empty() {
            None
        } else {
            Some(self.db_path.as_path())
        }
    }
}

/// Where files live at the current site and how they are reached.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub store_path: String,
    pub local_prefix: String,
    pub remote_prefix: String,
    pub file_cache_path: PathBuf,
    /// Stage files whenever samples are loaded.
    pub stage: bool,
    /// Minimum transfer rate (bytes/s) accepted when staging a LOCAL file.
    pub local_xrate_threshold: u64,
    /// Minimum transfer rate (bytes/s) accepted when staging a REMOTE file.
    pub remote_xrate_threshold: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            store_path: String::new(),
            local_prefix: String::new(),
            remote_prefix: String::new(),
            file_cache_path: PathBuf::new(),
            stage: false,
            local_xrate_threshold: 10_000_000,
            remote_xrate_threshold: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinariesConfig {
    pub dasgoclient: String,
    pub xrdcp: String,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            dasgoclient: "dasgoclient".to_string(),
            xrdcp: "xrdcp".to_string(),
        }
    }
}

/// Load configuration from an optional TOML file and `SAMPLE_CACHE__*` environment variables.
///
/// Without an explicit file, `SampleCache.toml` in the working directory is used if present.
pub fn load_configuration(config_file: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file_source = match config_file {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("SampleCache").required(false),
    };
    let builder = Config::builder()
        .add_source(file_source)
        .add_source(Environment::with_prefix("SAMPLE_CACHE").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

fn default_db_path() -> PathBuf {
    let cache_home = env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"));
    cache_home.join("sample-cache").join("sample.db")
}
