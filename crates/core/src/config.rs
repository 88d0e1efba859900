//! Configuration management
//!
//! Holds the immutable client configuration (endpoint, credentials and
//! transfer tunables) and persists it as TOML at
//! ~/.config/osscmd/config.toml.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Current configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Endpoint used when neither flags nor the config file name one
pub const DEFAULT_HOST: &str = "oss-cn-hangzhou.aliyuncs.com";

/// Environment variable that relocates the configuration directory
pub const CONFIG_DIR_ENV: &str = "OSSCMD_CONFIG_DIR";

const MIB: u64 = 1024 * 1024;

/// Endpoint and access key pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Service host, e.g. `oss-cn-hangzhou.aliyuncs.com` or `http://127.0.0.1:9000`
    pub host: String,
    /// Access key id
    pub access_id: String,
    /// Access key secret
    pub access_secret: String,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        access_id: impl Into<String>,
        access_secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            access_id: access_id.into(),
            access_secret: access_secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("access_id", &self.access_id)
            .field("access_secret", &"<redacted>")
            .finish()
    }
}

/// What the scheduler does when a work item exhausts its retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop admitting work, drain in-flight items, return the error
    #[default]
    Abort,
    /// Count the item as failed and keep going
    Continue,
}

/// Transfer tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Smallest accepted part size in bytes
    pub part_size_min: u64,
    /// Largest accepted part size in bytes
    pub part_size_max: u64,
    /// Part size used when the caller supplies none
    pub default_part_size: u64,
    /// Lower bound on concurrent workers
    pub thread_min: usize,
    /// Upper bound on concurrent workers
    pub thread_max: usize,
    /// Worker count used when the caller supplies none
    pub default_thread_num: usize,
    /// Attempts per work item before it is declared failed
    pub max_retry_num: u32,
    /// Range size for `get` and `cat`
    pub recv_buffer_size: u64,
    /// Default failure policy for bulk operations
    pub failure_policy: FailurePolicy,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            part_size_min: MIB,
            part_size_max: 100 * MIB,
            default_part_size: 10 * MIB,
            thread_min: 5,
            thread_max: 100,
            default_thread_num: 10,
            max_retry_num: 3,
            recv_buffer_size: 10 * 1024,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

impl Tunables {
    /// Resolve the part size for one call, clamped into the configured bounds
    pub fn part_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_part_size)
            .clamp(self.part_size_min, self.part_size_max.max(self.part_size_min))
    }

    /// Resolve the worker count for one call over `total_items` work items
    ///
    /// Clamped into `[min(thread_min, total), min(thread_max, total)]`, never below one.
    pub fn thread_num(&self, requested: Option<usize>, total_items: usize) -> usize {
        let upper = self.thread_max.min(total_items).max(1);
        let lower = self.thread_min.min(total_items).clamp(1, upper);
        requested
            .unwrap_or(self.default_thread_num)
            .clamp(lower, upper)
    }
}

/// Immutable configuration handed to every component constructor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub credentials: Credentials,
    pub tunables: Tunables,
}

impl ClientConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            tunables: Tunables::default(),
        }
    }

    pub fn with_tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }
}

/// On-disk configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    pub schema_version: u32,

    /// Stored endpoint and key pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,

    /// Tunable overrides
    #[serde(default)]
    pub tunables: Tunables,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            credentials: None,
            tunables: Tunables::default(),
        }
    }
}

impl Config {
    /// Merge explicit values over the stored ones into a ClientConfig
    ///
    /// Empty strings count as absent.
    pub fn resolve(
        &self,
        host: Option<&str>,
        access_id: Option<&str>,
        access_secret: Option<&str>,
    ) -> Result<ClientConfig> {
        let stored = self.credentials.as_ref();
        let pick = |explicit: Option<&str>, stored: Option<&String>| {
            explicit
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| stored.filter(|v| !v.is_empty()).cloned())
        };

        let host = pick(host, stored.map(|c| &c.host)).unwrap_or_else(|| DEFAULT_HOST.into());
        let access_id = pick(access_id, stored.map(|c| &c.access_id));
        let access_secret = pick(access_secret, stored.map(|c| &c.access_secret));

        match (access_id, access_secret) {
            (Some(id), Some(secret)) => Ok(ClientConfig::new(Credentials::new(host, id, secret))
                .with_tunables(self.tunables.clone())),
            _ => Err(Error::Config(
                "Missing access id/secret. Run: osscmd config --id=<accessid> --key=<accesskey>"
                    .into(),
            )),
        }
    }
}

/// Configuration manager handles loading and saving config
#[derive(Debug)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the default config path
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("Could not determine config directory".into()))?
                .join("osscmd"),
        };
        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    /// Create a ConfigManager with a custom path (useful for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the configuration file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk
    ///
    /// If the configuration file doesn't exist, returns a default configuration.
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        if config.schema_version < SCHEMA_VERSION {
            config = self.migrate(config)?;
        } else if config.schema_version > SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "Configuration file version {} is newer than supported version {}. Please upgrade osscmd.",
                config.schema_version, SCHEMA_VERSION
            )));
        }

        Ok(config)
    }

    /// Save configuration to disk
    ///
    /// Sets file permissions to 600 since the file holds the access secret.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.config_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.config_path, permissions)?;
        }

        tracing::debug!(path = %self.config_path.display(), "configuration saved");
        Ok(())
    }

    /// Store credentials, keeping the other settings
    pub fn store_credentials(&self, credentials: Credentials) -> Result<()> {
        let mut config = self.load()?;
        config.credentials = Some(credentials);
        self.save(&config)
    }

    /// Migrate configuration from older schema version
    fn migrate(&self, config: Config) -> Result<Config> {
        let mut config = config;
        config.schema_version = SCHEMA_VERSION;
        Ok(config)
    }
}
