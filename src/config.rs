use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "RMD_OFFLINE_";

/// Configuration for the offline client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Download backend connection settings
    pub api: ApiConfig,

    /// Offline queue settings
    pub queue: QueueConfig,

    /// Connectivity monitoring settings
    pub network: NetworkConfig,

    /// Cache coordinator settings
    pub cache: CacheConfig,

    /// Job reconciliation settings
    pub reconcile: ReconcileConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the download backend
    pub base_url: String,

    /// Transport timeout for every request (seconds)
    pub timeout_seconds: u64,

    /// Send the queue item id as an Idempotency-Key when draining
    pub send_idempotency_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory of the durable key-value store
    pub store_dir: PathBuf,

    /// Maximum number of queued requests
    pub capacity: usize,

    /// Pause between two drained items (milliseconds)
    pub drain_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Wait after coming back online before draining (milliseconds)
    pub settle_delay_ms: u64,

    /// Poll the backend health endpoint to detect connectivity
    pub enable_probe: bool,

    /// Path of the health endpoint, relative to the API base URL
    pub probe_path: String,

    /// Interval between two probes (milliseconds)
    pub probe_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the cache coordinator for API traffic
    pub enabled: bool,

    /// Root directory holding one sub-directory per partition
    pub cache_dir: PathBuf,

    /// Generation tag; partitions not starting with it are deleted on activation
    pub version: String,

    /// Entry-point resources stored in the static partition on install
    pub precache: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Sweep interval (milliseconds)
    pub interval_ms: u64,

    /// One-shot refresh delay after a job is created (milliseconds)
    pub initial_refresh_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level / env-filter directive
    pub log_level: String,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl QueueConfig {
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }
}

impl NetworkConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn initial_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.initial_refresh_delay_ms)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let mut config_paths = vec![
            PathBuf::from("rmd-offline.toml"),
            PathBuf::from("config/rmd-offline.toml"),
        ];
        if let Ok(home) = std::env::var("HOME") {
            config_paths.push(PathBuf::from(home).join(".config/rmd-offline/config.toml"));
        }
        config_paths.push(PathBuf::from("/etc/rmd-offline/config.toml"));

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path.display());
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        // Try environment variables
        if let Ok(config) = Self::from_env() {
            return Ok(config);
        }

        Err(anyhow!("No configuration file found"))
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config.with_env_overrides())
    }

    /// Load configuration from environment variables.
    ///
    /// Fails when no `RMD_OFFLINE_*` variable is set.
    pub fn from_env() -> Result<Self> {
        if !Self::has_env_overrides(std::env::vars().map(|(key, _)| key)) {
            return Err(anyhow!("No {}* environment variables set", ENV_PREFIX));
        }
        Ok(Self::default().with_env_overrides())
    }

    fn has_env_overrides(keys: impl IntoIterator<Item = String>) -> bool {
        keys.into_iter().any(|key| key.starts_with(ENV_PREFIX))
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = std::env::var("RMD_OFFLINE_API_URL") {
            self.api.base_url = base_url;
        }

        if let Ok(store_dir) = std::env::var("RMD_OFFLINE_STORE_DIR") {
            self.queue.store_dir = PathBuf::from(store_dir);
        }

        if let Ok(cache_dir) = std::env::var("RMD_OFFLINE_CACHE_DIR") {
            self.cache.cache_dir = PathBuf::from(cache_dir);
        }

        if let Ok(version) = std::env::var("RMD_OFFLINE_CACHE_VERSION") {
            self.cache.version = version;
        }

        if let Ok(log_level) = std::env::var("RMD_OFFLINE_LOG_LEVEL") {
            self.logging.log_level = log_level;
        }

        self
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.api.base_url)
            .map_err(|e| anyhow!("api.base_url is not a valid URL: {}", e))?;
        if !base.scheme().starts_with("http") {
            return Err(anyhow!("api.base_url must be http or https"));
        }

        if self.queue.capacity == 0 {
            return Err(anyhow!("queue.capacity must be greater than 0"));
        }

        if self.reconcile.interval_ms == 0 {
            return Err(anyhow!("reconcile.interval_ms must be greater than 0"));
        }

        if self.network.enable_probe && self.network.probe_interval_ms == 0 {
            return Err(anyhow!("network.probe_interval_ms must be greater than 0"));
        }

        if self.cache.version.trim().is_empty() {
            return Err(anyhow!("cache.version must not be empty"));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Offline Client Configuration:\n\
            - Backend: {}\n\
            - Queue Store: {}\n\
            - Queue Capacity: {}\n\
            - Cache Directory: {}\n\
            - Cache Version: {}\n\
            - Reconcile Interval: {}ms\n\
            - Connectivity Probe: {}",
            self.api.base_url,
            self.queue.store_dir.display(),
            self.queue.capacity,
            self.cache.cache_dir.display(),
            self.cache.version,
            self.reconcile.interval_ms,
            self.network.enable_probe
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:3001".to_string(),
                timeout_seconds: 30,
                send_idempotency_key: true,
            },
            queue: QueueConfig {
                store_dir: PathBuf::from(".rmd_offline"),
                capacity: 100,
                drain_delay_ms: 500,
            },
            network: NetworkConfig {
                settle_delay_ms: 1000,
                enable_probe: true,
                probe_path: "/health".to_string(),
                probe_interval_ms: 5000,
            },
            cache: CacheConfig {
                enabled: true,
                cache_dir: PathBuf::from(".rmd_offline/cache"),
                version: "rust-media-downloader-v2".to_string(),
                precache: vec![
                    "/".to_string(),
                    "/index.html".to_string(),
                    "/manifest.json".to_string(),
                ],
            },
            reconcile: ReconcileConfig {
                interval_ms: 2000,
                initial_refresh_delay_ms: 500,
            },
            logging: LoggingConfig {
                log_level: "rmd_offline=info,warn".to_string(),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.api.base_url = base_url.into();
        self
    }

    pub fn with_store_dir(mut self, dir: PathBuf) -> Self {
        self.config.queue.store_dir = dir;
        self
    }

    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.config.cache.cache_dir = dir;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.queue.capacity = capacity;
        self
    }

    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.config.cache.version = version.into();
        self
    }

    pub fn enable_probe(mut self, enable: bool) -> Self {
        self.config.network.enable_probe = enable;
        self
    }

    pub fn enable_cache(mut self, enable: bool) -> Self {
        self.config.cache.enabled = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.queue.drain_delay(), Duration::from_millis(500));
        assert_eq!(config.network.settle_delay(), Duration::from_secs(1));
        assert_eq!(config.reconcile.interval(), Duration::from_secs(2));
        assert_eq!(config.cache.precache.len(), 3);
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .with_base_url("http://backend:9000")
            .with_capacity(5)
            .with_cache_version("v9")
            .enable_probe(false)
            .build();

        assert_eq!(config.api.base_url, "http://backend:9000");
        assert_eq!(config.queue.capacity, 5);
        assert_eq!(config.cache.version, "v9");
        assert!(!config.network.enable_probe);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let bad = ConfigBuilder::new().with_capacity(0).build();
        assert!(bad.validate().is_err());

        let bad_url = ConfigBuilder::new().with_base_url("not a url").build();
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn test_env_detection() {
        let unrelated = vec!["HOME".to_string(), "RUST_LOG".to_string()];
        assert!(!Config::has_env_overrides(unrelated));

        let set = vec!["PATH".to_string(), "RMD_OFFLINE_API_URL".to_string()];
        assert!(Config::has_env_overrides(set));
    }

    #[test]
    fn test_from_env_requires_overrides() {
        if std::env::vars().any(|(key, _)| key.starts_with(ENV_PREFIX)) {
            return;
        }
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rmd-offline.toml");
        let config = ConfigBuilder::new().with_capacity(7).build();

        config.save(path.to_str().unwrap()).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.queue.capacity, 7);
        assert_eq!(loaded.cache.version, config.cache.version);
    }
}
