use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

mod observability;
pub use observability::init_logging;

#[derive(Error, Debug)]
pub enum SharedConfigError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Environment error: {0}")]
    Environment(String),
}

pub type Result<T> = std::result::Result<T, SharedConfigError>;

/// Settings shared by every binary in the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub log_level: String,
    pub environment: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Durable task store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://muse.db".to_string(),
            max_connections: 10,
        }
    }
}

/// API front-end bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10813,
        }
    }
}

/// Paths carved out on local disk for archives, logs and sentinels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub root: String,
}

impl CacheConfig {
    pub fn input_archive_dir(&self) -> PathBuf {
        PathBuf::from(&self.root).join("input_archive")
    }

    pub fn output_archive_dir(&self) -> PathBuf {
        PathBuf::from(&self.root).join("output_archive")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.root).join("log")
    }

    pub fn empty_sentinel(&self) -> PathBuf {
        PathBuf::from(&self.root).join("__empty.txt")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("muse_server");
        Self {
            root: root.to_string_lossy().into_owned(),
        }
    }
}

/// Everything that governs how the device bridge (ADB) is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub binary: String,
    pub device_workspace: String,
    pub query_timeout_seconds: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            binary: "adb".to_string(),
            device_workspace: "/data/local/tmp/muse".to_string(),
            query_timeout_seconds: 10,
        }
    }
}

/// Timing knobs for the scheduler's tick loops, shared with the worker's
/// cancellation poll interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerTimingConfig {
    pub tick_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub device_refresh_interval_seconds: u64,
    pub staleness_timeout_seconds: i64,
}

impl Default for SchedulerTimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            poll_interval_ms: 100,
            device_refresh_interval_seconds: 30,
            staleness_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

/// The full configuration tree loaded once at process startup and shared
/// (via `Arc` at the call site) by every component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub global: GlobalConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub bridge: BridgeConfig,
    pub timing: SchedulerTimingConfig,
    pub logging: LoggingConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            bridge: BridgeConfig::default(),
            timing: SchedulerTimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl WorkspaceConfig {
    /// Load configuration from an optional `config.toml` at the workspace
    /// root, overridden by `MUSE_`-prefixed environment variables, falling
    /// back to the defaults above for anything unset.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder();

        if let Ok(workspace_root) = find_workspace_root() {
            let config_file = workspace_root.join("config.toml");
            if config_file.exists() {
                builder = builder.add_source(File::from(config_file));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("MUSE")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let defaults = WorkspaceConfig::default();

        Ok(WorkspaceConfig {
            global: GlobalConfig {
                log_level: config
                    .get("global.log_level")
                    .unwrap_or(defaults.global.log_level),
                environment: config
                    .get("global.environment")
                    .unwrap_or(defaults.global.environment),
            },
            store: StoreConfig {
                url: config
                    .get("store.url")
                    .or_else(|_| config.get("mongodb.uri"))
                    .unwrap_or(defaults.store.url),
                max_connections: config
                    .get("store.max_connections")
                    .unwrap_or(defaults.store.max_connections),
            },
            server: ServerConfig {
                host: config
                    .get("server.host")
                    .unwrap_or(defaults.server.host),
                port: config.get("server.port").unwrap_or(defaults.server.port),
            },
            cache: CacheConfig {
                root: config
                    .get("cache.root")
                    .or_else(|_| config.get("cache_dir"))
                    .unwrap_or(defaults.cache.root),
            },
            bridge: BridgeConfig {
                binary: config
                    .get("bridge.binary")
                    .unwrap_or(defaults.bridge.binary),
                device_workspace: config
                    .get("bridge.device_workspace")
                    .unwrap_or(defaults.bridge.device_workspace),
                query_timeout_seconds: config
                    .get("bridge.query_timeout_seconds")
                    .unwrap_or(defaults.bridge.query_timeout_seconds),
            },
            timing: SchedulerTimingConfig {
                tick_interval_ms: config
                    .get("timing.tick_interval_ms")
                    .unwrap_or(defaults.timing.tick_interval_ms),
                poll_interval_ms: config
                    .get("timing.poll_interval_ms")
                    .unwrap_or(defaults.timing.poll_interval_ms),
                device_refresh_interval_seconds: config
                    .get("timing.device_refresh_interval_seconds")
                    .unwrap_or(defaults.timing.device_refresh_interval_seconds),
                staleness_timeout_seconds: config
                    .get("timing.staleness_timeout_seconds")
                    .unwrap_or(defaults.timing.staleness_timeout_seconds),
            },
            logging: LoggingConfig {
                level: config
                    .get("logging.level")
                    .unwrap_or(defaults.logging.level),
                file: config.get("logging.file").ok(),
                json: config.get("logging.json").unwrap_or(defaults.logging.json),
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Find the workspace root directory by looking for a Cargo.toml declaring
/// `[workspace]`.
fn find_workspace_root() -> Result<PathBuf> {
    let mut current_dir = std::env::current_dir()?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = std::fs::read_to_string(&cargo_toml)?;
            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if let Some(parent) = current_dir.parent() {
            current_dir = parent.to_path_buf();
        } else {
            break;
        }
    }

    Err(SharedConfigError::Environment(
        "Could not find workspace root directory".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_server_settings_contract() {
        let cfg = WorkspaceConfig::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 10813);
        assert_eq!(cfg.bridge.device_workspace, "/data/local/tmp/muse");
        assert_eq!(cfg.timing.staleness_timeout_seconds, 10);
    }

    #[test]
    fn cache_paths_are_nested_under_root() {
        let cache = CacheConfig {
            root: "/tmp/muse_test".to_string(),
        };
        assert_eq!(
            cache.input_archive_dir(),
            PathBuf::from("/tmp/muse_test/input_archive")
        );
        assert_eq!(
            cache.output_archive_dir(),
            PathBuf::from("/tmp/muse_test/output_archive")
        );
    }
}
