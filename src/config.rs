/// Configuration
///
/// Mirrors the teacher's `Config::load_or_default`/`save` shape (TOML on
/// disk, `Default` baked in) but covers the RS/chunking/tracker/retention
/// parameters this spec actually needs, plus the environment variable
/// overrides from spec.md §6.
use crate::error::{DecentralisError, DecentralisResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub erasure: ErasureConfig,
    pub storage: StorageConfig,
    pub tracker: TrackerConfig,
    pub rpc: RpcConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasureConfig {
    /// RS data shards (k).
    pub k: usize,
    /// RS parity shards (m).
    pub m: usize,
    /// Bytes per data chunk before zero-padding the last one.
    pub chunk_size: usize,
    /// Number of contiguous data indices per LRC group.
    pub lrc_group_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for `key.json`, `storage/`, `chunks/`, and the database.
    pub data_dir: PathBuf,
    /// Retention window applied to newly chunked files, in days.
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub address: String,
    pub keepalive_interval_secs: u64,
    /// Consecutive missed keepalive intervals before a peer is declared lost.
    pub peer_loss_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub listen_port: u16,
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            erasure: ErasureConfig {
                k: 6,
                m: 4,
                chunk_size: 10 * 1024 * 1024,
                lrc_group_size: 2,
            },
            storage: StorageConfig {
                data_dir: default_data_dir(),
                retention_days: 30,
            },
            tracker: TrackerConfig {
                address: "127.0.0.1:9000".to_string(),
                keepalive_interval_secs: 15,
                peer_loss_threshold: 3,
            },
            rpc: RpcConfig {
                listen_port: 9100,
                call_timeout_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                debug: false,
            },
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".decentralis").join("data"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

impl Config {
    /// Load from `path` if present, else defaults; then apply env var
    /// overrides (spec.md §6) on top either way.
    pub fn load_or_default(path: Option<PathBuf>) -> DecentralisResult<Self> {
        let mut config = if let Some(path) = &path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                let config: Config = toml::from_str(&text)
                    .map_err(|e| DecentralisError::Configuration(format!("parse {path:?}: {e}")))?;
                tracing::info!(?path, "loaded configuration");
                config
            } else {
                tracing::info!("config path {:?} not found, using defaults", path);
                Config::default()
            }
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> DecentralisResult<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| DecentralisError::Configuration(format!("serialize config: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> DecentralisResult<()> {
        if let Ok(k) = std::env::var("DECENTRALIS_RS_K") {
            self.erasure.k = parse_env("DECENTRALIS_RS_K", &k)?;
        }
        if let Ok(m) = std::env::var("DECENTRALIS_RS_M") {
            self.erasure.m = parse_env("DECENTRALIS_RS_M", &m)?;
        }
        if let Ok(mb) = std::env::var("DECENTRALIS_CHUNK_SIZE_MB") {
            let mb: usize = parse_env("DECENTRALIS_CHUNK_SIZE_MB", &mb)?;
            self.erasure.chunk_size = mb * 1024 * 1024;
        }
        if let Ok(days) = std::env::var("DECENTRALIS_RETENTION_DAYS") {
            self.storage.retention_days = parse_env("DECENTRALIS_RETENTION_DAYS", &days)?;
        }
        if let Ok(debug) = std::env::var("DECENTRALIS_DEBUG") {
            self.logging.debug = debug == "1" || debug.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.keepalive_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.call_timeout_secs)
    }

    /// Validates `k + m <= 255` (GF(2^8) limit) and `k >= 1` per spec.md §3.
    pub fn validate(&self) -> DecentralisResult<()> {
        if self.erasure.k == 0 {
            return Err(DecentralisError::Configuration(
                "erasure.k must be >= 1".to_string(),
            ));
        }
        if self.erasure.k + self.erasure.m > 255 {
            return Err(DecentralisError::Configuration(
                "erasure.k + erasure.m must be <= 255".to_string(),
            ));
        }
        if self.erasure.lrc_group_size == 0 {
            return Err(DecentralisError::Configuration(
                "erasure.lrc_group_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> DecentralisResult<T> {
    value
        .parse()
        .map_err(|_| DecentralisError::Configuration(format!("invalid {name}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_oversized_shard_count() {
        let mut config = Config::default();
        config.erasure.k = 200;
        config.erasure.m = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::default();
        config.save(&path).unwrap();
        let loaded = Config::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.erasure.k, config.erasure.k);
        assert_eq!(loaded.erasure.m, config.erasure.m);
    }
}
