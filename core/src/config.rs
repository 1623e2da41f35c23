use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub embedding_capacity: usize,
    pub query_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: 4096,
            query_capacity: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SemanticCacheConfig {
    pub max_entries: usize,
    pub similarity_threshold: f32,
    pub ttl_seconds: u64,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            similarity_threshold: 0.95,
            ttl_seconds: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    #[serde(default)]
    pub warm_queries: Vec<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            warm_queries: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub create_per_minute: u32,
    pub list_per_minute: u32,
    pub query_per_minute: u32,
    pub ingest_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            create_per_minute: 10,
            list_per_minute: 60,
            query_per_minute: 30,
            ingest_per_minute: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub semantic_cache: SemanticCacheConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("ATHENEUM").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = AppConfig::default();
        assert_eq!(config.rate_limit.query_per_minute, 30);
        assert_eq!(config.rate_limit.ingest_per_minute, 20);
        assert_eq!(config.semantic_cache.max_entries, 256);
        assert!(config.heartbeat.interval_secs >= 10);
    }
}
