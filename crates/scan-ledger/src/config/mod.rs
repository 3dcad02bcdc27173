use std::{env, fs, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

/// Settings read once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub cache_url: Option<String>,
    pub store_timeout_ms: u64,
    pub environment: Environment,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var("SCAN_LEDGER_CONFIG").unwrap_or_else(|_| "config.json".to_string());
        let file_cfg: Option<AppConfig> = fs::read_to_string(&path)
            .ok()
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .with_context(|| format!("failed to parse {path}"))?;

        let mut cfg = file_cfg.unwrap_or_default();
        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = var("SL_HOST") {
            self.host = v;
        }
        if let Some(v) = var("SL_PORT") {
            self.port = v.parse().with_context(|| format!("SL_PORT is not a port: {v}"))?;
        }
        if let Some(v) = var("SL_DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = var("SL_CACHE_URL") {
            self.cache_url = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = var("SL_STORE_TIMEOUT_MS") {
            self.store_timeout_ms = v
                .parse()
                .with_context(|| format!("SL_STORE_TIMEOUT_MS is not a number: {v}"))?;
        }
        if let Some(v) = var("SL_ENVIRONMENT") {
            self.environment = serde_json::from_value(serde_json::Value::String(v.clone()))
                .with_context(|| format!("unknown SL_ENVIRONMENT: {v}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.port != 0, "port must be non-zero");
        anyhow::ensure!(self.store_timeout_ms > 0, "store_timeout_ms must be positive");
        if self.environment == Environment::Production {
            anyhow::ensure!(
                !self.database_url.contains(":memory:"),
                "in-memory database is not allowed in production"
            );
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            database_url: "sqlite://scan-ledger.db?mode=rwc".to_string(),
            max_connections: 5,
            cache_url: None,
            store_timeout_ms: 5_000,
            environment: Environment::Development,
        }
    }
}
