use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub inventory: InventoryConfig,
    pub business_rules: BusinessRules,
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeatBackend {
    Memory,
    Postgres,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InventoryConfig {
    pub backend: SeatBackend,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl InventoryConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn default_max_attempts() -> u32 { 5 }
fn default_retry_backoff_ms() -> u64 { 25 }
fn default_lock_timeout_ms() -> u64 { 2000 }

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub tax_rate: f64,
    /// Flat fee per booking, minor units.
    pub booking_fee: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// How long a booking may stay pending before its seats are released. 0 disables.
    #[serde(default)]
    pub pending_hold_seconds: u64,
}

fn default_currency() -> String { "USD".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

fn default_sweep_batch_size() -> usize { 100 }

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Machine-local overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `TRANSIT_DATABASE__URL=postgres://...` overrides `database.url`
            .add_source(config::Environment::with_prefix("TRANSIT").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let s = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [database]
                url = "postgres://localhost/transit"

                [redis]
                url = "redis://127.0.0.1/"

                [inventory]
                backend = "postgres"

                [business_rules]
                tax_rate = 0.075
                booking_fee = 250

                [worker]
                sweep_interval_seconds = 30
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let cfg: Config = s.try_deserialize().unwrap();
        assert_eq!(cfg.inventory.backend, SeatBackend::Postgres);
        assert_eq!(cfg.inventory.max_attempts, 5);
        assert_eq!(cfg.inventory.lock_timeout(), Duration::from_millis(2000));
        assert_eq!(cfg.business_rules.currency, "USD");
        assert_eq!(cfg.business_rules.pending_hold_seconds, 0);
        assert_eq!(cfg.worker.sweep_batch_size, 100);
        assert_eq!(cfg.database.max_connections, 5);
    }
}
