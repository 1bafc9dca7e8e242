//! Configuration management with validation and defaults
//!
//! Sources are layered: built-in defaults, then an optional TOML file, then
//! environment variables. The result is validated before anything starts.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Top-level service configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RgsConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub wallet: WalletConfig,
    pub workers: WorkerConfig,
    pub event_bus: EventBusConfig,
    /// Operators registered at startup, keyed by `api_key`
    pub operators: Vec<OperatorSeed>,
}

/// HTTP listener
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    RocksDb,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/rgs_data".to_string(),
        }
    }
}

/// Remote wallet endpoint. `url` and `secret` have no usable default.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub url: String,
    pub secret: String,
    pub timeout_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            secret: String::new(),
            timeout_ms: 3000,
        }
    }
}

/// Background worker cadence
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub outbox_interval_ms: u64,
    pub webhook_interval_ms: u64,
    /// Age after which an undelivered webhook is failed outright
    pub webhook_expiry_secs: u64,
    pub webhook_timeout_ms: u64,
    pub reconcile_interval_ms: u64,
    /// Age after which a `processing` bet is treated as abandoned
    pub reconcile_after_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            outbox_interval_ms: 3000,
            webhook_interval_ms: 3000,
            webhook_expiry_secs: 60,
            webhook_timeout_ms: 5000,
            reconcile_interval_ms: 10_000,
            reconcile_after_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Replay buffer length per operator
    pub buffer_size: usize,
    pub subscriber_capacity: usize,
    pub keepalive_secs: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            subscriber_capacity: 10,
            keepalive_secs: 15,
        }
    }
}

/// An operator account plus its compliance limits
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorSeed {
    pub name: String,
    pub api_key: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: String,
    /// Empty allows every jurisdiction
    pub allowed_jurisdictions: Vec<String>,
    /// Zero means no limit
    pub max_bet: f64,
}

impl RgsConfig {
    /// In-memory configuration for tests and local experiments
    pub fn for_testing(wallet_url: &str, wallet_secret: &str) -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            wallet: WalletConfig {
                url: wallet_url.to_string(),
                secret: wallet_secret.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "0", "Port cannot be zero"));
        }

        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_directory".to_string()));
        }

        if self.wallet.url.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired("wallet.url (WALLET_URL)".to_string()));
        }
        if self.wallet.secret.is_empty() {
            return Err(ConfigurationError::MissingRequired("wallet.secret (WALLET_SECRET)".to_string()));
        }

        let nonzero_ms = [
            ("wallet.timeout_ms", self.wallet.timeout_ms),
            ("workers.outbox_interval_ms", self.workers.outbox_interval_ms),
            ("workers.webhook_interval_ms", self.workers.webhook_interval_ms),
            ("workers.webhook_timeout_ms", self.workers.webhook_timeout_ms),
            ("workers.webhook_expiry_secs", self.workers.webhook_expiry_secs),
            ("workers.reconcile_interval_ms", self.workers.reconcile_interval_ms),
            ("event_bus.keepalive_secs", self.event_bus.keepalive_secs),
        ];
        for (field, value) in nonzero_ms {
            if value == 0 {
                return Err(invalid(field, "0", "Must be greater than zero"));
            }
        }

        // A live request must never look abandoned while its debit is in flight
        if self.workers.reconcile_after_secs.saturating_mul(1000) <= self.wallet.timeout_ms {
            return Err(invalid(
                "workers.reconcile_after_secs",
                &self.workers.reconcile_after_secs.to_string(),
                "Must exceed the wallet timeout",
            ));
        }

        if self.event_bus.buffer_size == 0 {
            return Err(invalid("event_bus.buffer_size", "0", "Buffer cannot be empty"));
        }
        if self.event_bus.subscriber_capacity == 0 {
            return Err(invalid("event_bus.subscriber_capacity", "0", "Channel capacity cannot be zero"));
        }

        let mut keys = std::collections::HashSet::new();
        for operator in &self.operators {
            if operator.api_key.trim().is_empty() {
                return Err(invalid("operators.api_key", "", "Operator api key cannot be empty"));
            }
            if !keys.insert(operator.api_key.as_str()) {
                return Err(invalid("operators.api_key", &operator.api_key, "Duplicate operator api key"));
            }
            if !operator.max_bet.is_finite() || operator.max_bet < 0.0 {
                return Err(invalid(
                    "operators.max_bet",
                    &operator.max_bet.to_string(),
                    "Must be zero or a positive amount",
                ));
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn wallet_timeout(&self) -> Duration {
        Duration::from_millis(self.wallet.timeout_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.workers.webhook_timeout_ms)
    }

    pub fn outbox_interval(&self) -> Duration {
        Duration::from_millis(self.workers.outbox_interval_ms)
    }

    pub fn webhook_interval(&self) -> Duration {
        Duration::from_millis(self.workers.webhook_interval_ms)
    }

    pub fn webhook_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.workers.webhook_expiry_secs as i64)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.workers.reconcile_interval_ms)
    }

    pub fn reconcile_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.workers.reconcile_after_secs as i64)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.event_bus.keepalive_secs)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load from file (if any) and the process environment, then validate
    pub fn load(&self) -> Result<RgsConfig, ConfigurationError> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => RgsConfig::default(),
        };

        apply_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<RgsConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }
}

/// Apply overrides from a variable lookup (the process environment in
/// production, a map in tests).
pub fn apply_overrides<F>(config: &mut RgsConfig, lookup: F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup("DATABASE_PATH") {
        config.storage.data_directory = path;
    }
    if let Some(url) = lookup("WALLET_URL") {
        config.wallet.url = url;
    }
    if let Some(secret) = lookup("WALLET_SECRET") {
        config.wallet.secret = secret;
    }
    if let Some(host) = lookup("RGS_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("RGS_PORT") {
        config.server.port = port
            .parse()
            .map_err(|_| invalid("RGS_PORT", &port, "Invalid port number"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = RgsConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.workers.outbox_interval_ms, 3000);
        assert_eq!(config.workers.webhook_expiry_secs, 60);
        assert_eq!(config.wallet.timeout_ms, 3000);
        assert_eq!(config.webhook_timeout(), Duration::from_secs(5));
        assert_eq!(config.event_bus.buffer_size, 100);
        assert_eq!(config.event_bus.subscriber_capacity, 10);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(15));
        assert_eq!(config.reconcile_interval(), Duration::from_secs(10));
        assert_eq!(config.reconcile_after(), chrono::Duration::seconds(30));
    }

    #[test]
    fn test_wallet_settings_are_required() {
        let config = RgsConfig::default();
        assert!(matches!(config.validate(), Err(ConfigurationError::MissingRequired(_))));

        let config = RgsConfig::for_testing("http://127.0.0.1:9", "secret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = RgsConfig::for_testing("http://127.0.0.1:9", "secret");
        config.workers.webhook_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = RgsConfig::for_testing("http://127.0.0.1:9", "secret");
        config.event_bus.subscriber_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconcile_window_must_outlast_wallet_timeout() {
        let mut config = RgsConfig::for_testing("http://127.0.0.1:9", "secret");
        config.wallet.timeout_ms = 3000;
        config.workers.reconcile_after_secs = 3;
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidValue { .. })));

        config.workers.reconcile_after_secs = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DATABASE_PATH", "/tmp/rgs"),
            ("WALLET_URL", "http://wallet:8081"),
            ("WALLET_SECRET", "s3cret"),
            ("RGS_PORT", "9090"),
        ]
        .into_iter()
        .collect();

        let mut config = RgsConfig::default();
        apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.storage.data_directory, "/tmp/rgs");
        assert_eq!(config.wallet.url, "http://wallet:8081");
        assert_eq!(config.bind_address(), "0.0.0.0:9090");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = RgsConfig::default();
        let result = apply_overrides(&mut config, |k| (k == "RGS_PORT").then(|| "eighty".to_string()));
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[wallet]\nurl = \"http://localhost:8081\"\nsecret = \"dev\"\n\n[storage]\nbackend = \"memory\"\n\n[event_bus]\nbuffer_size = 5"
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.event_bus.buffer_size, 5);
        assert_eq!(config.event_bus.subscriber_capacity, 10);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_operator_seeds() {
        let toml = r#"
            [wallet]
            url = "http://localhost:8081"
            secret = "dev"

            [[operators]]
            name = "Acme"
            api_key = "acme-key"
            webhook_url = "http://localhost:9000/hooks"
            webhook_secret = "whsec"
            allowed_jurisdictions = ["MT", "GB"]
            max_bet = 100.0
        "#;
        let mut config: RgsConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.operators[0].allowed_jurisdictions, vec!["MT", "GB"]);

        config.operators.push(config.operators[0].clone());
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidValue { .. })));
    }
}
