//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::ratelimit::PolicySet;
use crate::store::RedisStoreConfig;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limit policies
    #[serde(default)]
    pub policies: PolicySet,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Trust the first `X-Forwarded-For` hop as the client address
    #[serde(default)]
    pub trust_proxy: bool,

    /// Header carrying the tenant identifier
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_proxy: false,
            tenant_header: default_tenant_header(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_tenant_header() -> String {
    "x-tenant-id".to_string()
}

/// Counter store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance
    #[default]
    Redis,
    /// Process-local counters, for development and tests
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which backend to use
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisStoreConfig,

    /// Bound on each policy's store calls, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis: RedisStoreConfig::default(),
            timeout_ms: default_store_timeout(),
        }
    }
}

fn default_store_timeout() -> u64 {
    250
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Parse configuration from YAML.
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| crate::error::TurnstileError::Config(e.to_string()))?;
        config.policies.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE__SECTION__FIELD` environment overrides.
    pub fn load(path: Option<&str>) -> crate::error::Result<Self> {
        Self::load_with_env(path, env_source())
    }

    fn load_with_env(
        path: Option<&str>,
        env: config::Environment,
    ) -> crate::error::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: TurnstileConfig = builder.add_source(env).build()?
            .try_deserialize()?;

        config.policies.validate()?;
        Ok(config)
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{FailureMode, KeyResolver};

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.server.tenant_header, "x-tenant-id");
        assert!(!config.server.trust_proxy);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.timeout(), Duration::from_millis(250));
        assert_eq!(config.policies.auth.max_requests, 5);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
  trust_proxy: true
store:
  backend: memory
  timeout_ms: 100
  redis:
    host: redis.internal
    port: 6380
policies:
  tenant:
    max_requests: 50
    window: 1
    unit: minute
    prefix: tenant
    key_by: tenant
    failure_mode: closed
logging:
  json: true
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.server.trust_proxy);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.redis.host, "redis.internal");
        assert_eq!(config.store.redis.port, 6380);
        assert_eq!(config.policies.tenant.max_requests, 50);
        assert_eq!(config.policies.tenant.key_by, KeyResolver::Tenant);
        assert_eq!(config.policies.tenant.failure_mode, FailureMode::Closed);
        assert!(config.logging.json);
    }

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let vars: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env_source().source(Some(vars))
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = TurnstileConfig::load_with_env(None, env(&[])).unwrap();
        assert_eq!(config.policies, PolicySet::default());
    }

    #[test]
    fn test_env_override_of_one_policy_field() {
        let config = TurnstileConfig::load_with_env(
            None,
            env(&[
                ("TURNSTILE__POLICIES__USER__MAX_REQUESTS", "50"),
                ("TURNSTILE__POLICIES__AUTH__MAX_REQUESTS", "3"),
                ("TURNSTILE__STORE__BACKEND", "memory"),
            ]),
        )
        .unwrap();
        let defaults = PolicySet::default();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.policies.user.max_requests, 50);
        assert_eq!(config.policies.user.key_by, KeyResolver::User);
        assert_eq!(config.policies.user.effective_prefix(), "user");
        assert_eq!(config.policies.auth.max_requests, 3);
        assert_eq!(config.policies.auth.effective_prefix(), "auth");
        assert_eq!(config.policies.order, defaults.order);
    }

    #[test]
    fn test_env_override_rejects_shared_prefix() {
        let result = TurnstileConfig::load_with_env(
            None,
            env(&[("TURNSTILE__POLICIES__GENERAL__PREFIX", "auth")]),
        );
        assert!(result.is_err());
    }
}
