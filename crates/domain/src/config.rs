//! Layered configuration: TOML file defaults, overridden by environment
//! variables read once at startup. Every field carries an explicit default
//! so a partial config file is always valid, matching the free-function
//! `#[serde(default = "d_xxx")]` pattern used throughout this codebase.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Must be `true` under production hardening; see [`Config::validate`].
    pub enforce_permissions: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            enforce_permissions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub success_threshold: u32,
    pub failure_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
            failure_window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub shutdown_grace_period_ms: u64,
    /// Interval for the Governance sanction-auto-expiry job, in ms.
    pub sanction_sweep_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            shutdown_grace_period_ms: 5_000,
            sanction_sweep_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub store: StoreKind,
    pub checkpoint_dir: String,
    /// Corresponds to `REQUIRE_PERSISTENT_STORE`; when true and the store
    /// directory is unreachable, startup fails instead of degrading.
    pub require_persistent_store: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            store: StoreKind::File,
            checkpoint_dir: "state/checkpoints".into(),
            require_persistent_store: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSigningConfig {
    pub require_signature: bool,
    pub signing_secret: Option<String>,
}

impl Default for ManifestSigningConfig {
    fn default() -> Self {
        ManifestSigningConfig {
            require_signature: false,
            signing_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub admin_token_env: Option<String>,
    /// Env var holding the bearer token the `auth` envelope request checks.
    /// `None` or an unset/empty env var means the envelope endpoint accepts
    /// any caller, same dev-mode convention as `admin_token_env`.
    pub api_token_env: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            admin_token_env: Some("SA_ADMIN_TOKEN".into()),
            api_token_env: Some("SA_API_TOKEN".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub scheduler: SchedulerConfig,
    pub persistence: PersistenceConfig,
    pub manifest_signing: ManifestSigningConfig,
    /// `ENFORCE_PRODUCTION_HARDENING`; set from env at load time, not from
    /// the file, so it can never be silently committed off.
    #[serde(skip)]
    pub enforce_production_hardening: bool,
}

impl Config {
    /// Parse a TOML document, then apply environment overrides exactly as
    /// the process would at startup.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.enforce_production_hardening = env_flag("ENFORCE_PRODUCTION_HARDENING");

        if let Ok(v) = std::env::var("REQUIRE_PERSISTENT_STORE") {
            self.persistence.require_persistent_store = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("REQUIRE_MANIFEST_SIGNATURE") {
            self.manifest_signing.require_signature = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("MANIFEST_SIGNING_SECRET") {
            self.manifest_signing.signing_secret = Some(v);
        }
        if let Ok(v) = std::env::var("SHUTDOWN_GRACE_PERIOD_MS") {
            if let Ok(ms) = v.parse() {
                self.scheduler.shutdown_grace_period_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("CIRCUIT_FAILURE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.circuit_breaker.failure_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("CIRCUIT_RESET_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.circuit_breaker.reset_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("CIRCUIT_SUCCESS_THRESHOLD") {
            if let Ok(n) = v.parse() {
                self.circuit_breaker.success_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("CIRCUIT_FAILURE_WINDOW_MS") {
            if let Ok(ms) = v.parse() {
                self.circuit_breaker.failure_window_ms = ms;
            }
        }
    }

    /// The production hardening gate: reject insecure sandbox/policy/worker
    /// configurations outright rather than booting softly.
    pub fn validate(&self) -> Result<()> {
        if self.enforce_production_hardening && !self.sandbox.enforce_permissions {
            return Err(Error::Config(
                "ENFORCE_PRODUCTION_HARDENING is set but sandbox.enforce_permissions = false; \
                 refusing to start with an unenforced capability sandbox"
                    .into(),
            ));
        }
        if self.enforce_production_hardening && self.manifest_signing.require_signature
            && self.manifest_signing.signing_secret.is_none()
        {
            return Err(Error::Config(
                "REQUIRE_MANIFEST_SIGNATURE is set but MANIFEST_SIGNING_SECRET is absent".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreKind {
    fn default() -> Self {
        StoreKind::File
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| parse_bool(&v)).unwrap_or(false)
}

fn parse_bool(v: &str) -> bool {
    matches!(v, "1" | "true" | "yes" | "TRUE" | "True")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive_enough_to_boot() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config = Config::from_toml_str("[server]\nport = 9090\n").unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn hardening_rejects_disabled_enforcement() {
        let mut config = Config::default();
        config.enforce_production_hardening = true;
        config.sandbox.enforce_permissions = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn hardening_rejects_missing_signing_secret() {
        let mut config = Config::default();
        config.enforce_production_hardening = true;
        config.manifest_signing.require_signature = true;
        assert!(config.validate().is_err());
    }
}
