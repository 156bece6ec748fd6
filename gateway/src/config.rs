//! Configuration loading.
//!
//! Settings come from an optional TOML file (path in `CONFIG_FILE`) and are
//! then overridden by environment variables. Everything is read once at
//! startup and is immutable afterwards.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::web::signature::{SigningConfig, SigningMethod};

/// Default queue for forwarded commands.
pub const DEFAULT_COMMAND_QUEUE: &str = "gateway_commands";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("CREDENTIALS is not valid JSON: {0}")]
    Credentials(#[source] serde_json::Error),

    #[error("route path for {name} must start with '/': {path:?}")]
    InvalidPath { name: &'static str, path: String },
}

/// Opaque exchange credentials handed to the dispatcher untouched.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(serde_json::Value);

impl Default for Credentials {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl Credentials {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path of the command POST endpoint
    pub url: String,

    /// Path of the liveness GET endpoint
    #[serde(alias = "healthCheck")]
    pub health_check: String,

    /// Port for the web server to listen on
    pub port: u16,

    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(alias = "logLevel")]
    pub log_level: String,

    /// Message signing settings
    pub security: SigningConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "/trade".to_string(),
            health_check: "/health".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            security: SigningConfig::default(),
        }
    }
}

/// Where accepted commands are sent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// RabbitMQ connection URL; commands stay in-process when unset
    #[serde(alias = "amqpUrl")]
    pub amqp_url: Option<String>,

    /// Queue name for published commands
    pub queue: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            amqp_url: None,
            queue: DEFAULT_COMMAND_QUEUE.to_string(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub dispatch: DispatchConfig,
    pub credentials: Credentials,
}

impl Config {
    /// Load from `CONFIG_FILE` (if set) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var("CONFIG_FILE") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };

        let vars: HashMap<String, String> = env::vars().collect();
        config.apply_overrides(|name| vars.get(name).cloned())?;
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SERVER_URL") {
            self.server.url = url;
        }

        if let Some(path) = lookup("HEALTH_CHECK_URL") {
            self.server.health_check = path;
        }

        if let Some(raw) = lookup("PORT") {
            self.server.port = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "PORT",
                value: raw.clone(),
            })?;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.server.log_level = level;
        }

        if let Some(method) = lookup("SIGNING_METHOD") {
            self.server.security.method = SigningMethod::parse(&method);
        }

        if let Some(secret) = lookup("SIGNING_SECRET") {
            self.server.security.secret = secret;
        }

        if let Some(url) = lookup("CLOUDAMQP_URL") {
            self.dispatch.amqp_url = Some(url).filter(|u| !u.trim().is_empty());
        }

        if let Some(queue) = lookup("COMMAND_QUEUE") {
            self.dispatch.queue = queue;
        }

        if let Some(raw) = lookup("CREDENTIALS") {
            let value = serde_json::from_str(&raw).map_err(ConfigError::Credentials)?;
            self.credentials = Credentials::new(value);
        }

        Ok(())
    }

    /// Check route paths before they reach the router.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, path) in [
            ("server.url", &self.server.url),
            ("server.health_check", &self.server.health_check),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::InvalidPath {
                    name,
                    path: path.clone(),
                });
            }
        }

        Ok(())
    }

    /// Log configuration choices that weaken or break verification.
    pub fn warn_on_insecure_signing(&self) {
        let security = &self.server.security;
        match &security.method {
            SigningMethod::None => warn!("signature_verification_disabled"),
            SigningMethod::Unrecognized(raw) => warn!(
                signing_method = %raw,
                "signing_method_unrecognized_all_commands_rejected"
            ),
            SigningMethod::Password | SigningMethod::Hash if security.secret.is_empty() => {
                warn!(signing_method = %security.method, "signing_secret_empty")
            }
            _ => {}
        }
    }
}
