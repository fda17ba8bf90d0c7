//! Configuration management
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `CONVEYOR__`-prefixed environment variables (`CONVEYOR__AUTH__ACCESS_SECRET`).

use crate::error::{ConveyorError, ConveyorResult, ErrorContext};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConveyorConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub scm: ScmConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Token signing material and lifetimes
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC key for user access tokens
    pub access_secret: String,
    /// HMAC key for user refresh tokens; must differ from `access_secret`
    pub refresh_secret: String,
    /// HMAC key shared by worker-facing and server-to-worker tokens
    pub worker_secret: String,
    /// Pre-shared secret the platform's own worker presents verbatim
    pub server_secret: Option<String>,
    /// Subject given to server-worker claims
    pub server_worker_subject: String,
    pub durations: TokenDurations,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            worker_secret: String::new(),
            server_secret: None,
            server_worker_subject: "conveyor-server".to_string(),
            durations: TokenDurations::default(),
        }
    }
}

// Secrets stay out of debug output.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("worker_secret", &"<redacted>")
            .field("server_secret", &self.server_secret.as_ref().map(|_| "<redacted>"))
            .field("server_worker_subject", &self.server_worker_subject)
            .field("durations", &self.durations)
            .finish()
    }
}

/// Longest lifetime any token kind may be configured with (one year)
pub const MAX_TOKEN_DURATION_SECS: i64 = 365 * 24 * 60 * 60;

/// Default token lifetimes per kind, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenDurations {
    pub user_access: i64,
    pub user_refresh: i64,
    pub worker_register: i64,
    pub worker_auth: i64,
    pub worker_build: i64,
    pub id_request: i64,
    pub server_worker: i64,
}

impl Default for TokenDurations {
    fn default() -> Self {
        Self {
            user_access: 15 * 60,
            user_refresh: 8 * 60 * 60,
            worker_register: 60 * 60,
            worker_auth: 20 * 60,
            worker_build: 35 * 60,
            id_request: 35 * 60,
            server_worker: 60 * 60,
        }
    }
}

impl TokenDurations {
    fn all(&self) -> [(&'static str, i64); 7] {
        [
            ("user_access", self.user_access),
            ("user_refresh", self.user_refresh),
            ("worker_register", self.worker_register),
            ("worker_auth", self.worker_auth),
            ("worker_build", self.worker_build),
            ("id_request", self.id_request),
            ("server_worker", self.server_worker),
        ]
    }
}

/// SCM provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScmConfig {
    pub base_url: String,
    /// Deadline for every SCM call made while authorizing a request
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            timeout_ms: 10_000,
            user_agent: "conveyor/0.1".to_string(),
        }
    }
}

impl ConveyorConfig {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> ConveyorResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CONVEYOR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().map_err(|e| ConveyorError::Config {
            message: format!("Failed to read configuration: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("load"),
        })?;

        settings
            .try_deserialize::<ConveyorConfig>()
            .map_err(|e| ConveyorError::Config {
                message: format!("Failed to parse configuration: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config").with_operation("deserialize"),
            })
    }

    /// Validate configuration
    pub fn validate(&self) -> ConveyorResult<()> {
        let auth = &self.auth;

        for (field, value) in [
            ("auth.access_secret", &auth.access_secret),
            ("auth.refresh_secret", &auth.refresh_secret),
            ("auth.worker_secret", &auth.worker_secret),
        ] {
            if value.is_empty() {
                return Err(crate::config_error!(
                    format!("{} must be set", field),
                    "config"
                ));
            }
        }

        if auth.access_secret == auth.refresh_secret {
            return Err(crate::config_error!(
                "auth.access_secret and auth.refresh_secret must differ",
                "config"
            ));
        }

        if matches!(&auth.server_secret, Some(secret) if secret.is_empty()) {
            return Err(crate::config_error!(
                "auth.server_secret must not be empty when set",
                "config"
            ));
        }

        if auth.server_worker_subject.trim().is_empty() {
            return Err(crate::config_error!(
                "auth.server_worker_subject must be set",
                "config"
            ));
        }

        for (kind, seconds) in auth.durations.all() {
            if seconds <= 0 {
                return Err(crate::config_error!(
                    format!("auth.durations.{} must be greater than 0", kind),
                    "config"
                ));
            }
            if seconds > MAX_TOKEN_DURATION_SECS {
                return Err(crate::config_error!(
                    format!(
                        "auth.durations.{} must be at most {} seconds",
                        kind, MAX_TOKEN_DURATION_SECS
                    ),
                    "config"
                ));
            }
        }

        url::Url::parse(&self.scm.base_url).map_err(|e| ConveyorError::Config {
            message: format!("Invalid scm.base_url '{}': {}", self.scm.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("validate"),
        })?;

        if self.scm.timeout_ms == 0 {
            return Err(crate::config_error!(
                "scm.timeout_ms must be greater than 0",
                "config"
            ));
        }

        Ok(())
    }
}
