use std::{env, fmt, net::SocketAddr};

use thiserror::Error;

use super::{database_url, server_bind_address};

const DEFAULT_USERNAME: &str = "user";
const DEFAULT_PASSWORD: &str = "password";
const DEFAULT_PUBLIC_PATHS: &str = "/healthz,/metrics";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// The single username/password pair accepted by HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Access rules resolved once at startup and handed to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    pub credentials: BasicCredentials,
    /// Path prefixes reachable without credentials.
    pub public_paths: Vec<String>,
}

impl SecurityConfig {
    pub fn new(credentials: BasicCredentials, public_paths: Vec<String>) -> Self {
        Self {
            credentials,
            public_paths,
        }
    }

    /// Returns `true` when `path` equals a public prefix or lives below it.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn from_env(environment: Environment) -> Result<Self, ConfigError> {
        let username = credential_var("APP_AUTH_USERNAME", DEFAULT_USERNAME, environment)?;
        let password = credential_var("APP_AUTH_PASSWORD", DEFAULT_PASSWORD, environment)?;
        let public_paths = parse_public_paths(
            &env::var("APP_PUBLIC_PATHS").unwrap_or_else(|_| DEFAULT_PUBLIC_PATHS.to_string()),
        )?;

        Ok(Self::new(
            BasicCredentials::new(username, password),
            public_paths,
        ))
    }
}

fn credential_var(
    name: &'static str,
    default: &str,
    environment: Environment,
) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ if environment == Environment::Production => Err(ConfigError::MissingVariable(name)),
        _ => Ok(default.to_string()),
    }
}

fn parse_public_paths(raw: &str) -> Result<Vec<String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            if item.starts_with('/') {
                Ok(item.trim_end_matches('/').to_string())
            } else {
                Err(ConfigError::InvalidPublicPath(item.to_string()))
            }
        })
        .collect()
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub security: SecurityConfig,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let security = SecurityConfig::from_env(environment)?;

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            security,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("APP_ENV must be one of 'development', 'production', or 'test' (got {0})")]
    InvalidEnvironment(String),
    #[error("invalid APP_BIND_ADDR value: {0}")]
    BindAddress(std::net::AddrParseError),
    #[error("{0} must be set in production")]
    MissingVariable(&'static str),
    #[error("APP_PUBLIC_PATHS entries must start with '/' (got {0})")]
    InvalidPublicPath(String),
}

#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));
