//! Pool configuration.
//!
//! [`PoolConfig`] is owned by the pool. Every spawned connection receives a
//! [`ConnectionConfig`] snapshot taken at spawn time; later changes reach
//! live connections only through explicit pushes (`set_charset`,
//! `use_exceptions`).

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Server default character set. Connections using it skip the charset command.
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Server default collation for [`DEFAULT_CHARSET`].
pub const DEFAULT_COLLATION: &str = "utf8mb4_general_ci";

/// Default MySQL port.
pub const DEFAULT_PORT: u16 = 3306;

/// Default pool size limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Settings handed to each connection when it is constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Backend host name or address (default: "localhost").
    pub host: String,
    /// Backend port (default: 3306).
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Database selected after the handshake, if any.
    pub database: Option<String>,
    /// Connection character set (default: "utf8mb4").
    pub charset: String,
    /// Collation; empty means the server default for `charset`.
    pub collation: String,
    /// Whether server errors are raised as errors instead of status values.
    pub use_exceptions: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: None,
            database: None,
            charset: DEFAULT_CHARSET.to_string(),
            collation: String::new(),
            use_exceptions: false,
        }
    }
}

impl ConnectionConfig {
    /// Whether a freshly connected link must be switched away from the
    /// server default charset/collation.
    pub fn needs_charset_override(&self) -> bool {
        self.charset != DEFAULT_CHARSET
            || (!self.collation.is_empty() && self.collation != DEFAULT_COLLATION)
    }

    /// Builder method: set charset and collation, accepting a bare collation
    /// as the first argument (see [`resolve_charset`]).
    pub fn with_charset(self, charset: &str, collation: &str) -> Self {
        let (charset, collation) = resolve_charset(charset, collation);
        Self {
            charset,
            collation,
            ..self
        }
    }

    /// Builder method: set the error-reporting mode.
    pub fn with_exceptions(self, use_exceptions: bool) -> Self {
        Self {
            use_exceptions,
            ..self
        }
    }
}

/// Parses the `key=value;key=value` connection string form.
///
/// Recognized keys: `host` (optionally `host:port`), `user`, `pass`, `db`,
/// `charset`, `collate`. `host` is required.
impl FromStr for ConnectionConfig {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = ConnectionConfig::default();
        let mut saw_host = false;
        let mut charset = None;
        let mut collation = String::new();

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                PoolError::InvalidConfig(format!("expected key=value, got {part:?}"))
            })?;
            let value = value.trim();
            match key.trim() {
                "host" => {
                    let (host, port) = split_host_port(value)?;
                    config.host = host;
                    config.port = port;
                    saw_host = true;
                }
                "user" => config.user = value.to_string(),
                "pass" => config.password = Some(value.to_string()),
                "db" => config.database = Some(value.to_string()),
                "charset" => charset = Some(value.to_string()),
                "collate" => collation = value.to_string(),
                other => {
                    return Err(PoolError::InvalidConfig(format!(
                        "unknown connection string key: {other}"
                    )));
                }
            }
        }

        if !saw_host || config.host.is_empty() {
            return Err(PoolError::InvalidConfig(
                "connection string is missing host".to_string(),
            ));
        }

        let (charset, collation) = match charset {
            Some(charset) => resolve_charset(&charset, &collation),
            None if !collation.is_empty() => resolve_charset(&collation, ""),
            None => (config.charset.clone(), String::new()),
        };
        config.charset = charset;
        config.collation = collation;
        Ok(config)
    }
}

fn split_host_port(value: &str) -> Result<(String, u16), PoolError> {
    match value.rsplit_once(':') {
        // A second colon means a bare IPv6 address without a port.
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse()
                .map_err(|_| PoolError::InvalidConfig(format!("invalid port: {port:?}")))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((value.to_string(), DEFAULT_PORT)),
    }
}

/// Normalize a `(charset, collation)` pair.
///
/// When `collation` is empty and `charset` looks like a collation
/// (contains `_`), the argument is taken as the collation and the charset
/// is the prefix before the first `_`: `utf8_general_ci` yields
/// `("utf8", "utf8_general_ci")`.
pub fn resolve_charset(charset: &str, collation: &str) -> (String, String) {
    match charset.split_once('_') {
        Some((prefix, _)) if collation.is_empty() => (prefix.to_string(), charset.to_string()),
        _ => (charset.to_string(), collation.to_string()),
    }
}

/// Configuration for a [`ConnectionPool`](crate::pool::ConnectionPool).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum live connections the pool creates on its own (default: 100).
    pub max_connections: usize,
    /// Reopen a closed pool when a connection is requested (default: true).
    ///
    /// When disabled, a closed pool stays closed until
    /// [`ConnectionPool::reopen`](crate::pool::ConnectionPool::reopen).
    pub reopen_on_request: bool,
    /// Settings handed to every spawned connection.
    pub connection: ConnectionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            reopen_on_request: true,
            connection: ConnectionConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Load a pool configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML pool configuration.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: PoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Create a config from a `host=…;user=…;pass=…;db=…` connection string.
    pub fn from_connection_string(s: &str) -> Result<Self, PoolError> {
        Ok(Self {
            connection: s.parse()?,
            ..Self::default()
        })
    }

    /// Reject configurations the pool cannot run with.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.connection.host.is_empty() {
            return Err(PoolError::InvalidConfig("host must not be empty".to_string()));
        }
        if self.connection.charset.is_empty() {
            return Err(PoolError::InvalidConfig(
                "charset must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder method: set the pool size limit.
    pub fn with_max_connections(self, max_connections: usize) -> Self {
        Self {
            max_connections,
            ..self
        }
    }

    /// Builder method: set the reopen-on-request policy.
    pub fn with_reopen_on_request(self, reopen_on_request: bool) -> Self {
        Self {
            reopen_on_request,
            ..self
        }
    }

    /// Builder method: set the per-connection settings.
    pub fn with_connection(self, connection: ConnectionConfig) -> Self {
        Self { connection, ..self }
    }
}
