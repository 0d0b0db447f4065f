//! Runtime settings, read from the environment.
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var} value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone)]
pub struct Config {
    pub bind_host: IpAddr,
    pub port: u16,
    /// Password for `/kick`. `None` turns operator commands off.
    pub operator_secret: Option<String>,
    pub chat_log: PathBuf,
    pub server_log: PathBuf,
    /// How long shutdown waits for connections and log writers to drain.
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            operator_secret: None,
            chat_log: PathBuf::from("chat.log"),
            server_log: PathBuf::from("server.log"),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

// Keep the secret out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_host", &self.bind_host)
            .field("port", &self.port)
            .field("operator_secret", &self.operator_secret.as_ref().map(|_| "<set>"))
            .field("chat_log", &self.chat_log)
            .field("server_log", &self.server_log)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

fn parse_var<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

impl Config {
    /// Settings from the process environment.
    ///
    /// `PORT`, `BIND_HOST`, `ADMIN_PASSWORD`, `CHAT_LOG`, `SERVER_LOG`,
    /// `SHUTDOWN_GRACE_SECS`. Anything unset keeps its default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            config.port = parse_var("PORT", port)?;
        }
        if let Some(host) = get("BIND_HOST") {
            config.bind_host = parse_var("BIND_HOST", host)?;
        }
        if let Some(secret) = lookup("ADMIN_PASSWORD").filter(|v| !v.is_empty()) {
            config.operator_secret = Some(secret);
        }
        if let Some(path) = get("CHAT_LOG") {
            config.chat_log = PathBuf::from(path);
        }
        if let Some(path) = get("SERVER_LOG") {
            config.server_log = PathBuf::from(path);
        }
        if let Some(secs) = get("SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = Duration::from_secs(parse_var("SHUTDOWN_GRACE_SECS", secs)?);
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }
}
