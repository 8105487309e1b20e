//! Environment-driven service configuration.

use crate::{Error, Result};
use std::str::FromStr;

/// Port that switches the relay connection to implicit TLS.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Upstream relay settings. Present only in relay mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Relay hostname, also used for certificate verification.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Username for AUTH PLAIN and the envelope sender.
    pub username: Option<String>,
    /// Password for AUTH PLAIN.
    pub password: Option<String>,
}

impl RelayConfig {
    /// Creates relay settings without credentials.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Adds credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Username and password, when both are set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    /// Whether the connection starts with a TLS handshake.
    #[must_use]
    pub const fn implicit_tls(&self) -> bool {
        self.port == IMPLICIT_TLS_PORT
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SMTP listen port.
    pub smtp_port: u16,
    /// Greeting and HELO domain.
    pub smtp_domain: String,
    /// `SQLite` database path.
    pub database_path: String,
    /// Relay settings; `None` selects direct MX delivery.
    pub relay: Option<RelayConfig>,
    /// Envelope sender when no relay username is set, and the `From` of
    /// directly delivered messages.
    pub default_envelope: String,
    /// Number of dispatch workers.
    pub dispatch_workers: usize,
    /// Dispatch queue capacity.
    pub dispatch_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            smtp_port: 2525,
            smtp_domain: "localhost".to_string(),
            database_path: "mail.db".to_string(),
            relay: None,
            default_envelope: "postmaster@localhost".to_string(),
            dispatch_workers: 4,
            dispatch_queue: 256,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric variable does not parse or a count
    /// is zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let relay = match non_empty("SMTP_RELAY_HOST") {
            Some(host) => Some(RelayConfig {
                host: host.trim().to_string(),
                port: parse_var(&lookup, "SMTP_RELAY_PORT", 587)?,
                username: non_empty("SMTP_RELAY_USER"),
                password: non_empty("SMTP_RELAY_PASS"),
            }),
            None => None,
        };

        let config = Self {
            smtp_port: parse_var(&lookup, "SMTP_PORT", defaults.smtp_port)?,
            smtp_domain: text("SMTP_DOMAIN", defaults.smtp_domain),
            database_path: text("DB_FILE", defaults.database_path),
            relay,
            default_envelope: text("DEFAULT_ENVELOPE", defaults.default_envelope),
            dispatch_workers: parse_var(&lookup, "DISPATCH_WORKERS", defaults.dispatch_workers)?,
            dispatch_queue: parse_var(&lookup, "DISPATCH_QUEUE", defaults.dispatch_queue)?,
        };

        if config.dispatch_workers == 0 || config.dispatch_queue == 0 {
            return Err(Error::Config(
                "DISPATCH_WORKERS and DISPATCH_QUEUE must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key} is not a valid number: {value:?}"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.smtp_port, 2525);
        assert!(config.relay.is_none());
    }

    #[test]
    fn test_relay_mode() {
        let config = load(&[
            ("SMTP_RELAY_HOST", "smtp.example.com"),
            ("SMTP_RELAY_PORT", "465"),
            ("SMTP_RELAY_USER", "bot@example.com"),
            ("SMTP_RELAY_PASS", "secret"),
        ])
        .unwrap();

        let relay = config.relay.unwrap();
        assert_eq!(relay.host, "smtp.example.com");
        assert!(relay.implicit_tls());
        assert_eq!(relay.credentials(), Some(("bot@example.com", "secret")));
    }

    #[test]
    fn test_empty_relay_host_is_direct_mode() {
        let config = load(&[("SMTP_RELAY_HOST", "  "), ("SMTP_RELAY_PORT", "bogus")]).unwrap();
        assert!(config.relay.is_none());
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let config = load(&[("SMTP_RELAY_HOST", "relay"), ("SMTP_RELAY_USER", "u")]).unwrap();
        let relay = config.relay.unwrap();
        assert_eq!(relay.port, 587);
        assert_eq!(relay.credentials(), None);
        assert!(!relay.implicit_tls());
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(matches!(load(&[("SMTP_PORT", "http")]), Err(Error::Config(_))));
        assert!(matches!(load(&[("SMTP_PORT", "70000")]), Err(Error::Config(_))));
        assert!(matches!(load(&[("DISPATCH_WORKERS", "0")]), Err(Error::Config(_))));
    }
}
