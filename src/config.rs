//! IMAP connection configuration

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Well-known IMAPS port.
pub const IMAPS_PORT: u16 = 993;

/// Default bound on TCP connect + TLS handshake + greeting.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a blocking response retrieval.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Skip certificate verification (self-signed bridges, test servers).
    pub accept_invalid_certs: bool,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
}

impl ImapConfig {
    /// Configuration for `host` on the IMAPS port with default timeouts.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: IMAPS_PORT,
            username: username.into(),
            password: password.into(),
            accept_invalid_certs: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_PORT` (default: `993`)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    /// - `IMAP_CONNECT_TIMEOUT_SECS` (default: `10`)
    /// - `IMAP_RESPONSE_TIMEOUT_SECS` (default: `30`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("IMAP_PORT", IMAPS_PORT)?,
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
            accept_invalid_certs: parse_var("IMAP_ACCEPT_INVALID_CERTS", false)?,
            connect_timeout: Duration::from_secs(parse_var(
                "IMAP_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT.as_secs(),
            )?),
            response_timeout: Duration::from_secs(parse_var(
                "IMAP_RESPONSE_TIMEOUT_SECS",
                DEFAULT_RESPONSE_TIMEOUT.as_secs(),
            )?),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
