use std::time::Duration;

use anyhow::Context as _;
use secrecy::SecretString;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Process-level settings, read once at startup.
///
/// HTTP client settings (API base URLs, bot token) live with their clients;
/// this only carries what the server and the poll loop need.
#[derive(Clone)]
pub struct Config {
    /// Shared secret for webhook signature verification.
    ///
    /// When unset, signatures are not checked at all. That is a permissive
    /// dev-mode posture; `main` warns about it at startup.
    pub webhook_secret: Option<SecretString>,
    pub database_url: String,
    pub port: u16,
    pub poll_interval: Duration,
}

impl Config {
    pub fn new_from_env() -> anyhow::Result<Config> {
        let webhook_secret = std::env::var("GITHUB_WEBHOOK_SECRET")
            .ok()
            .filter(|secret| !secret.is_empty())
            .map(SecretString::from);
        let database_url = std::env::var("DATABASE_URL").context("needs DATABASE_URL")?;
        let port = match std::env::var("PORT") {
            Ok(port) => port.parse().context("PORT must be a number")?,
            Err(_) => DEFAULT_PORT,
        };
        let poll_interval = match std::env::var("POLL_INTERVAL_SECS") {
            Ok(secs) => Duration::from_secs(
                secs.parse().context("POLL_INTERVAL_SECS must be a number")?,
            ),
            Err(_) => Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        };

        Ok(Config {
            webhook_secret,
            database_url,
            port,
            poll_interval,
        })
    }
}
