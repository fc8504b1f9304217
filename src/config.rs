//! Environment-driven server configuration.
//! All knobs come from `APPBASE_*` variables with sensible defaults so the
//! binary starts with no configuration at all.

use std::time::Duration;

/// Runtime configuration resolved once at startup and carried in AppState.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub http_port: u16,
    /// Root folder for the entity store.
    pub db_root: String,
    /// Session lifetime; expiry is fixed at issue time (no sliding renewal).
    pub session_ttl: Duration,
    /// Optional `username:password` pair for the one-time bootstrap admin.
    pub bootstrap_admin: Option<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 7878,
            db_root: "data".to_string(),
            session_ttl: Duration::from_secs(86_400),
            bootstrap_admin: None,
        }
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let http_port = std::env::var("APPBASE_HTTP_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(defaults.http_port);
        let db_root = std::env::var("APPBASE_DB_FOLDER").unwrap_or(defaults.db_root);
        let session_ttl = std::env::var("APPBASE_SESSION_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.session_ttl);
        let bootstrap_admin = std::env::var("APPBASE_BOOTSTRAP_ADMIN")
            .ok()
            .and_then(|s| parse_bootstrap(&s));
        Self { http_port, db_root, session_ttl, bootstrap_admin }
    }
}

fn parse_bootstrap(raw: &str) -> Option<(String, String)> {
    let (user, pass) = raw.split_once(':')?;
    if user.is_empty() || pass.is_empty() {
        return None;
    }
    Some((user.to_string(), pass.to_string()))
}
