use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use appbase::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let config = Config::from_env();
    info!(
        target: "appbase",
        "appbase starting: RUST_LOG='{}', http_port={}, db_root='{}', session_ttl_secs={}, bootstrap_admin={}",
        rust_log,
        config.http_port,
        config.db_root,
        config.session_ttl.as_secs(),
        config.bootstrap_admin.is_some()
    );

    appbase::server::run_with_config(config).await
}
