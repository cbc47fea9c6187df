#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use gitbot_server::{build_router, init_tracing, AppConfig};
use tokio::net::TcpListener;

fn env_secs(name: &str, default: Duration) -> anyhow::Result<Duration> {
    std::env::var(name).map_or_else(
        |_| Ok(default),
        |value| {
            value
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| anyhow::anyhow!("invalid {name} value {value:?}: {e}"))
        },
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let github_token = std::env::var("GITBOT_GITHUB_TOKEN")
        .map_err(|_| anyhow::anyhow!("GITBOT_GITHUB_TOKEN is required for runtime"))?;
    let defaults = AppConfig::default();
    let app_config = AppConfig {
        data_root: Some(
            std::env::var("GITBOT_DATA_ROOT")
                .map_or_else(|_| PathBuf::from("./data"), PathBuf::from),
        ),
        default_repository: std::env::var("GITBOT_DEFAULT_REPO").ok(),
        github_token: Some(github_token),
        github_api_url: std::env::var("GITBOT_GITHUB_API_URL")
            .unwrap_or_else(|_| defaults.github_api_url.clone()),
        admin_role_name: std::env::var("GITBOT_ADMIN_ROLE_NAME")
            .unwrap_or_else(|_| defaults.admin_role_name.clone()),
        ticket_request_timeout: env_secs(
            "GITBOT_TICKET_TIMEOUT_SECS",
            defaults.ticket_request_timeout,
        )?,
        form_session_ttl: env_secs("GITBOT_FORM_SESSION_TTL_SECS", defaults.form_session_ttl)?,
        ..defaults
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("GITBOT_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid GITBOT_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gitbot-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
