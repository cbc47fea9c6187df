use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit},
    http::{request::Request, HeaderName, StatusCode},
    routing::{get, post},
    Router,
};
use gitbot_core::RepositoryRef;
use tower::ServiceBuilder;
use tower_governor::{
    errors::GovernorError, governor::GovernorConfigBuilder, key_extractor::KeyExtractor,
    GovernorLayer,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    core::{AppConfig, AppState, MAX_LIST_PAGE_SIZE},
    handlers::interactions,
    tickets::{GitHubTickets, TicketService},
    types::{commands, health, metrics},
};

/// Rate-limit key: the connecting peer. Requests without connection info share one bucket.
#[derive(Clone, Copy)]
struct PeerIpKeyExtractor;

impl KeyExtractor for PeerIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let peer_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|value| value.0.ip())
            .or_else(|| req.extensions().get::<SocketAddr>().map(SocketAddr::ip));
        Ok(peer_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }
}

fn validate_config(config: &AppConfig) -> anyhow::Result<()> {
    if config.max_body_bytes == 0 {
        return Err(anyhow!("max body bytes must be at least 1 byte"));
    }
    if config.rate_limit_requests_per_minute == 0 {
        return Err(anyhow!(
            "rate limit must be at least 1 request per minute"
        ));
    }
    if config.max_form_sessions == 0 {
        return Err(anyhow!("max form sessions must be at least 1 session"));
    }
    if config.form_session_ttl.is_zero() {
        return Err(anyhow!("form session ttl must be at least 1 second"));
    }
    if config.list_display_limit == 0 {
        return Err(anyhow!("list display limit must be at least 1 issue"));
    }
    if config.list_page_size == 0 || config.list_page_size > MAX_LIST_PAGE_SIZE {
        return Err(anyhow!(
            "list page size must be between 1 and {MAX_LIST_PAGE_SIZE} issues"
        ));
    }
    if config.ticket_request_timeout.is_zero()
        || config.ticket_request_timeout > config.command_timeout
    {
        return Err(anyhow!(
            "ticket request timeout must be non-zero and not exceed the command timeout"
        ));
    }
    if config.command_timeout >= config.request_timeout {
        return Err(anyhow!(
            "command timeout must be shorter than the request timeout"
        ));
    }
    if config.admin_role_name.trim().is_empty() {
        return Err(anyhow!("admin role name must not be blank"));
    }
    if let Some(repository) = &config.default_repository {
        RepositoryRef::try_from(repository.clone())
            .map_err(|_| anyhow!("default repository must be in owner/repo form"))?;
    }
    Ok(())
}

/// Build the axum router backed by the GitHub issues API.
///
/// # Errors
/// Returns an error if configured limits are invalid, the GitHub token is
/// missing, or the data root cannot be opened.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    let token = config
        .github_token
        .as_deref()
        .ok_or_else(|| anyhow!("a GitHub token is required"))?;
    let tickets = GitHubTickets::new(&config.github_api_url, token, config.ticket_request_timeout)?;
    build_router_with_tickets(config, Arc::new(tickets))
}

/// Build the axum router with an injected ticket service.
///
/// # Errors
/// Returns an error if configured limits are invalid or the data root cannot
/// be opened.
pub fn build_router_with_tickets(
    config: &AppConfig,
    tickets: Arc<dyn TicketService>,
) -> anyhow::Result<Router> {
    validate_config(config)?;

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60) / config.rate_limit_requests_per_minute)
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    let app_state = AppState::new(config, tickets)?;
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/commands", get(commands))
        .route("/interactions", post(interactions))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        ))
}
