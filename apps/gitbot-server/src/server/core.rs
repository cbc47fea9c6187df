use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use gitbot_core::RepositoryRef;

use super::{
    issues::IssueIndex, registry::RoleRegistry, sessions::FormSessions, store::KvStore,
    tickets::TicketService,
};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 64 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 9;
pub const DEFAULT_TICKET_REQUEST_TIMEOUT_SECS: u64 = 8;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 120;
pub const DEFAULT_FORM_SESSION_TTL_SECS: u64 = 15 * 60;
pub const DEFAULT_MAX_FORM_SESSIONS: usize = 1024;
pub const DEFAULT_LIST_DISPLAY_LIMIT: usize = 10;
pub const DEFAULT_LIST_PAGE_SIZE: u8 = 100;
pub const DEFAULT_ADMIN_ROLE_NAME: &str = "Gitbot Admin";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const MAX_LIST_PAGE_SIZE: u8 = 100;
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) commands: Mutex<HashMap<(&'static str, &'static str), u64>>,
    pub(crate) authorization_denials: Mutex<HashMap<&'static str, u64>>,
    pub(crate) store_corrupt_records: Mutex<HashMap<&'static str, u64>>,
    pub(crate) ticket_service_failures: Mutex<HashMap<&'static str, u64>>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    /// Upper bound for one command, ticket-service calls included. Must stay
    /// below `request_timeout` so a reply always goes out.
    pub command_timeout: Duration,
    pub ticket_request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    /// `None` keeps all state in memory.
    pub data_root: Option<PathBuf>,
    pub default_repository: Option<String>,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub admin_role_name: String,
    pub form_session_ttl: Duration,
    pub max_form_sessions: usize,
    pub list_display_limit: usize,
    pub list_page_size: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            ticket_request_timeout: Duration::from_secs(DEFAULT_TICKET_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            data_root: None,
            default_repository: None,
            github_token: None,
            github_api_url: String::from(DEFAULT_GITHUB_API_URL),
            admin_role_name: String::from(DEFAULT_ADMIN_ROLE_NAME),
            form_session_ttl: Duration::from_secs(DEFAULT_FORM_SESSION_TTL_SECS),
            max_form_sessions: DEFAULT_MAX_FORM_SESSIONS,
            list_display_limit: DEFAULT_LIST_DISPLAY_LIMIT,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RuntimeConfig {
    pub(crate) admin_role_name: String,
    pub(crate) default_repository: Option<RepositoryRef>,
    pub(crate) command_timeout: Duration,
    pub(crate) list_display_limit: usize,
    pub(crate) list_page_size: u8,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) registry: RoleRegistry,
    pub(crate) issues: IssueIndex,
    pub(crate) tickets: Arc<dyn TicketService>,
    pub(crate) sessions: Arc<FormSessions>,
    pub(crate) runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig, tickets: Arc<dyn TicketService>) -> anyhow::Result<Self> {
        let store = match &config.data_root {
            Some(root) => KvStore::open(root)?,
            None => KvStore::in_memory(),
        };
        let default_repository = config
            .default_repository
            .as_ref()
            .map(|raw| {
                RepositoryRef::try_from(raw.clone())
                    .map_err(|_| anyhow!("default repository must be in owner/repo form"))
            })
            .transpose()?;

        Ok(Self {
            registry: RoleRegistry::new(store.clone()),
            issues: IssueIndex::new(store),
            tickets,
            sessions: Arc::new(FormSessions::new(
                config.form_session_ttl,
                config.max_form_sessions,
            )),
            runtime: Arc::new(RuntimeConfig {
                admin_role_name: config.admin_role_name.trim().to_owned(),
                default_repository,
                command_timeout: config.command_timeout,
                list_display_limit: config.list_display_limit,
                list_page_size: config.list_page_size,
            }),
        })
    }
}
