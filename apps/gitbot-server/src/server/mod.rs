pub(crate) mod authz;
pub(crate) mod core;
pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod issues;
pub(crate) mod metrics;
pub(crate) mod registry;
pub(crate) mod router;
pub(crate) mod sessions;
pub(crate) mod store;
pub(crate) mod tickets;
pub(crate) mod types;

pub use core::{
    AppConfig, DEFAULT_ADMIN_ROLE_NAME, DEFAULT_GITHUB_API_URL, DEFAULT_LIST_DISPLAY_LIMIT,
    MAX_LIST_PAGE_SIZE,
};
pub use errors::init_tracing;
pub use issues::IssueIndex;
pub use registry::{RegistrationError, RoleRegistry};
pub use router::{build_router, build_router_with_tickets};
pub use store::{KvStore, StoreError, StoreKey};
pub use tickets::{GitHubTickets, Page, Ticket, TicketError, TicketService, TicketState};
