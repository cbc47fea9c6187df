#![forbid(unsafe_code)]

mod server;

pub use server::{
    build_router, build_router_with_tickets, init_tracing, AppConfig, GitHubTickets, IssueIndex,
    KvStore, Page, RegistrationError, RoleRegistry, StoreError, StoreKey, Ticket, TicketError,
    TicketService, TicketState, DEFAULT_ADMIN_ROLE_NAME, DEFAULT_GITHUB_API_URL,
    DEFAULT_LIST_DISPLAY_LIMIT, MAX_LIST_PAGE_SIZE,
};
