use axum::{http::StatusCode, response::IntoResponse, Json};
use gitbot_core::{Action, Role};
use gitbot_protocol::ProtocolError;

use super::{store::StoreError, tickets::TicketError, types::ErrorResponse};

const GUILD_NOT_REGISTERED_MESSAGE: &str = "This server does not have a registered bot owner yet. Please ask a server administrator to use the `/register-bot` command to set up the bot.";
const BLOCKED_MESSAGE: &str = "You have been blocked from using this bot. Please contact a server administrator if you believe this is a mistake.";

/// Why a command did not complete. Every variant still produces a reply.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandFailure {
    #[error("guild has no registered owner")]
    GuildNotRegistered,
    #[error("guild already has a registered owner")]
    AlreadyRegistered,
    #[error("registration requires guild administrator permission")]
    RegistrationForbidden,
    #[error("actor is blocked")]
    Blocked,
    #[error("actor may not {}", .0.as_str())]
    Unauthorized(Action),
    #[error("actor did not file issue #{number}")]
    NotIssueAuthor { number: u64 },
    #[error("target member {name} is a bot {}", .role.as_str())]
    ProtectedMember { name: String, role: Role },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("no repository given and no default configured")]
    MissingRepository,
    #[error("repository {0} is not reachable")]
    RepositoryNotFound(String),
    #[error("unknown command")]
    UnknownCommand,
    #[error("form session missing or expired")]
    FormExpired,
    #[error("issue #{number} not found in {repository}")]
    TicketNotFound { number: u64, repository: String },
    #[error("issue #{number} is already closed")]
    TicketAlreadyClosed { number: u64 },
    #[error("command exceeded its deadline")]
    TimedOut,
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("command task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl CommandFailure {
    /// Label for `gitbot_commands_total`.
    pub(crate) const fn outcome(&self) -> &'static str {
        match self {
            Self::Blocked
            | Self::Unauthorized(_)
            | Self::NotIssueAuthor { .. }
            | Self::RegistrationForbidden
            | Self::ProtectedMember { .. } => "denied",
            Self::GuildNotRegistered
            | Self::AlreadyRegistered
            | Self::InvalidInput(_)
            | Self::MissingRepository
            | Self::UnknownCommand
            | Self::FormExpired
            | Self::TicketAlreadyClosed { .. } => "rejected",
            Self::RepositoryNotFound(_) | Self::TicketNotFound { .. } => "not_found",
            Self::TimedOut => "timeout",
            Self::Ticket(_) | Self::Store(_) | Self::Task(_) => "error",
        }
    }

    /// Failures caused by a collaborator rather than by the actor.
    pub(crate) const fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Ticket(_) | Self::Store(_) | Self::Task(_) | Self::TimedOut
        )
    }

    /// Text shown to the member who ran `command`.
    pub(crate) fn user_message(&self, command: &str) -> String {
        match self {
            Self::GuildNotRegistered => String::from(GUILD_NOT_REGISTERED_MESSAGE),
            Self::AlreadyRegistered => String::from("This server is already set up."),
            Self::RegistrationForbidden => {
                String::from("Only server administrators can set up the bot.")
            }
            Self::Blocked => String::from(BLOCKED_MESSAGE),
            Self::Unauthorized(Action::ManageUsers) => String::from(
                "You do not have permission to manage users. Only the bot owner and administrators can use this command.",
            ),
            Self::Unauthorized(Action::ListUserIssues) => {
                String::from("You do not have permission to view other users' issues.")
            }
            Self::Unauthorized(_) => {
                String::from("You do not have permission to use this command.")
            }
            Self::NotIssueAuthor { number } => format!(
                "You can only close issues that you created. Issue #{number} was created by someone else."
            ),
            Self::ProtectedMember { name, role } => format!(
                "You cannot block {name} because they are a bot {}.",
                role.as_str()
            ),
            Self::InvalidInput(message) => (*message).to_owned(),
            Self::MissingRepository => String::from(
                "Please provide a valid repository in the format `owner/repo` or ask an administrator to configure a default repository.",
            ),
            Self::RepositoryNotFound(repository) => format!(
                "Repository {repository} was not found or the bot cannot access it."
            ),
            Self::UnknownCommand => String::from("Unknown command."),
            Self::FormExpired => String::from(
                "This issue form has expired. Please run `/create-issue` again.",
            ),
            Self::TicketNotFound { number, repository } => {
                format!("Issue #{number} not found in {repository}.")
            }
            Self::TicketAlreadyClosed { number } => format!("Issue #{number} is already closed."),
            Self::TimedOut | Self::Ticket(_) | Self::Store(_) | Self::Task(_) => format!(
                "An error occurred while {}. Please try again later.",
                command_activity(command)
            ),
        }
    }
}

fn command_activity(command: &str) -> &'static str {
    match command {
        gitbot_protocol::COMMAND_REGISTER_BOT => "setting up the bot",
        gitbot_protocol::COMMAND_CREATE_ISSUE | gitbot_protocol::COMMAND_SUBMIT_ISSUE_FORM => {
            "creating the issue"
        }
        gitbot_protocol::COMMAND_CLOSE_ISSUE => "closing the issue",
        gitbot_protocol::COMMAND_LIST_ISSUES => "listing issues",
        gitbot_protocol::COMMAND_MANAGE_USERS => "managing users",
        _ => "processing the command",
    }
}

/// Envelope-level rejection. Anything past envelope parsing answers `200`.
#[derive(Debug)]
pub(crate) enum InteractionRejection {
    InvalidInteraction,
    PayloadTooLarge,
}

impl From<ProtocolError> for InteractionRejection {
    fn from(value: ProtocolError) -> Self {
        match value {
            ProtocolError::OversizedPayload { .. } => Self::PayloadTooLarge,
            ProtocolError::UnsupportedVersion { .. }
            | ProtocolError::InvalidCommandName
            | ProtocolError::InvalidJson
            | ProtocolError::InvalidOptions => Self::InvalidInteraction,
        }
    }
}

impl IntoResponse for InteractionRejection {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::InvalidInteraction => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "invalid_interaction",
                }),
            )
                .into_response(),
            Self::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ErrorResponse {
                    error: "payload_too_large",
                }),
            )
                .into_response(),
        }
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}

#[cfg(test)]
mod tests {
    use gitbot_core::{Action, Role};
    use gitbot_protocol::{ProtocolError, COMMAND_CLOSE_ISSUE, COMMAND_MANAGE_USERS};

    use super::{CommandFailure, InteractionRejection};
    use crate::server::tickets::TicketError;

    #[test]
    fn internal_failures_share_a_generic_message() {
        let failure = CommandFailure::Ticket(TicketError::Status { status: 502 });
        assert!(failure.is_internal());
        assert_eq!(failure.outcome(), "error");
        assert_eq!(
            failure.user_message(COMMAND_CLOSE_ISSUE),
            "An error occurred while closing the issue. Please try again later."
        );
    }

    #[test]
    fn denials_are_not_internal() {
        let failure = CommandFailure::Unauthorized(Action::ManageUsers);
        assert!(!failure.is_internal());
        assert_eq!(failure.outcome(), "denied");
        assert!(failure
            .user_message(COMMAND_MANAGE_USERS)
            .starts_with("You do not have permission to manage users."));
    }

    #[test]
    fn protected_member_names_the_role() {
        let failure = CommandFailure::ProtectedMember {
            name: String::from("carol"),
            role: Role::Owner,
        };
        assert_eq!(
            failure.user_message(COMMAND_MANAGE_USERS),
            "You cannot block carol because they are a bot owner."
        );
    }

    #[test]
    fn oversized_payloads_map_to_their_own_rejection() {
        let rejection = InteractionRejection::from(ProtocolError::OversizedPayload {
            max: 1,
            actual: 2,
        });
        assert!(matches!(rejection, InteractionRejection::PayloadTooLarge));
        assert!(matches!(
            InteractionRejection::from(ProtocolError::InvalidJson),
            InteractionRejection::InvalidInteraction
        ));
    }
}
