use futures_util::future::join_all;
use gitbot_core::{
    can_close_issue, role_permits, Action, IssueBody, IssueTitle, RepositoryRef, TrackedIssue,
    UserId,
};
use gitbot_protocol::{
    CloseIssueOptions, CreateIssueOptions, FormPrompt, IssueStateFilter, ListIssuesOptions,
    Reply, SubmitIssueFormOptions,
};

use super::{commit, resolve_repository, Step};
use crate::server::{
    authz::{actor_role, authorize, record_denial, require_registered_guild, ActorContext},
    core::AppState,
    errors::CommandFailure,
    tickets::{Page, Ticket, TicketError, TicketState},
};

const UNTRACKED_WARNING: &str =
    "The issue was created but could not be tracked, so it will not appear in your issue list.";

pub(crate) async fn create_issue(
    state: &AppState,
    actor: &ActorContext,
    options: CreateIssueOptions,
) -> Result<Step, CommandFailure> {
    require_registered_guild(state, &actor.guild_id).await?;
    let role = actor_role(state, actor).await;
    authorize(actor, role, Action::CreateIssue)?;
    let repository = resolve_repository(state, options.repository)?;

    match (options.title, options.body) {
        (Some(title), Some(body)) => file_issue(state, actor, repository, title, body),
        (None, None) => {
            let session_id = state.sessions.open(
                actor.guild_id.clone(),
                actor.user_id.clone(),
                repository.clone(),
            );
            Ok(
                Reply::ephemeral(format!("Fill in the form to create an issue in {repository}."))
                    .with_form(FormPrompt {
                        session_id: session_id.to_string(),
                        expires_in_secs: state.sessions.ttl().as_secs(),
                    })
                    .into(),
            )
        }
        _ => Err(CommandFailure::InvalidInput(
            "Provide both a title and a body, or neither to open the issue form.",
        )),
    }
}

/// Second step of the form flow. The session is consumed even when filing fails.
pub(crate) async fn submit_issue_form(
    state: &AppState,
    actor: &ActorContext,
    options: SubmitIssueFormOptions,
) -> Result<Step, CommandFailure> {
    require_registered_guild(state, &actor.guild_id).await?;
    let role = actor_role(state, actor).await;
    authorize(actor, role, Action::CreateIssue)?;

    let session = state
        .sessions
        .take(&options.session_id, &actor.guild_id, &actor.user_id)
        .ok_or(CommandFailure::FormExpired)?;
    file_issue(state, actor, session.repository, options.title, options.body)
}

fn file_issue(
    state: &AppState,
    actor: &ActorContext,
    repository: RepositoryRef,
    title: String,
    body: String,
) -> Result<Step, CommandFailure> {
    let title = IssueTitle::try_from(title).map_err(|_| {
        CommandFailure::InvalidInput(
            "The issue title must be 1 to 256 characters without control characters.",
        )
    })?;
    let body = IssueBody::try_from(body)
        .map_err(|_| CommandFailure::InvalidInput("The issue body is too long."))?;
    let body = format!(
        "{}\n\n---\n*Created via chat by {}*",
        body.as_str(),
        actor.user_tag
    );
    Ok(commit(create_and_track(
        state.clone(),
        actor.clone(),
        repository,
        title,
        body,
    )))
}

async fn create_and_track(
    state: AppState,
    actor: ActorContext,
    repository: RepositoryRef,
    title: IssueTitle,
    body: String,
) -> Result<Reply, CommandFailure> {
    let ticket = state
        .tickets
        .create_ticket(&repository, &title, &body)
        .await
        .map_err(|error| match error {
            TicketError::NotFound => CommandFailure::RepositoryNotFound(repository.to_string()),
            other => CommandFailure::Ticket(other),
        })?;
    tracing::info!(
        event = "tickets.create",
        outcome = "created",
        repository = %repository,
        number = ticket.number,
        user_id = %actor.user_id
    );

    let mut reply = Reply::ephemeral(format!("Your issue has been created in {repository}."))
        .with_field("Issue Number", format!("#{}", ticket.number))
        .with_field("Title", ticket.title.as_str())
        .with_field("Link", ticket.url.as_str());

    let tracked = TrackedIssue {
        issue_number: ticket.number,
        issue_title: ticket.title,
        issue_url: ticket.url,
        repository: repository.clone(),
        created_at: ticket.created_at,
        updated_at: ticket.updated_at,
    };
    if let Err(error) = state.issues.add_user_issue(&actor.user_id, tracked).await {
        tracing::error!(
            event = "issues.track",
            outcome = "error",
            repository = %repository,
            number = ticket.number,
            user_id = %actor.user_id,
            error = %error
        );
        reply = reply.with_field("Warning", UNTRACKED_WARNING);
    }
    Ok(reply)
}

pub(crate) async fn close_issue(
    state: &AppState,
    actor: &ActorContext,
    options: CloseIssueOptions,
) -> Result<Step, CommandFailure> {
    require_registered_guild(state, &actor.guild_id).await?;
    let role = actor_role(state, actor).await;
    authorize(actor, role, Action::CloseOwnIssue)?;
    let repository = resolve_repository(state, options.repository)?;
    let number = options.number;

    let ticket = state
        .tickets
        .get_ticket(&repository, number)
        .await
        .map_err(|error| ticket_failure(error, number, &repository))?;
    if ticket.state == TicketState::Closed {
        return Err(CommandFailure::TicketAlreadyClosed { number });
    }

    let owns = !role_permits(role, Action::CloseAnyIssue)
        && state.issues.owns_issue(&actor.user_id, number, &repository).await;
    if !can_close_issue(role, owns) {
        record_denial(actor, role, Action::CloseAnyIssue);
        return Err(CommandFailure::NotIssueAuthor { number });
    }

    let reason = options
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_owned);
    Ok(commit(comment_and_close(
        state.clone(),
        actor.clone(),
        repository,
        ticket,
        reason,
    )))
}

async fn comment_and_close(
    state: AppState,
    actor: ActorContext,
    repository: RepositoryRef,
    ticket: Ticket,
    reason: Option<String>,
) -> Result<Reply, CommandFailure> {
    let number = ticket.number;
    let comment = match &reason {
        Some(reason) => format!("Closed via chat by {}: {reason}", actor.user_tag),
        None => format!("Closed via chat by {}", actor.user_tag),
    };
    state
        .tickets
        .add_ticket_comment(&repository, number, &comment)
        .await
        .map_err(|error| ticket_failure(error, number, &repository))?;
    state
        .tickets
        .set_ticket_state(&repository, number, TicketState::Closed)
        .await
        .map_err(|error| ticket_failure(error, number, &repository))?;
    tracing::info!(
        event = "tickets.close",
        outcome = "closed",
        repository = %repository,
        number,
        user_id = %actor.user_id
    );

    let mut reply = Reply::ephemeral(format!("Successfully closed issue #{number}."))
        .with_field("Issue", format!("#{}: {}", ticket.number, ticket.title))
        .with_field("Link", ticket.url)
        .with_field("Repository", repository.to_string())
        .with_field("Closed By", actor.user_tag.as_str());
    if let Some(reason) = reason {
        reply = reply.with_field("Reason", reason);
    }
    Ok(reply)
}

fn ticket_failure(error: TicketError, number: u64, repository: &RepositoryRef) -> CommandFailure {
    match error {
        TicketError::NotFound => CommandFailure::TicketNotFound {
            number,
            repository: repository.to_string(),
        },
        other => CommandFailure::Ticket(other),
    }
}

enum Listing {
    Repository,
    Own,
    Member { user_id: UserId, name: String },
}

pub(crate) async fn list_issues(
    state: &AppState,
    actor: &ActorContext,
    options: ListIssuesOptions,
) -> Result<Reply, CommandFailure> {
    require_registered_guild(state, &actor.guild_id).await?;
    let role = actor_role(state, actor).await;
    authorize(actor, role, Action::ListOwnIssues)?;

    let listing = match options.user {
        Some(member) => {
            let user_id = UserId::try_from(member.id)
                .map_err(|_| CommandFailure::InvalidInput("The selected user is invalid."))?;
            if user_id == actor.user_id {
                Listing::Own
            } else {
                authorize(actor, role, Action::ListUserIssues)?;
                Listing::Member {
                    user_id,
                    name: member.name,
                }
            }
        }
        None if role_permits(role, Action::ListAllIssues) => Listing::Repository,
        None => Listing::Own,
    };
    let repository = resolve_repository(state, None)?;
    let filter = options.state;

    match listing {
        Listing::Repository => list_repository(state, &repository, filter).await,
        Listing::Own => Ok(list_tracked(state, actor, &repository, filter, None).await),
        Listing::Member { user_id, name } => Ok(list_tracked(
            state,
            actor,
            &repository,
            filter,
            Some((&user_id, name.as_str())),
        )
        .await),
    }
}

async fn list_repository(
    state: &AppState,
    repository: &RepositoryRef,
    filter: IssueStateFilter,
) -> Result<Reply, CommandFailure> {
    let tickets = state
        .tickets
        .list_tickets(repository, filter, Page::first(state.runtime.list_page_size))
        .await
        .map_err(|error| match error {
            TicketError::NotFound => CommandFailure::RepositoryNotFound(repository.to_string()),
            other => CommandFailure::Ticket(other),
        })?;
    let entries: Vec<ListedIssue> = tickets.into_iter().map(ListedIssue::from).collect();
    let heading = format!("{} Issues in {repository}", capitalize(filter.as_str()));
    let description = format!(
        "Found {} {} issues in this repository.",
        entries.len(),
        filter.as_str()
    );
    Ok(render_listing(
        &heading,
        &description,
        entries,
        state.runtime.list_display_limit,
    ))
}

/// Listing driven by the local index, refreshed from the ticket service.
async fn list_tracked(
    state: &AppState,
    actor: &ActorContext,
    repository: &RepositoryRef,
    filter: IssueStateFilter,
    member: Option<(&UserId, &str)>,
) -> Reply {
    let user_id = member.map_or(&actor.user_id, |(user_id, _)| user_id);
    let subject = member.map(|(_, name)| name);

    let tracked = state.issues.get_user_issues(user_id).await;
    if tracked.is_empty() {
        return Reply::ephemeral(match subject {
            Some(name) => format!("{name} hasn't created any issues yet."),
            None => String::from("You haven't created any issues yet."),
        });
    }
    let in_repository: Vec<TrackedIssue> = tracked
        .into_iter()
        .filter(|issue| &issue.repository == repository)
        .collect();
    if in_repository.is_empty() {
        return Reply::ephemeral(match subject {
            Some(name) => format!("{name} hasn't created any issues in {repository}."),
            None => format!("You haven't created any issues in {repository}."),
        });
    }

    let refreshed = join_all(
        in_repository
            .iter()
            .map(|issue| refresh_tracked(state, repository, issue)),
    )
    .await;
    let mut entries: Vec<ListedIssue> = refreshed
        .into_iter()
        .flatten()
        .filter(|entry| entry.matches(filter))
        .collect();
    entries.sort_by(|left, right| right.created_at.cmp(&left.created_at));

    let state_text = match filter {
        IssueStateFilter::All => String::new(),
        other => format!(" {}", other.as_str()),
    };
    if entries.is_empty() {
        return Reply::ephemeral(match subject {
            Some(name) => format!("{name} has no{state_text} issues in {repository}."),
            None => format!("You have no{state_text} issues in {repository}."),
        });
    }

    let heading = format!(
        "{}{state_text} Issues in {repository}",
        subject.unwrap_or("Your")
    );
    let description = format!(
        "Found {}{state_text} issue(s) created by {}.",
        entries.len(),
        if subject.is_some() { "this user" } else { "you" }
    );
    render_listing(
        &heading,
        &description,
        entries,
        state.runtime.list_display_limit,
    )
}

/// A missing ticket is skipped; any other failure falls back to the stored
/// record with an unknown state.
async fn refresh_tracked(
    state: &AppState,
    repository: &RepositoryRef,
    issue: &TrackedIssue,
) -> Option<ListedIssue> {
    match state.tickets.get_ticket(repository, issue.issue_number).await {
        Ok(ticket) => Some(ListedIssue::from(ticket)),
        Err(TicketError::NotFound) => {
            tracing::warn!(
                event = "issues.refresh",
                outcome = "not_found",
                repository = %repository,
                number = issue.issue_number
            );
            None
        }
        Err(error) => {
            tracing::warn!(
                event = "issues.refresh",
                outcome = "stale",
                repository = %repository,
                number = issue.issue_number,
                error = %error
            );
            Some(ListedIssue::from(issue))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListedIssue {
    number: u64,
    title: String,
    url: String,
    /// `None` when the ticket service could not be reached.
    state: Option<TicketState>,
    created_at: String,
}

impl ListedIssue {
    fn matches(&self, filter: IssueStateFilter) -> bool {
        match self.state {
            Some(state) => state.matches(filter),
            None => filter == IssueStateFilter::All,
        }
    }

    fn field_name(&self) -> String {
        let (marker, suffix) = match self.state {
            Some(TicketState::Open) => ("🟢", ""),
            Some(TicketState::Closed) => ("🔴", ""),
            None => ("⚪", " (Status Unknown)"),
        };
        format!("{marker} #{}: {}{suffix}", self.number, self.title)
    }

    fn field_value(&self) -> String {
        let date = self.created_at.get(..10).unwrap_or(&self.created_at);
        format!("{}\nCreated: {date}", self.url)
    }
}

impl From<Ticket> for ListedIssue {
    fn from(ticket: Ticket) -> Self {
        Self {
            number: ticket.number,
            title: ticket.title,
            url: ticket.url,
            state: Some(ticket.state),
            created_at: ticket.created_at,
        }
    }
}

impl From<&TrackedIssue> for ListedIssue {
    fn from(issue: &TrackedIssue) -> Self {
        Self {
            number: issue.issue_number,
            title: issue.issue_title.clone(),
            url: issue.issue_url.clone(),
            state: None,
            created_at: issue.created_at.clone(),
        }
    }
}

fn render_listing(
    heading: &str,
    description: &str,
    entries: Vec<ListedIssue>,
    display_limit: usize,
) -> Reply {
    let total = entries.len();
    let mut reply = Reply::ephemeral(format!("{heading}\n{description}"));
    for entry in entries.iter().take(display_limit) {
        reply = reply.with_field(entry.field_name(), entry.field_value());
    }
    if total > display_limit {
        reply = reply.with_field(
            "And more...",
            format!(
                "{} additional issues not shown. Use GitHub to view all issues.",
                total - display_limit
            ),
        );
    }
    reply
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use gitbot_core::{RepositoryRef, TrackedIssue};
    use gitbot_protocol::IssueStateFilter;

    use super::{capitalize, render_listing, ListedIssue};
    use crate::server::tickets::TicketState;

    fn listed(number: u64, state: Option<TicketState>) -> ListedIssue {
        ListedIssue {
            number,
            title: format!("Issue {number}"),
            url: format!("https://github.com/acme/app/issues/{number}"),
            state,
            created_at: String::from("2024-05-01T10:00:00Z"),
        }
    }

    #[test]
    fn unknown_state_only_matches_the_all_filter() {
        let entry = listed(1, None);
        assert!(entry.matches(IssueStateFilter::All));
        assert!(!entry.matches(IssueStateFilter::Open));
        assert!(!entry.matches(IssueStateFilter::Closed));
    }

    #[test]
    fn fields_show_state_marker_and_date() {
        assert_eq!(listed(4, Some(TicketState::Open)).field_name(), "🟢 #4: Issue 4");
        assert_eq!(listed(5, Some(TicketState::Closed)).field_name(), "🔴 #5: Issue 5");
        assert_eq!(
            listed(6, None).field_name(),
            "⚪ #6: Issue 6 (Status Unknown)"
        );
        assert_eq!(
            listed(6, None).field_value(),
            "https://github.com/acme/app/issues/6\nCreated: 2024-05-01"
        );
    }

    #[test]
    fn stale_entry_keeps_the_stored_record() {
        let issue = TrackedIssue {
            issue_number: 9,
            issue_title: String::from("Crash"),
            issue_url: String::from("https://github.com/acme/app/issues/9"),
            repository: RepositoryRef::try_from(String::from("acme/app")).unwrap(),
            created_at: String::from("2024-01-02T03:04:05Z"),
            updated_at: String::from("2024-01-02T03:04:05Z"),
        };
        let entry = ListedIssue::from(&issue);
        assert_eq!(entry.title, "Crash");
        assert_eq!(entry.state, None);
    }

    #[test]
    fn listing_is_truncated_with_a_summary_field() {
        let entries = (1..=12).map(|n| listed(n, Some(TicketState::Open))).collect();
        let reply = render_listing("Heading", "Found 12 issues.", entries, 10);
        assert_eq!(reply.fields.len(), 11);
        let last = reply.fields.last().unwrap();
        assert_eq!(last.name, "And more...");
        assert!(last.value.starts_with("2 additional issues"));
    }

    #[test]
    fn capitalize_handles_empty_input() {
        assert_eq!(capitalize("open"), "Open");
        assert_eq!(capitalize(""), "");
    }
}
