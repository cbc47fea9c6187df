pub(crate) mod issues;
pub(crate) mod register;
pub(crate) mod users;

use std::future::Future;

use axum::{body::Bytes, extract::State, Json};
use futures_util::future::{BoxFuture, FutureExt};
use gitbot_core::RepositoryRef;
use gitbot_protocol::{
    command_manifest, decode_options, parse_interaction, Actor, Interaction, Reply,
    COMMAND_CLOSE_ISSUE, COMMAND_CREATE_ISSUE, COMMAND_LIST_ISSUES, COMMAND_MANAGE_USERS,
    COMMAND_REGISTER_BOT, COMMAND_SUBMIT_ISSUE_FORM,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::server::{
    authz::ActorContext,
    core::AppState,
    errors::{CommandFailure, InteractionRejection},
    metrics::{record_command, COMMAND_LABEL_UNKNOWN},
};

pub(crate) async fn interactions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Reply>, InteractionRejection> {
    let interaction = parse_interaction(&body).map_err(|error| {
        tracing::warn!(event = "interactions.parse", outcome = "rejected", error = %error);
        InteractionRejection::from(error)
    })?;
    Ok(Json(dispatch(&state, interaction).await))
}

/// What a command hands back once its reads and checks are done.
pub(crate) enum Step {
    Reply(Reply),
    /// Writes to the ticket service or the store. Started only after every
    /// check has passed, then run to completion on its own task.
    Commit(BoxFuture<'static, Result<Reply, CommandFailure>>),
}

impl From<Reply> for Step {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

pub(crate) fn commit<F>(mutation: F) -> Step
where
    F: Future<Output = Result<Reply, CommandFailure>> + Send + 'static,
{
    Step::Commit(mutation.boxed())
}

/// Runs one command. Always yields a reply.
///
/// `command_timeout` bounds the read and check phase only. Once a command
/// starts writing it runs to the end, even if the caller goes away.
pub(crate) async fn dispatch(state: &AppState, interaction: Interaction<Value>) -> Reply {
    let Interaction { t, actor, d, .. } = interaction;
    let Some(entry) = command_manifest().get(t.as_str()) else {
        let failure = CommandFailure::UnknownCommand;
        record_command(COMMAND_LABEL_UNKNOWN, failure.outcome());
        tracing::info!(
            event = "interactions.dispatch",
            outcome = "unknown_command",
            command = t.as_str()
        );
        return Reply::ephemeral(failure.user_message(t.as_str()));
    };
    let command = entry.name.as_str();

    let checked = tokio::time::timeout(
        state.runtime.command_timeout,
        run_command(state, command, &actor, d),
    )
    .await
    .unwrap_or(Err(CommandFailure::TimedOut));
    let result = match checked {
        Ok(Step::Reply(reply)) => Ok(reply),
        Ok(Step::Commit(mutation)) => match tokio::spawn(mutation).await {
            Ok(result) => result,
            Err(error) => Err(CommandFailure::from(error)),
        },
        Err(failure) => Err(failure),
    };

    match result {
        Ok(reply) => {
            record_command(command, "ok");
            tracing::info!(event = "interactions.dispatch", outcome = "ok", command);
            reply
        }
        Err(failure) => {
            record_command(command, failure.outcome());
            if failure.is_internal() {
                tracing::error!(
                    event = "interactions.dispatch",
                    outcome = failure.outcome(),
                    command,
                    guild_id = %actor.guild_id,
                    user_id = %actor.user_id,
                    error = %failure
                );
            } else {
                tracing::info!(
                    event = "interactions.dispatch",
                    outcome = failure.outcome(),
                    command,
                    reason = %failure
                );
            }
            Reply::ephemeral(failure.user_message(command))
        }
    }
}

async fn run_command(
    state: &AppState,
    command: &str,
    actor: &Actor,
    options: Value,
) -> Result<Step, CommandFailure> {
    let actor = ActorContext::from_actor(actor, &state.runtime.admin_role_name)?;
    match command {
        COMMAND_REGISTER_BOT => register::register_bot(state, &actor, decode(options)?).await,
        COMMAND_CREATE_ISSUE => issues::create_issue(state, &actor, decode(options)?).await,
        COMMAND_SUBMIT_ISSUE_FORM => {
            issues::submit_issue_form(state, &actor, decode(options)?).await
        }
        COMMAND_CLOSE_ISSUE => issues::close_issue(state, &actor, decode(options)?).await,
        COMMAND_LIST_ISSUES => issues::list_issues(state, &actor, decode(options)?)
            .await
            .map(Step::from),
        COMMAND_MANAGE_USERS => users::manage_users(state, &actor, decode(options)?).await,
        _ => Err(CommandFailure::UnknownCommand),
    }
}

fn decode<T: DeserializeOwned>(options: Value) -> Result<T, CommandFailure> {
    decode_options(options)
        .map_err(|_| CommandFailure::InvalidInput("The command options are invalid."))
}

/// Explicit option first, then the configured default.
pub(crate) fn resolve_repository(
    state: &AppState,
    requested: Option<String>,
) -> Result<RepositoryRef, CommandFailure> {
    match requested.filter(|value| !value.trim().is_empty()) {
        Some(raw) => RepositoryRef::try_from(raw.trim().to_owned())
            .map_err(|_| CommandFailure::MissingRepository),
        None => state
            .runtime
            .default_repository
            .clone()
            .ok_or(CommandFailure::MissingRepository),
    }
}

pub(crate) fn mention(user_id: impl std::fmt::Display) -> String {
    format!("<@{user_id}>")
}
