use gitbot_protocol::{RegisterBotOptions, Reply};

use super::{commit, mention, Step};
use crate::server::{
    authz::ActorContext, core::AppState, errors::CommandFailure, registry::RegistrationError,
};

/// First-time setup. The invoking guild administrator becomes the owner.
pub(crate) async fn register_bot(
    state: &AppState,
    actor: &ActorContext,
    _options: RegisterBotOptions,
) -> Result<Step, CommandFailure> {
    if !actor.guild_admin {
        return Err(CommandFailure::RegistrationForbidden);
    }
    if state.registry.has_owner(&actor.guild_id).await {
        return Err(CommandFailure::AlreadyRegistered);
    }
    Ok(commit(register(state.clone(), actor.clone())))
}

async fn register(state: AppState, actor: ActorContext) -> Result<Reply, CommandFailure> {
    state
        .registry
        .register_owner(actor.guild_id.clone(), actor.user_id.clone())
        .await
        .map_err(|error| match error {
            RegistrationError::AlreadyRegistered => CommandFailure::AlreadyRegistered,
            RegistrationError::Store(error) => CommandFailure::Store(error),
        })?;

    tracing::info!(
        event = "registry.register_owner",
        outcome = "registered",
        guild_id = %actor.guild_id,
        user_id = %actor.user_id
    );

    let admin_role = &state.runtime.admin_role_name;
    Ok(Reply::ephemeral(format!(
        "The bot has been successfully set up for this server. Add users to the `{admin_role}` role to assign admins."
    ))
    .with_field("Owner", mention(&actor.user_id))
    .with_field("Admin Role", admin_role.as_str()))
}
