use gitbot_core::{Action, Role, UserId};
use gitbot_protocol::{ManageUsersAction, ManageUsersOptions, Reply, TargetMember};

use super::{commit, mention, Step};
use crate::server::{
    authz::{authorize, has_admin_role, ActorContext},
    core::AppState,
    errors::CommandFailure,
};

pub(crate) async fn manage_users(
    state: &AppState,
    actor: &ActorContext,
    options: ManageUsersOptions,
) -> Result<Step, CommandFailure> {
    let snapshot = state.registry.snapshot().await;
    authorize(actor, actor.role_in(&snapshot), Action::ManageUsers)?;

    match options.action {
        ManageUsersAction::Block => {
            let target = required_target(options.user)?;
            let user_id = target_id(&target)?;
            let admin_evidence = has_admin_role(&target.roles, &state.runtime.admin_role_name);
            match snapshot.role_of(&actor.guild_id, &user_id, admin_evidence) {
                Role::Blocked => Ok(already_blocked(&target.name).into()),
                role @ (Role::Owner | Role::Admin) => Err(CommandFailure::ProtectedMember {
                    name: target.name,
                    role,
                }),
                Role::Regular => Ok(commit(block(
                    state.clone(),
                    actor.clone(),
                    user_id,
                    target.name,
                ))),
            }
        }
        ManageUsersAction::Unblock => {
            let target = required_target(options.user)?;
            let user_id = target_id(&target)?;
            Ok(commit(unblock(
                state.clone(),
                actor.clone(),
                user_id,
                target.name,
            )))
        }
        ManageUsersAction::ListBlocked => {
            let blocked = state.registry.list_blocked(&actor.guild_id).await;
            let value = if blocked.is_empty() {
                String::from("No users are currently blocked.")
            } else {
                blocked.iter().map(mention).collect::<Vec<_>>().join("\n")
            };
            Ok(
                Reply::ephemeral("List of all users blocked from using the bot.")
                    .with_field("Blocked Users", value)
                    .into(),
            )
        }
    }
}

async fn block(
    state: AppState,
    actor: ActorContext,
    user_id: UserId,
    name: String,
) -> Result<Reply, CommandFailure> {
    if !state
        .registry
        .block_user(actor.guild_id.clone(), user_id.clone())
        .await?
    {
        return Ok(already_blocked(&name));
    }
    tracing::info!(
        event = "registry.block",
        outcome = "blocked",
        guild_id = %actor.guild_id,
        target_user_id = %user_id,
        user_id = %actor.user_id
    );
    Ok(
        Reply::ephemeral(format!("{name} has been blocked from using the bot."))
            .with_field("Blocked User", mention(&user_id))
            .with_field("Blocked By", mention(&actor.user_id)),
    )
}

async fn unblock(
    state: AppState,
    actor: ActorContext,
    user_id: UserId,
    name: String,
) -> Result<Reply, CommandFailure> {
    if !state.registry.unblock_user(&actor.guild_id, &user_id).await? {
        return Ok(Reply::ephemeral(format!(
            "{name} is not blocked from using the bot."
        )));
    }
    tracing::info!(
        event = "registry.unblock",
        outcome = "unblocked",
        guild_id = %actor.guild_id,
        target_user_id = %user_id,
        user_id = %actor.user_id
    );
    Ok(
        Reply::ephemeral(format!("{name} has been unblocked and can now use the bot."))
            .with_field("Unblocked User", mention(&user_id))
            .with_field("Unblocked By", mention(&actor.user_id)),
    )
}

fn required_target(user: Option<TargetMember>) -> Result<TargetMember, CommandFailure> {
    user.ok_or(CommandFailure::InvalidInput("Select a user for this action."))
}

fn target_id(target: &TargetMember) -> Result<UserId, CommandFailure> {
    UserId::try_from(target.id.clone())
        .map_err(|_| CommandFailure::InvalidInput("The selected user is invalid."))
}

fn already_blocked(name: &str) -> Reply {
    Reply::ephemeral(format!("{name} is already blocked from using the bot."))
}
