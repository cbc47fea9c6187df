use gitbot_core::{role_permits, Action, GuildId, RegistrySnapshot, Role, UserId};
use gitbot_protocol::Actor;

use super::{core::AppState, errors::CommandFailure, metrics::record_authorization_denial};

/// Validated identity of the member who sent an interaction.
#[derive(Debug, Clone)]
pub(crate) struct ActorContext {
    pub(crate) guild_id: GuildId,
    pub(crate) user_id: UserId,
    pub(crate) user_tag: String,
    pub(crate) has_admin_role: bool,
    pub(crate) guild_admin: bool,
}

impl ActorContext {
    pub(crate) fn from_actor(
        actor: &Actor,
        admin_role_name: &str,
    ) -> Result<Self, CommandFailure> {
        let guild_id = GuildId::try_from(actor.guild_id.clone())
            .map_err(|_| CommandFailure::InvalidInput("The server id is invalid."))?;
        let user_id = UserId::try_from(actor.user_id.clone())
            .map_err(|_| CommandFailure::InvalidInput("The user id is invalid."))?;
        Ok(Self {
            guild_id,
            user_id,
            user_tag: actor.user_tag.clone(),
            has_admin_role: has_admin_role(&actor.roles, admin_role_name),
            guild_admin: actor.guild_admin,
        })
    }

    pub(crate) fn role_in(&self, snapshot: &RegistrySnapshot) -> Role {
        snapshot.role_of(&self.guild_id, &self.user_id, self.has_admin_role)
    }
}

/// Platform admin evidence: the member holds the configured admin role.
pub(crate) fn has_admin_role(roles: &[String], admin_role_name: &str) -> bool {
    roles.iter().any(|role| role == admin_role_name)
}

/// Fresh role for this invocation. Never cached across commands.
pub(crate) async fn actor_role(state: &AppState, actor: &ActorContext) -> Role {
    actor.role_in(&state.registry.snapshot().await)
}

pub(crate) fn authorize(
    actor: &ActorContext,
    role: Role,
    action: Action,
) -> Result<(), CommandFailure> {
    if role_permits(role, action) {
        return Ok(());
    }
    record_denial(actor, role, action);
    if role == Role::Blocked {
        return Err(CommandFailure::Blocked);
    }
    Err(CommandFailure::Unauthorized(action))
}

/// Counts and logs a denial at `info`.
pub(crate) fn record_denial(actor: &ActorContext, role: Role, action: Action) {
    record_authorization_denial(action.as_str());
    tracing::info!(
        event = "authz.decide",
        outcome = "denied",
        action = action.as_str(),
        role = role.as_str(),
        guild_id = %actor.guild_id,
        user_id = %actor.user_id
    );
}

pub(crate) async fn require_registered_guild(
    state: &AppState,
    guild_id: &GuildId,
) -> Result<(), CommandFailure> {
    if state.registry.has_owner(guild_id).await {
        return Ok(());
    }
    Err(CommandFailure::GuildNotRegistered)
}

#[cfg(test)]
mod tests {
    use gitbot_core::{Action, GuildId, RegistrySnapshot, Role, UserId};
    use gitbot_protocol::Actor;

    use super::{authorize, has_admin_role, ActorContext};
    use crate::server::errors::CommandFailure;

    fn actor(user_id: &str, roles: &[&str]) -> Actor {
        Actor {
            guild_id: String::from("g1"),
            user_id: user_id.to_owned(),
            user_tag: format!("{user_id}#0001"),
            roles: roles.iter().map(|role| (*role).to_owned()).collect(),
            guild_admin: false,
        }
    }

    fn guild(value: &str) -> GuildId {
        GuildId::try_from(value.to_owned()).unwrap()
    }

    fn user(value: &str) -> UserId {
        UserId::try_from(value.to_owned()).unwrap()
    }

    #[test]
    fn admin_role_must_match_exactly() {
        let roles = vec![String::from("gitbot admin"), String::from("Moderator")];
        assert!(!has_admin_role(&roles, "Gitbot Admin"));
        assert!(has_admin_role(&[String::from("Gitbot Admin")], "Gitbot Admin"));
    }

    #[test]
    fn empty_actor_ids_are_rejected() {
        let mut bad = actor("u1", &[]);
        bad.guild_id = String::new();
        assert!(matches!(
            ActorContext::from_actor(&bad, "Gitbot Admin"),
            Err(CommandFailure::InvalidInput(_))
        ));
    }

    #[test]
    fn actor_ids_are_taken_verbatim() {
        let mut matrix = actor("@alice:matrix.org", &[]);
        matrix.guild_id = String::from("!room:matrix.org");
        let context = ActorContext::from_actor(&matrix, "Gitbot Admin").unwrap();
        assert_eq!(context.guild_id.as_str(), "!room:matrix.org");
        assert_eq!(context.user_id.as_str(), "@alice:matrix.org");
    }

    #[test]
    fn owner_with_admin_role_resolves_to_owner() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.owners.register(guild("g1"), user("u1")).unwrap();
        let context = ActorContext::from_actor(&actor("u1", &["Gitbot Admin"]), "Gitbot Admin")
            .unwrap();
        assert_eq!(context.role_in(&snapshot), Role::Owner);
    }

    #[test]
    fn blocked_actor_gets_the_block_message_for_every_action() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.blocked.block(guild("g1"), user("u3"));
        let context = ActorContext::from_actor(&actor("u3", &[]), "Gitbot Admin").unwrap();
        let role = context.role_in(&snapshot);
        assert_eq!(role, Role::Blocked);
        for action in [Action::CreateIssue, Action::ListOwnIssues, Action::ManageUsers] {
            assert!(matches!(
                authorize(&context, role, action),
                Err(CommandFailure::Blocked)
            ));
        }
    }

    #[test]
    fn regular_actor_is_denied_admin_actions() {
        let context = ActorContext::from_actor(&actor("u2", &[]), "Gitbot Admin").unwrap();
        let role = context.role_in(&RegistrySnapshot::default());
        assert!(authorize(&context, role, Action::CreateIssue).is_ok());
        assert!(matches!(
            authorize(&context, role, Action::ManageUsers),
            Err(CommandFailure::Unauthorized(Action::ManageUsers))
        ));
    }
}
