use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use gitbot_core::{GuildId, RepositoryRef, UserId};
use ulid::Ulid;

/// Pending two-step issue creation, bound to the member who started it.
#[derive(Debug, Clone)]
pub(crate) struct FormSession {
    pub(crate) guild_id: GuildId,
    pub(crate) user_id: UserId,
    pub(crate) repository: RepositoryRef,
    expires_at: Instant,
}

/// Short-lived form sessions with a TTL and a hard capacity.
pub(crate) struct FormSessions {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<Ulid, FormSession>>,
}

impl FormSessions {
    pub(crate) fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn open(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        repository: RepositoryRef,
    ) -> Ulid {
        self.open_at(Instant::now(), guild_id, user_id, repository)
    }

    pub(crate) fn take(
        &self,
        session_id: &str,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Option<FormSession> {
        self.take_at(Instant::now(), session_id, guild_id, user_id)
    }

    fn open_at(
        &self,
        now: Instant,
        guild_id: GuildId,
        user_id: UserId,
        repository: RepositoryRef,
    ) -> Ulid {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, session| {
            session.expires_at > now
                && !(session.guild_id == guild_id && session.user_id == user_id)
        });
        while entries.len() >= self.capacity {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, session)| session.expires_at)
                .map(|(id, _)| *id)
            else {
                break;
            };
            entries.remove(&oldest);
            tracing::debug!(event = "sessions.open", outcome = "evicted", session_id = %oldest);
        }

        let session_id = Ulid::new();
        entries.insert(
            session_id,
            FormSession {
                guild_id,
                user_id,
                repository,
                expires_at: now + self.ttl,
            },
        );
        session_id
    }

    fn take_at(
        &self,
        now: Instant,
        session_id: &str,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Option<FormSession> {
        let session_id = Ulid::from_string(session_id).ok()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let session = entries.get(&session_id)?;
        if &session.guild_id != guild_id || &session.user_id != user_id {
            return None;
        }
        let session = entries.remove(&session_id)?;
        (session.expires_at > now).then_some(session)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use gitbot_core::{GuildId, RepositoryRef, UserId};

    use super::FormSessions;

    fn guild(value: &str) -> GuildId {
        GuildId::try_from(value.to_owned()).unwrap()
    }

    fn user(value: &str) -> UserId {
        UserId::try_from(value.to_owned()).unwrap()
    }

    fn repo() -> RepositoryRef {
        RepositoryRef::try_from(String::from("acme/app")).unwrap()
    }

    #[test]
    fn session_is_taken_once_by_its_owner() {
        let sessions = FormSessions::new(Duration::from_secs(60), 8);
        let now = Instant::now();
        let id = sessions.open_at(now, guild("g1"), user("u1"), repo()).to_string();

        assert!(sessions.take_at(now, &id, &guild("g1"), &user("u2")).is_none());
        assert!(sessions.take_at(now, &id, &guild("g2"), &user("u1")).is_none());

        let taken = sessions.take_at(now, &id, &guild("g1"), &user("u1")).unwrap();
        assert_eq!(taken.repository, repo());
        assert!(sessions.take_at(now, &id, &guild("g1"), &user("u1")).is_none());
    }

    #[test]
    fn expired_session_is_rejected_and_dropped() {
        let sessions = FormSessions::new(Duration::from_secs(60), 8);
        let now = Instant::now();
        let id = sessions.open_at(now, guild("g1"), user("u1"), repo()).to_string();

        let later = now + Duration::from_secs(61);
        assert!(sessions.take_at(later, &id, &guild("g1"), &user("u1")).is_none());
        assert_eq!(sessions.len(), 0);
    }

    #[test]
    fn reopening_replaces_the_previous_session() {
        let sessions = FormSessions::new(Duration::from_secs(60), 8);
        let now = Instant::now();
        let first = sessions.open_at(now, guild("g1"), user("u1"), repo()).to_string();
        let second = sessions.open_at(now, guild("g1"), user("u1"), repo()).to_string();

        assert_eq!(sessions.len(), 1);
        assert!(sessions.take_at(now, &first, &guild("g1"), &user("u1")).is_none());
        assert!(sessions.take_at(now, &second, &guild("g1"), &user("u1")).is_some());
    }

    #[test]
    fn expired_sessions_are_purged_on_open() {
        let sessions = FormSessions::new(Duration::from_secs(60), 8);
        let now = Instant::now();
        sessions.open_at(now, guild("g1"), user("u1"), repo());
        sessions.open_at(now, guild("g1"), user("u2"), repo());

        sessions.open_at(now + Duration::from_secs(120), guild("g1"), user("u3"), repo());
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn capacity_evicts_the_oldest_session() {
        let sessions = FormSessions::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        let oldest = sessions.open_at(now, guild("g1"), user("u1"), repo()).to_string();
        sessions.open_at(now + Duration::from_secs(1), guild("g1"), user("u2"), repo());
        sessions.open_at(now + Duration::from_secs(2), guild("g1"), user("u3"), repo());

        assert_eq!(sessions.len(), 2);
        let at = now + Duration::from_secs(3);
        assert!(sessions.take_at(at, &oldest, &guild("g1"), &user("u1")).is_none());
    }

    #[test]
    fn malformed_session_id_is_rejected() {
        let sessions = FormSessions::new(Duration::from_secs(60), 2);
        assert!(sessions.take("not-a-ulid", &guild("g1"), &user("u1")).is_none());
    }
}
