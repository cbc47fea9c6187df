use std::sync::Arc;

use gitbot_core::{BlockMap, GuildId, OwnerMap, RegistryError, RegistrySnapshot, UserId};
use tokio::sync::Mutex;

use super::store::{KvStore, StoreError, StoreKey};

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("guild already has a registered owner")]
    AlreadyRegistered,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RegistryError> for RegistrationError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::AlreadyRegistered => Self::AlreadyRegistered,
        }
    }
}

/// Guild owners and block lists, re-read from the store on every call.
///
/// Queries degrade to "absent" when the store cannot be read. Mutations run
/// one at a time, reload inside the lock, and persist before returning.
#[derive(Clone)]
pub struct RoleRegistry {
    store: KvStore,
    write_lock: Arc<Mutex<()>>,
}

impl RoleRegistry {
    #[must_use]
    pub fn new(store: KvStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current owners and block lists for one authorization decision.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            owners: self.read_owners().await,
            blocked: self.read_blocked().await,
        }
    }

    pub async fn has_owner(&self, guild_id: &GuildId) -> bool {
        self.read_owners().await.has_owner(guild_id)
    }

    /// Record the first owner of a guild.
    ///
    /// # Errors
    /// Returns [`RegistrationError::AlreadyRegistered`] if the guild already
    /// has an owner, or [`RegistrationError::Store`] if the owner map cannot
    /// be read or persisted.
    pub async fn register_owner(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<(), RegistrationError> {
        let _guard = self.write_lock.lock().await;
        let mut owners: OwnerMap = self.store.load(&StoreKey::Owners).await?.unwrap_or_default();
        owners.register(guild_id, user_id)?;
        self.store.save(&StoreKey::Owners, &owners).await?;
        Ok(())
    }

    pub async fn is_blocked(&self, guild_id: &GuildId, user_id: &UserId) -> bool {
        self.read_blocked().await.is_blocked(guild_id, user_id)
    }

    /// Returns `true` if the user was added. Nothing is written when the user
    /// is already blocked.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the block map cannot be read or persisted.
    pub async fn block_user(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut blocked: BlockMap = self.store.load(&StoreKey::Blocked).await?.unwrap_or_default();
        if !blocked.block(guild_id, user_id) {
            return Ok(false);
        }
        self.store.save(&StoreKey::Blocked, &blocked).await?;
        Ok(true)
    }

    /// Returns `true` if the user was removed.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the block map cannot be read or persisted.
    pub async fn unblock_user(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut blocked: BlockMap = self.store.load(&StoreKey::Blocked).await?.unwrap_or_default();
        if !blocked.unblock(guild_id, user_id) {
            return Ok(false);
        }
        self.store.save(&StoreKey::Blocked, &blocked).await?;
        Ok(true)
    }

    /// Blocked users of a guild in the order they were blocked.
    pub async fn list_blocked(&self, guild_id: &GuildId) -> Vec<UserId> {
        self.read_blocked().await.blocked(guild_id).to_vec()
    }

    async fn read_owners(&self) -> OwnerMap {
        match self.store.load(&StoreKey::Owners).await {
            Ok(owners) => owners.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(
                    event = "registry.read",
                    outcome = "degraded",
                    record = "owners",
                    error = %error
                );
                OwnerMap::default()
            }
        }
    }

    async fn read_blocked(&self) -> BlockMap {
        match self.store.load(&StoreKey::Blocked).await {
            Ok(blocked) => blocked.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(
                    event = "registry.read",
                    outcome = "degraded",
                    record = "blocked",
                    error = %error
                );
                BlockMap::default()
            }
        }
    }
}
