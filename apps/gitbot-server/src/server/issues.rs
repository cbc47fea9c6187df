use std::sync::Arc;

use gitbot_core::{owns_issue, remove_tracked_issue, RepositoryRef, TrackedIssue, UserId};
use tokio::sync::Mutex;

use super::store::{KvStore, StoreError, StoreKey};

/// Per-user record of filed tickets, kept in creation order.
///
/// The index is evidence of authorship only. Ticket state always comes from
/// the ticket service, and entries are never pruned when a ticket disappears.
#[derive(Clone)]
pub struct IssueIndex {
    store: KvStore,
    write_lock: Arc<Mutex<()>>,
}

impl IssueIndex {
    #[must_use]
    pub fn new(store: KvStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get_user_issues(&self, user_id: &UserId) -> Vec<TrackedIssue> {
        match self.store.load(&StoreKey::UserIssues(user_id.clone())).await {
            Ok(issues) => issues.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(
                    event = "issues.read",
                    outcome = "degraded",
                    user_id = %user_id,
                    error = %error
                );
                Vec::new()
            }
        }
    }

    /// Appends `issue` without checking for an existing entry with the same
    /// number and repository.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the list cannot be read or persisted.
    pub async fn add_user_issue(
        &self,
        user_id: &UserId,
        issue: TrackedIssue,
    ) -> Result<Vec<TrackedIssue>, StoreError> {
        let key = StoreKey::UserIssues(user_id.clone());
        let _guard = self.write_lock.lock().await;
        let mut issues: Vec<TrackedIssue> = self.store.load(&key).await?.unwrap_or_default();
        issues.push(issue);
        self.store.save(&key, &issues).await?;
        Ok(issues)
    }

    /// Drops every entry matching both `issue_number` and `repository`.
    ///
    /// # Errors
    /// Returns [`StoreError`] if the list cannot be read or persisted.
    pub async fn remove_user_issue(
        &self,
        user_id: &UserId,
        issue_number: u64,
        repository: &RepositoryRef,
    ) -> Result<Vec<TrackedIssue>, StoreError> {
        let key = StoreKey::UserIssues(user_id.clone());
        let _guard = self.write_lock.lock().await;
        let mut issues: Vec<TrackedIssue> = self.store.load(&key).await?.unwrap_or_default();
        if remove_tracked_issue(&mut issues, issue_number, repository) > 0 {
            self.store.save(&key, &issues).await?;
        }
        Ok(issues)
    }

    /// # Errors
    /// Returns [`StoreError`] if the empty list cannot be persisted.
    pub async fn clear_user_issues(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<TrackedIssue>, StoreError> {
        let key = StoreKey::UserIssues(user_id.clone());
        let _guard = self.write_lock.lock().await;
        let issues = Vec::new();
        self.store.save(&key, &issues).await?;
        Ok(issues)
    }

    /// Whether the index records `user_id` as the author of ticket
    /// `issue_number` in `repository`.
    pub async fn owns_issue(
        &self,
        user_id: &UserId,
        issue_number: u64,
        repository: &RepositoryRef,
    ) -> bool {
        owns_issue(
            &self.get_user_issues(user_id).await,
            issue_number,
            repository,
        )
    }
}
