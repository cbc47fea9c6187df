#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const MAX_ISSUE_TITLE_CHARS: usize = 256;
/// Kept well under the interaction cap so JSON escaping still fits.
pub const MAX_ISSUE_BODY_BYTES: usize = 32 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("guild id is invalid")]
    InvalidGuildId,
    #[error("user id is invalid")]
    InvalidUserId,
    #[error("repository must be in owner/repo form")]
    InvalidRepository,
    #[error("issue title is invalid")]
    InvalidIssueTitle,
    #[error("issue body is invalid")]
    InvalidIssueBody,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("guild already has a registered owner")]
    AlreadyRegistered,
}

/// Community scope. Every piece of registry state is partitioned by this key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GuildId(String);

impl GuildId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GuildId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_platform_id(&value).map_err(|()| DomainError::InvalidGuildId)?;
        Ok(Self(value))
    }
}

impl From<GuildId> for String {
    fn from(value: GuildId) -> Self {
        value.0
    }
}

impl core::fmt::Display for GuildId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat-platform user identity. Opaque, like [`GuildId`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_platform_id(&value).map_err(|()| DomainError::InvalidUserId)?;
        Ok(Self(value))
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An `owner/repo` reference on the ticket service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryRef {
    owner: String,
    name: String,
}

impl RepositoryRef {
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TryFrom<String> for RepositoryRef {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (owner, name) = value
            .trim()
            .split_once('/')
            .ok_or(DomainError::InvalidRepository)?;
        validate_repository_segment(owner)?;
        validate_repository_segment(name)?;
        Ok(Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
        })
    }
}

impl From<RepositoryRef> for String {
    fn from(value: RepositoryRef) -> Self {
        value.to_string()
    }
}

impl core::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueTitle(String);

impl IssueTitle {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IssueTitle {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.is_empty()
            || trimmed.chars().count() > MAX_ISSUE_TITLE_CHARS
            || trimmed.chars().any(char::is_control)
        {
            return Err(DomainError::InvalidIssueTitle);
        }
        Ok(Self(trimmed.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueBody(String);

impl IssueBody {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IssueBody {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() > MAX_ISSUE_BODY_BYTES || value.contains('\0') {
            return Err(DomainError::InvalidIssueBody);
        }
        Ok(Self(value))
    }
}

/// Derived authorization role. Only `Owner` and `Blocked` are backed by
/// persisted state; `Admin` comes from platform evidence at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Blocked,
    Regular,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Blocked => "blocked",
            Self::Regular => "regular",
        }
    }

    #[must_use]
    pub const fn is_privileged(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateIssue,
    CloseOwnIssue,
    CloseAnyIssue,
    ListOwnIssues,
    ListUserIssues,
    ListAllIssues,
    ManageUsers,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateIssue => "create_issue",
            Self::CloseOwnIssue => "close_own_issue",
            Self::CloseAnyIssue => "close_any_issue",
            Self::ListOwnIssues => "list_own_issues",
            Self::ListUserIssues => "list_user_issues",
            Self::ListAllIssues => "list_all_issues",
            Self::ManageUsers => "manage_users",
        }
    }
}

/// Authorization Decision Function. Owner wins over admin evidence, and admin
/// evidence wins over the block list.
#[must_use]
pub fn resolve_role(is_owner: bool, has_admin_evidence: bool, is_blocked: bool) -> Role {
    if is_owner {
        return Role::Owner;
    }
    if has_admin_evidence {
        return Role::Admin;
    }
    if is_blocked {
        return Role::Blocked;
    }
    Role::Regular
}

#[must_use]
pub fn role_permits(role: Role, action: Action) -> bool {
    match role {
        Role::Owner | Role::Admin => true,
        Role::Blocked => false,
        Role::Regular => matches!(
            action,
            Action::CreateIssue | Action::CloseOwnIssue | Action::ListOwnIssues
        ),
    }
}

/// A user may close ticket N when they may close anything, or when they may
/// close their own tickets and the local index records them as its author.
#[must_use]
pub fn can_close_issue(role: Role, owns_issue: bool) -> bool {
    if role_permits(role, Action::CloseAnyIssue) {
        return true;
    }
    role_permits(role, Action::CloseOwnIssue) && owns_issue
}

/// `community -> owner`. At most one owner per guild, set once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerMap(BTreeMap<GuildId, UserId>);

impl OwnerMap {
    #[must_use]
    pub fn has_owner(&self, guild: &GuildId) -> bool {
        self.0.contains_key(guild)
    }

    #[must_use]
    pub fn owner(&self, guild: &GuildId) -> Option<&UserId> {
        self.0.get(guild)
    }

    #[must_use]
    pub fn is_owner(&self, guild: &GuildId, user: &UserId) -> bool {
        self.0.get(guild) == Some(user)
    }

    /// Record `user` as the owner of `guild`.
    ///
    /// # Errors
    /// Returns [`RegistryError::AlreadyRegistered`] if the guild already has an
    /// owner; the stored owner is left unchanged.
    pub fn register(&mut self, guild: GuildId, user: UserId) -> Result<(), RegistryError> {
        if self.0.contains_key(&guild) {
            return Err(RegistryError::AlreadyRegistered);
        }
        self.0.insert(guild, user);
        Ok(())
    }
}

/// `community -> blocked users`, kept in insertion order without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockMap(BTreeMap<GuildId, Vec<UserId>>);

impl BlockMap {
    #[must_use]
    pub fn is_blocked(&self, guild: &GuildId, user: &UserId) -> bool {
        self.0
            .get(guild)
            .is_some_and(|blocked| blocked.contains(user))
    }

    #[must_use]
    pub fn blocked(&self, guild: &GuildId) -> &[UserId] {
        self.0
            .get(guild)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns `true` when the set changed.
    pub fn block(&mut self, guild: GuildId, user: UserId) -> bool {
        let blocked = self.0.entry(guild).or_default();
        if blocked.contains(&user) {
            return false;
        }
        blocked.push(user);
        true
    }

    /// Returns `true` when the set changed. A guild whose list becomes empty is dropped.
    pub fn unblock(&mut self, guild: &GuildId, user: &UserId) -> bool {
        let Some(blocked) = self.0.get_mut(guild) else {
            return false;
        };
        let before = blocked.len();
        blocked.retain(|candidate| candidate != user);
        let changed = blocked.len() != before;
        if blocked.is_empty() {
            self.0.remove(guild);
        }
        changed
    }
}

/// Point-in-time view of the registry used for a single authorization decision.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub owners: OwnerMap,
    pub blocked: BlockMap,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn role_of(&self, guild: &GuildId, user: &UserId, has_admin_evidence: bool) -> Role {
        resolve_role(
            self.owners.is_owner(guild, user),
            has_admin_evidence,
            self.blocked.is_blocked(guild, user),
        )
    }
}

/// Local record linking a chat user to a ticket they filed. Field names are
/// camelCase on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedIssue {
    pub issue_number: u64,
    pub issue_title: String,
    pub issue_url: String,
    pub repository: RepositoryRef,
    /// RFC 3339, as reported by the ticket service.
    pub created_at: String,
    pub updated_at: String,
}

impl TrackedIssue {
    #[must_use]
    pub fn matches(&self, issue_number: u64, repository: &RepositoryRef) -> bool {
        self.issue_number == issue_number && &self.repository == repository
    }
}

#[must_use]
pub fn owns_issue(issues: &[TrackedIssue], issue_number: u64, repository: &RepositoryRef) -> bool {
    issues
        .iter()
        .any(|issue| issue.matches(issue_number, repository))
}

/// Removes every entry matching `(issue_number, repository)` and returns how
/// many were dropped.
pub fn remove_tracked_issue(
    issues: &mut Vec<TrackedIssue>,
    issue_number: u64,
    repository: &RepositoryRef,
) -> usize {
    let before = issues.len();
    issues.retain(|issue| !issue.matches(issue_number, repository));
    before - issues.len()
}

/// Platform ids are opaque. Only the empty string is refused.
fn validate_platform_id(value: &str) -> Result<(), ()> {
    if value.is_empty() {
        return Err(());
    }
    Ok(())
}

fn validate_repository_segment(value: &str) -> Result<(), DomainError> {
    if !(1..=100).contains(&value.len()) || value == "." || value == ".." {
        return Err(DomainError::InvalidRepository);
    }
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Ok(());
    }
    Err(DomainError::InvalidRepository)
}
