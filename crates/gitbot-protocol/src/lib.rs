#![forbid(unsafe_code)]

mod commands;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub use commands::{
    command_manifest, parse_command_manifest, CommandManifest, CommandManifestEntry,
    CommandManifestError, CommandScope,
};

/// Current interaction envelope version.
pub const PROTOCOL_VERSION: u16 = 1;
/// Maximum allowed interaction payload bytes.
pub const MAX_INTERACTION_BYTES: usize = 64 * 1024;

pub const COMMAND_REGISTER_BOT: &str = "register-bot";
pub const COMMAND_CREATE_ISSUE: &str = "create-issue";
pub const COMMAND_SUBMIT_ISSUE_FORM: &str = "create-issue-submit";
pub const COMMAND_CLOSE_ISSUE: &str = "close-issue";
pub const COMMAND_LIST_ISSUES: &str = "list-issues";
pub const COMMAND_MANAGE_USERS: &str = "manage-users";

/// Versioned interaction envelope forwarded by the chat-platform adapter.
/// All interactions use `{ v, t, actor, d }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Interaction<T> {
    pub v: u16,
    pub t: CommandName,
    pub actor: Actor,
    pub d: T,
}

/// The member who triggered the interaction, as seen by the platform at
/// invocation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Actor {
    pub guild_id: String,
    pub user_id: String,
    pub user_tag: String,
    /// Names of the platform roles the member holds in this guild.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Whether the platform grants the member guild administrator permission.
    #[serde(default)]
    pub guild_admin: bool,
}

/// Command identifier with a strict character allowlist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommandName(String);

impl CommandName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommandName {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_command_name(&value)?;
        Ok(Self(value))
    }
}

impl From<CommandName> for String {
    fn from(value: CommandName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterBotOptions {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateIssueOptions {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

/// Second step of the form-based creation flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitIssueFormOptions {
    pub session_id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseIssueOptions {
    pub number: u64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStateFilter {
    Open,
    Closed,
    #[default]
    All,
}

impl IssueStateFilter {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListIssuesOptions {
    #[serde(default)]
    pub user: Option<TargetMember>,
    #[serde(default)]
    pub state: IssueStateFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManageUsersAction {
    Block,
    Unblock,
    ListBlocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManageUsersOptions {
    pub action: ManageUsersAction,
    #[serde(default)]
    pub user: Option<TargetMember>,
}

/// A member referenced by a command option, with the platform roles they hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetMember {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Response returned for every accepted interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub content: String,
    pub ephemeral: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ReplyField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<FormPrompt>,
}

impl Reply {
    #[must_use]
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
            fields: Vec::new(),
            form: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(ReplyField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn with_form(mut self, form: FormPrompt) -> Self {
        self.form = Some(form);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyField {
    pub name: String,
    pub value: String,
}

/// Asks the platform adapter to collect title and body, then send them back
/// as `create-issue-submit` with the same session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormPrompt {
    pub session_id: String,
    pub expires_in_secs: u64,
}

/// Parse and validate an incoming interaction at the network boundary.
///
/// # Errors
/// Returns [`ProtocolError`] if the payload exceeds limits, is malformed JSON,
/// contains an unsupported version, or has an invalid command name.
pub fn parse_interaction(input: &[u8]) -> Result<Interaction<serde_json::Value>, ProtocolError> {
    if input.len() > MAX_INTERACTION_BYTES {
        return Err(ProtocolError::OversizedPayload {
            max: MAX_INTERACTION_BYTES,
            actual: input.len(),
        });
    }

    let interaction: Interaction<serde_json::Value> = serde_json::from_slice(input)?;
    if interaction.v != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion {
            expected: PROTOCOL_VERSION,
            actual: interaction.v,
        });
    }

    Ok(interaction)
}

/// Decode the `d` payload of an interaction into typed command options.
/// `null` is treated as an empty object.
///
/// # Errors
/// Returns [`ProtocolError::InvalidOptions`] when the payload does not match `T`.
pub fn decode_options<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ProtocolError> {
    let value = if value.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|_| ProtocolError::InvalidOptions)
}

pub(crate) fn validate_command_name(value: &str) -> Result<(), ProtocolError> {
    const MAX_LEN: usize = 32;

    if value.is_empty() || value.len() > MAX_LEN {
        return Err(ProtocolError::InvalidCommandName);
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(ProtocolError::InvalidCommandName);
    }

    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Ok(());
    }

    Err(ProtocolError::InvalidCommandName)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload exceeds max size: max={max} bytes actual={actual} bytes")]
    OversizedPayload { max: usize, actual: usize },
    #[error("unsupported envelope version: expected={expected} actual={actual}")]
    UnsupportedVersion { expected: u16, actual: u16 },
    #[error("invalid command name")]
    InvalidCommandName,
    #[error("invalid json payload")]
    InvalidJson,
    #[error("invalid command options")]
    InvalidOptions,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}
