use std::{collections::BTreeSet, sync::OnceLock};

use serde::{Deserialize, Serialize};

use crate::validate_command_name;

const COMMAND_MANIFEST_JSON: &str = include_str!("commands/commands_manifest.json");
const MAX_DESCRIPTION_CHARS: usize = 100;

/// Where the platform adapter should register a command. `guild_admin`
/// commands are registered per guild once the guild has an owner, hidden from
/// members without permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandScope {
    Global,
    GuildAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandManifestEntry {
    pub name: String,
    pub description: String,
    pub scope: CommandScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandManifest {
    pub commands: Vec<CommandManifestEntry>,
}

impl CommandManifest {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandManifestEntry> {
        self.commands.iter().find(|entry| entry.name == name)
    }

    pub fn in_scope(&self, scope: CommandScope) -> impl Iterator<Item = &CommandManifestEntry> {
        self.commands.iter().filter(move |entry| entry.scope == scope)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandManifestError {
    #[error("invalid manifest json")]
    InvalidJson,
    #[error("command name `{0}` failed identifier validation")]
    InvalidCommandName(String),
    #[error("duplicate command `{0}` in manifest")]
    DuplicateCommandName(String),
    #[error("command `{0}` needs a description of 1 to 100 characters")]
    InvalidDescription(String),
}

impl From<serde_json::Error> for CommandManifestError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}

/// Parse and validate a command manifest.
///
/// # Errors
/// Returns [`CommandManifestError`] when JSON is invalid or when manifest
/// invariants fail (identifier format, duplicates, description length).
pub fn parse_command_manifest(json: &str) -> Result<CommandManifest, CommandManifestError> {
    let manifest: CommandManifest = serde_json::from_str(json)?;
    validate_command_manifest(&manifest)?;
    Ok(manifest)
}

/// Return the embedded command manifest.
///
/// # Panics
/// Panics if the embedded manifest file is invalid. This is a startup-time
/// invariant and should be prevented by tests.
#[must_use]
pub fn command_manifest() -> &'static CommandManifest {
    static MANIFEST: OnceLock<CommandManifest> = OnceLock::new();
    MANIFEST.get_or_init(|| {
        parse_command_manifest(COMMAND_MANIFEST_JSON)
            .expect("command manifest must parse and validate")
    })
}

fn validate_command_manifest(manifest: &CommandManifest) -> Result<(), CommandManifestError> {
    let mut seen = BTreeSet::new();

    for entry in &manifest.commands {
        validate_command_name(&entry.name)
            .map_err(|_| CommandManifestError::InvalidCommandName(entry.name.clone()))?;

        let description_chars = entry.description.trim().chars().count();
        if description_chars == 0 || description_chars > MAX_DESCRIPTION_CHARS {
            return Err(CommandManifestError::InvalidDescription(entry.name.clone()));
        }

        if !seen.insert(entry.name.clone()) {
            return Err(CommandManifestError::DuplicateCommandName(
                entry.name.clone(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{command_manifest, parse_command_manifest, CommandManifestError, CommandScope};
    use crate::{
        COMMAND_CLOSE_ISSUE, COMMAND_CREATE_ISSUE, COMMAND_LIST_ISSUES, COMMAND_MANAGE_USERS,
        COMMAND_REGISTER_BOT, COMMAND_SUBMIT_ISSUE_FORM,
    };

    #[test]
    fn embedded_manifest_covers_every_command() {
        let manifest = command_manifest();
        for name in [
            COMMAND_REGISTER_BOT,
            COMMAND_CREATE_ISSUE,
            COMMAND_SUBMIT_ISSUE_FORM,
            COMMAND_CLOSE_ISSUE,
            COMMAND_LIST_ISSUES,
            COMMAND_MANAGE_USERS,
        ] {
            assert!(manifest.get(name).is_some(), "{name} missing from manifest");
        }
        assert_eq!(manifest.commands.len(), 6);
    }

    #[test]
    fn only_user_management_is_admin_scoped() {
        let admin: Vec<_> = command_manifest()
            .in_scope(CommandScope::GuildAdmin)
            .map(|entry| entry.name.as_str())
            .collect();
        assert_eq!(admin, vec![COMMAND_MANAGE_USERS]);
    }

    #[test]
    fn manifest_rejects_duplicates() {
        let json = r#"{"commands":[
            {"name":"list-issues","description":"List","scope":"global"},
            {"name":"list-issues","description":"List again","scope":"global"}
        ]}"#;
        assert_eq!(
            parse_command_manifest(json).unwrap_err(),
            CommandManifestError::DuplicateCommandName(String::from("list-issues"))
        );
    }

    #[test]
    fn manifest_rejects_bad_names_and_descriptions() {
        let bad_name = r#"{"commands":[{"name":"List","description":"x","scope":"global"}]}"#;
        assert_eq!(
            parse_command_manifest(bad_name).unwrap_err(),
            CommandManifestError::InvalidCommandName(String::from("List"))
        );

        let blank = r#"{"commands":[{"name":"list","description":"  ","scope":"global"}]}"#;
        assert_eq!(
            parse_command_manifest(blank).unwrap_err(),
            CommandManifestError::InvalidDescription(String::from("list"))
        );

        assert_eq!(
            parse_command_manifest("{").unwrap_err(),
            CommandManifestError::InvalidJson
        );
    }
}
