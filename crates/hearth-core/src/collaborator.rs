use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// A command declared in a module manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub permission: Option<String>,
    /// Static completions keyed by argument index ("0", "1", ...).
    #[serde(default)]
    pub tab_completions: BTreeMap<String, Vec<String>>,
}

impl CommandSpec {
    /// Static completions for the argument at `index`.
    pub fn completions_for(&self, index: usize) -> &[String] {
        self.tab_completions
            .get(&index.to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `label` names this command or one of its aliases.
    pub fn matches(&self, label: &str) -> bool {
        self.name.eq_ignore_ascii_case(label)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(label))
    }
}

/// Who receives a permission when nothing else grants or denies it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDefault {
    #[default]
    Op,
    NotOp,
    #[serde(rename = "true")]
    Everyone,
    #[serde(rename = "false")]
    Nobody,
}

/// A permission declared in a module manifest, already namespaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: PermissionDefault,
}

/// The host's command subsystem.
///
/// Implementations must be idempotent: registering the same list twice, or
/// unregistering commands that are not present, is not an error. Removal must
/// leave no stale dispatch or completion entries behind.
pub trait CommandRegistrar: Send + Sync {
    fn register_commands(&self, module: &str, commands: &[CommandSpec]) -> Result<()>;
    fn unregister_commands(&self, module: &str, commands: &[CommandSpec]) -> Result<()>;
}

/// The host's permission subsystem. Same idempotency rules as [`CommandRegistrar`].
pub trait PermissionRegistrar: Send + Sync {
    fn register_permissions(&self, module: &str, permissions: &[PermissionSpec]) -> Result<()>;
    fn unregister_permissions(&self, module: &str, permissions: &[PermissionSpec])
    -> Result<()>;
}

/// In-application broadcast to privileged sessions.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, message: &str) -> Result<()>;
}
