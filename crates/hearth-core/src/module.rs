use std::path::{Path, PathBuf};

use crate::api::ModuleApi;
use crate::error::{HearthError, Result};

/// The host's module interface.
///
/// Entry points are synchronous; the host calls them from its sandbox worker
/// pool and bounds how long each may run. Long-running code should poll
/// [`ModuleApi::is_cancelled`] and return early once it flips.
pub trait Module: Send {
    /// Called once after construction with the module's own API handle.
    fn initialize(&mut self, api: ModuleApi, config: &ModuleConfig) -> Result<()>;

    /// Called when the module is unloaded or reloaded.
    fn disable(&mut self) -> Result<()>;

    /// Optional hook run after a successful `initialize`.
    fn on_enable(&mut self) -> Result<()> {
        Ok(())
    }

    /// Handle one of the module's declared commands. Returns whether it was handled.
    fn on_command(
        &mut self,
        _sender: &CommandSender,
        _command: &str,
        _args: &[String],
    ) -> Result<bool> {
        Ok(false)
    }

    /// Completions for a partially typed command.
    fn on_tab_complete(
        &mut self,
        _sender: &CommandSender,
        _command: &str,
        _args: &[String],
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Persist in-memory state; invoked on crash before the module is disabled.
    fn save_data(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Whoever issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSender {
    pub name: String,
    pub privileged: bool,
}

impl CommandSender {
    pub fn console() -> Self {
        Self {
            name: "console".into(),
            privileged: true,
        }
    }
}

// ── Legacy modules ─────────────────────────────────────────────

/// Parameter types a legacy entry point may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Api,
    Config,
    Sender,
    Text,
    TextList,
}

/// Name and parameter list of one method exposed by a legacy module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodShape {
    pub name: String,
    pub params: Vec<ParamKind>,
}

impl MethodShape {
    pub fn new(name: impl Into<String>, params: &[ParamKind]) -> Self {
        Self {
            name: name.into(),
            params: params.to_vec(),
        }
    }
}

/// An argument passed to a legacy entry point.
pub enum Arg {
    Api(ModuleApi),
    Config(ModuleConfig),
    Sender(CommandSender),
    Text(String),
    TextList(Vec<String>),
}

/// A module that does not implement [`Module`] but exposes methods by name.
///
/// The host inspects the declared [`MethodShape`]s once at load time and
/// only accepts the module if shapes for `initialize(api, config)` and
/// `disable()` are present.
pub trait ReflectiveModule: Send {
    fn invoke(&mut self, method: &str, args: Vec<Arg>) -> Result<()>;

    /// Invoke a method that answers with a list of strings, such as tab
    /// completion. The default runs [`invoke`](Self::invoke) and answers
    /// with nothing.
    fn invoke_for_list(&mut self, method: &str, args: Vec<Arg>) -> Result<Vec<String>> {
        self.invoke(method, args).map(|()| Vec::new())
    }
}

// ── Per-module configuration ───────────────────────────────────

/// A module's own `config.toml`.
#[derive(Debug, Clone, Default)]
pub struct ModuleConfig {
    path: PathBuf,
    values: toml::Table,
}

impl ModuleConfig {
    /// Load from disk. A missing file yields an empty config bound to `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            raw.parse::<toml::Table>().map_err(|e| {
                HearthError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            toml::Table::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &toml::Table {
        &self.values
    }

    /// The `enabled` flag; absent means enabled.
    pub fn enabled(&self) -> bool {
        self.get_bool("enabled").unwrap_or(true)
    }

    pub fn version(&self) -> Option<&str> {
        self.get_str("version")
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_integer())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<toml::Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Write the config back to its file, creating parent directories.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(&self.values)
            .map_err(|e| HearthError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}
