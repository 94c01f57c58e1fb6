use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::error::{HearthError, Result};
use crate::event::{Event, EventBus};
use crate::shared::{ListenerRegistry, SharedData};

/// On-disk locations owned by one module, namespaced by its name.
///
/// Nothing is created until first accessed through [`ModuleApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub config: PathBuf,
    pub resources: PathBuf,
}

impl ModulePaths {
    pub fn new(data_root: &Path, module: &str) -> Self {
        let root = data_root.join(module);
        Self {
            data: root.join("data"),
            config: root.join("config.toml"),
            resources: root.join("resources"),
            root,
        }
    }
}

/// What the host exposes to module API handles.
pub trait HostServices: Send + Sync {
    fn paths(&self, module: &str) -> ModulePaths;
    fn is_loaded(&self, module: &str) -> bool;
    fn loaded_modules(&self) -> Vec<String>;
    fn module_version(&self, module: &str) -> Option<String>;
    fn shared_data(&self) -> &SharedData;
    fn listeners(&self) -> &ListenerRegistry;
    fn events(&self) -> &EventBus;
    fn broadcast(&self, message: &str) -> Result<()>;
}

/// Capability-scoped handle given to one module.
///
/// Holds only the module's name and a weak reference to the host, so a module
/// keeping its handle around never keeps the host (or itself) alive.
#[derive(Clone)]
pub struct ModuleApi {
    name: String,
    host: Weak<dyn HostServices>,
}

impl std::fmt::Debug for ModuleApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleApi").field("name", &self.name).finish()
    }
}

impl ModuleApi {
    pub fn new(name: impl Into<String>, host: Weak<dyn HostServices>) -> Self {
        Self {
            name: name.into(),
            host,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> Result<Arc<dyn HostServices>> {
        self.host
            .upgrade()
            .ok_or_else(|| HearthError::module(&self.name, "host has shut down"))
    }

    /// The host, for calls that change state visible to other modules.
    /// Refused once the current invocation was cancelled or the module is
    /// no longer registered, so work finishing after a timeout stays inert.
    fn writable_host(&self, operation: &str) -> Result<Arc<dyn HostServices>> {
        if crate::context::is_cancelled() {
            debug!(module = %self.name, operation, "write refused after cancellation");
            return Err(HearthError::Cancelled(self.name.clone()));
        }
        let host = self.host()?;
        if !host.is_loaded(&self.name) {
            debug!(module = %self.name, operation, "write refused for unloaded module");
            return Err(HearthError::NotLoaded(self.name.clone()));
        }
        Ok(host)
    }

    /// Whether the current invocation has been cancelled by the sandbox.
    pub fn is_cancelled(&self) -> bool {
        crate::context::is_cancelled()
    }

    // ── Files ──────────────────────────────────────────────────

    /// The module's data directory, created on first access.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = self.host()?.paths(&self.name).data;
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// The module's resources directory, created on first access.
    pub fn resources_dir(&self) -> Result<PathBuf> {
        let dir = self.host()?.paths(&self.name).resources;
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Path of the module's `config.toml`; its parent is created on access.
    pub fn config_file(&self) -> Result<PathBuf> {
        let paths = self.host()?.paths(&self.name);
        std::fs::create_dir_all(&paths.root)?;
        Ok(paths.config)
    }

    // ── Other modules ──────────────────────────────────────────

    pub fn is_module_loaded(&self, module: &str) -> bool {
        self.host().map(|h| h.is_loaded(module)).unwrap_or(false)
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        self.host().map(|h| h.loaded_modules()).unwrap_or_default()
    }

    pub fn module_version(&self, module: &str) -> Option<String> {
        self.host().ok().and_then(|h| h.module_version(module))
    }

    // ── Shared data ────────────────────────────────────────────

    pub fn set_shared(&self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        self.writable_host("set_shared")?
            .shared_data()
            .set(&self.name, key, value);
        Ok(())
    }

    pub fn get_shared(&self, key: &str) -> Option<serde_json::Value> {
        self.host().ok().and_then(|h| h.shared_data().get(key))
    }

    // ── Events ─────────────────────────────────────────────────

    /// Listen for host events of `kind` (`"*"` for all).
    pub fn register_listener(
        &self,
        kind: impl Into<String>,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<()> {
        self.writable_host("register_listener")?
            .listeners()
            .register(&self.name, kind, Arc::new(listener));
        Ok(())
    }

    /// Publish a module-defined event.
    pub fn publish(&self, name: impl Into<String>, payload: serde_json::Value) -> Result<()> {
        self.writable_host("publish")?.events().publish(Event::Custom {
            source: self.name.clone(),
            name: name.into(),
            payload,
        });
        Ok(())
    }

    /// Broadcast a message to privileged sessions.
    pub fn broadcast(&self, message: &str) -> Result<()> {
        self.host()?.broadcast(message)
    }
}
