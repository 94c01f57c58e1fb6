//! Single-module load and teardown.
//!
//! A load walks INSTANTIATING → INITIALIZING → ENABLED; a teardown goes
//! through DISABLING (or QUARANTINED) and removes the record. Both run under
//! the module's name lock.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use hearth_core::context::{ContextGuard, Frame, Interrupt};
use hearth_core::{
    CommandSender, CommandSpec, Event, HearthError, Module, ModuleApi, ModulePaths, Result,
};

use super::{ModuleManager, layout, report_failure};
use crate::archive::ModuleMetadata;
use crate::contract::{self, DispatchTable};
use crate::loader::ModuleLoader;
use crate::registry::{ModuleHandle, ModuleRecord, ModuleState};

/// How long a lifecycle call waits for an instance still held by a call
/// that timed out.
const INSTANCE_WAIT: Duration = Duration::from_millis(250);

impl ModuleManager {
    /// Load an inspected archive. Failures are logged once here and returned.
    pub(crate) async fn load_validated(
        &self,
        metadata: ModuleMetadata,
        archive: PathBuf,
    ) -> Result<()> {
        let name = metadata.name.clone();
        let outcome = self
            .with_name_lock(&name, self.load_locked(metadata, archive))
            .await;
        if let Err(e) = &outcome {
            report_failure(&name, e);
        }
        outcome
    }

    /// The load sequence proper. Caller holds the name lock.
    pub(crate) async fn load_locked(&self, metadata: ModuleMetadata, archive: PathBuf) -> Result<()> {
        let name = metadata.name.clone();

        if let Some(existing) = self.registry.get(&name) {
            debug!(module = %name, loaded_from = ?existing.archive, rejected = ?archive, "name already registered");
            return Err(HearthError::DuplicateModule(name));
        }

        for dependency in &metadata.depends {
            let satisfied = self
                .registry
                .get(dependency)
                .is_some_and(|r| r.state == ModuleState::Enabled);
            if satisfied {
                continue;
            }
            if self.config.host.ignore_failed_dependencies {
                warn!(module = %name, dependency = %dependency, "dependency not loaded, continuing");
            } else {
                return Err(HearthError::DependencyMissing {
                    module: name,
                    dependency: dependency.clone(),
                });
            }
        }

        let paths = ModulePaths::new(&self.config.host.data_dir, &name);
        let config = layout::bootstrap_config(&paths, &metadata.version)?;
        if !config.enabled() {
            return Err(HearthError::ModuleDisabled(name));
        }

        // ── INSTANTIATING ──
        let metadata = Arc::new(metadata);
        let loader = Arc::new(ModuleLoader::new(
            self.next_loader_id(),
            &name,
            &archive,
            self.host_loader.clone(),
            metadata.checksum.clone(),
        ));
        let placeholder = self.registry.upsert(ModuleRecord {
            metadata: metadata.clone(),
            archive: archive.clone(),
            loader,
            instance: None,
            dispatch: None,
            state: ModuleState::Instantiating,
            sequence: self.registry.next_sequence(),
            loaded_at: Utc::now(),
        });

        let (instance, dispatch) = match self.instantiate(&placeholder) {
            Ok(built) => built,
            Err(e) => {
                self.discard(&placeholder);
                return Err(e);
            }
        };
        let handle = ModuleHandle::new(instance);

        // ── INITIALIZING ──
        let mut record = placeholder.with_state(ModuleState::Initializing);
        record.instance = Some(handle.clone());
        record.dispatch = Some(Arc::new(dispatch));
        let record = self.registry.upsert(record);

        if self.config.host.extract_resources {
            match layout::extract_resources(&archive, &paths.resources) {
                Ok(0) => {}
                Ok(n) => debug!(module = %name, files = n, "extracted resources"),
                Err(e) => warn!(module = %name, error = %e, "resource extraction failed"),
            }
        }

        let api = ModuleApi::new(name.clone(), self.host_services());
        let init = {
            let handle = handle.clone();
            let name = name.clone();
            let config = config.clone();
            move || handle.with(&name, INSTANCE_WAIT, |m| m.initialize(api, &config))
        };
        if let Err(failure) = self.sandbox.run(&name, "initialize", init).await {
            // Escalation already quarantined the record unless something
            // else replaced it first.
            let still_ours = self
                .registry
                .get(&name)
                .is_some_and(|r| r.sequence == record.sequence);
            if still_ours {
                self.teardown(&name, true).await;
            }
            return Err(HearthError::InitializationFailed {
                module: name,
                kind: failure.kind,
                reason: failure.message,
            });
        }

        if record.dispatch.as_ref().is_some_and(|d| d.on_enable.is_some()) {
            let handle = handle.clone();
            let module = name.clone();
            let enabled = self
                .sandbox
                .run_bounded(&name, "on_enable", None, move || {
                    handle.with(&module, INSTANCE_WAIT, |m| m.on_enable())
                })
                .await;
            if let Err(e) = enabled {
                warn!(module = %name, error = %e, "on_enable failed");
            }
        }

        // ── ENABLED ──
        let record = self.registry.upsert(record.with_state(ModuleState::Enabled));
        if let Err(e) = self.register_collaborators(&record).await {
            warn!(module = %name, error = %e, "collaborator registration failed");
        }
        self.events.publish(Event::ModuleLoaded {
            module: name.clone(),
            version: metadata.version.clone(),
        });
        info!(
            module = %name,
            version = %metadata.version,
            commands = metadata.commands.len(),
            "module enabled"
        );
        Ok(())
    }

    /// Resolve the entry class, check the contract, construct. Runs inside a
    /// context frame so constructor code sees its own module.
    fn instantiate(&self, record: &ModuleRecord) -> Result<(Box<dyn Module>, DispatchTable)> {
        let name = record.name();
        let _frame = ContextGuard::enter(Frame {
            module: name.to_string(),
            loader_id: record.loader.id(),
            interrupt: Interrupt::new(),
        });
        let resolved = record.loader.resolve(&record.metadata.main)?;
        let table = contract::check(name, &resolved.class)?;
        let instance = contract::construct(name, &resolved.class, &table)?;
        debug!(module = name, contract = ?table.contract, origin = ?resolved.origin, "module constructed");
        Ok((instance, table))
    }

    /// Drop a placeholder that never got an instance.
    fn discard(&self, placeholder: &ModuleRecord) {
        let name = placeholder.name();
        // The loader is closed before the record goes, matching teardown.
        if let Err(e) = placeholder.loader.close() {
            warn!(module = name, kind = e.kind(), "{}", e);
        }
        let ours = self
            .registry
            .get(name)
            .is_some_and(|r| r.sequence == placeholder.sequence);
        if ours {
            self.registry.remove(name);
        }
    }

    /// Disable, unregister and forget `name`. Returns the archive it was
    /// loaded from, or `None` if nothing was registered. Disable and loader
    /// close failures are logged and never stop the teardown.
    pub(crate) async fn teardown(&self, name: &str, quarantine: bool) -> Option<PathBuf> {
        let record = self.registry.get(name)?;
        let was_enabled = record.state == ModuleState::Enabled;
        let state = if quarantine {
            ModuleState::Quarantined
        } else {
            ModuleState::Disabling
        };
        let record = self.registry.upsert(record.with_state(state));

        if let Some(handle) = record.instance.clone() {
            let module = name.to_string();
            let disabled = self
                .sandbox
                .run_bounded(name, "disable", None, move || {
                    handle.with(&module, INSTANCE_WAIT, |m| m.disable())
                })
                .await;
            if let Err(failure) = disabled {
                let err = HearthError::DisableFailed {
                    module: name.to_string(),
                    reason: failure.to_string(),
                };
                warn!(module = name, kind = err.kind(), "{}", err);
            }
        }

        self.release_collaborators(&record, was_enabled).await;
        let cleared = self.shared.clear_owner(name);
        if cleared > 0 {
            debug!(module = name, entries = cleared, "cleared shared data");
        }

        if let Err(e) = record.loader.close() {
            warn!(module = name, kind = e.kind(), "{}", e);
        }
        let ours = self
            .registry
            .get(name)
            .is_some_and(|r| r.sequence == record.sequence);
        if ours {
            self.registry.remove(name);
        }
        self.events.publish(Event::ModuleUnloaded {
            module: name.to_string(),
        });
        info!(module = name, quarantine, "module unloaded");
        Some(record.archive.clone())
    }

    async fn register_collaborators(&self, record: &ModuleRecord) -> Result<()> {
        let commands = self.commands.clone();
        let permissions = self.permissions.clone();
        let metadata = record.metadata.clone();
        self.main
            .run(move || {
                commands.register_commands(&metadata.name, &metadata.commands)?;
                permissions.register_permissions(&metadata.name, &metadata.permissions)
            })
            .await
    }

    /// Unregister commands and permissions (only if they were registered) and
    /// drop the module's listeners, all on the main context.
    async fn release_collaborators(&self, record: &ModuleRecord, registered: bool) {
        let commands = self.commands.clone();
        let permissions = self.permissions.clone();
        let listeners = self.listeners.clone();
        let metadata = record.metadata.clone();
        let released = self
            .main
            .run(move || {
                let removed = listeners.remove_owner(&metadata.name);
                if removed > 0 {
                    debug!(module = %metadata.name, listeners = removed, "removed listeners");
                }
                if registered {
                    commands.unregister_commands(&metadata.name, &metadata.commands)?;
                    permissions.unregister_permissions(&metadata.name, &metadata.permissions)?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = released {
            warn!(module = record.name(), error = %e, "collaborator cleanup failed");
        }
    }

    // ── Public lifecycle ops ───────────────────────────────────

    /// Disable and unregister one module.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let archive = self
            .with_name_lock(name, self.teardown(name, false))
            .await;
        match archive {
            Some(_) => Ok(()),
            None => Err(HearthError::NotLoaded(name.to_string())),
        }
    }

    /// The enabled module and command a label belongs to.
    pub fn find_command(&self, label: &str) -> Option<(String, CommandSpec)> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|r| r.state == ModuleState::Enabled)
            .find_map(|r| {
                r.metadata
                    .commands
                    .iter()
                    .find(|c| c.matches(label))
                    .map(|c| (r.name().to_string(), c.clone()))
            })
    }

    fn command_target(&self, module: &str, label: &str) -> Result<(ModuleHandle, CommandSpec)> {
        let record = self
            .registry
            .get(module)
            .filter(|r| r.state == ModuleState::Enabled)
            .ok_or_else(|| HearthError::NotLoaded(module.to_string()))?;
        let handle = record
            .instance
            .clone()
            .ok_or_else(|| HearthError::NotLoaded(module.to_string()))?;
        let spec = record
            .metadata
            .commands
            .iter()
            .find(|c| c.matches(label))
            .cloned()
            .ok_or_else(|| HearthError::module(module, format!("unknown command '{}'", label)))?;
        Ok((handle, spec))
    }

    /// Route a command to its module through the sandbox. A crash in the
    /// handler quarantines the module and reports the command as unhandled.
    pub async fn dispatch_command(
        &self,
        module: &str,
        label: &str,
        sender: CommandSender,
        args: Vec<String>,
    ) -> Result<bool> {
        let (handle, spec) = self.command_target(module, label)?;
        let operation = format!("command:{}", spec.name);
        let name = module.to_string();
        let handled = self
            .sandbox
            .run_or(module, &operation, false, move || {
                handle.with(&name, INSTANCE_WAIT, |m| {
                    m.on_command(&sender, &spec.name, &args)
                })
            })
            .await;
        Ok(handled)
    }

    /// Completions for a partially typed command: the module's own answer
    /// when it gives one, the manifest's static list otherwise.
    pub async fn tab_complete(
        &self,
        module: &str,
        label: &str,
        sender: CommandSender,
        args: Vec<String>,
    ) -> Vec<String> {
        let Ok((handle, spec)) = self.command_target(module, label) else {
            return Vec::new();
        };
        let index = args.len().saturating_sub(1);
        let prefix = args.last().cloned().unwrap_or_default().to_lowercase();
        let fallback: Vec<String> = spec
            .completions_for(index)
            .iter()
            .filter(|c| c.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect();

        let operation = format!("tab_complete:{}", spec.name);
        let name = module.to_string();
        let dynamic = self
            .sandbox
            .run_or(module, &operation, Vec::new(), move || {
                handle.with(&name, INSTANCE_WAIT, |m| {
                    m.on_tab_complete(&sender, &spec.name, &args)
                })
            })
            .await;
        if dynamic.is_empty() { fallback } else { dynamic }
    }
}
