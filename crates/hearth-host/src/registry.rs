//! Module registry: the single source of truth for what is loaded.
//!
//! Records are immutable once published. Every change builds a new
//! [`ModuleRecord`] and swaps it in whole, so readers never observe a
//! half-updated entry. Uniqueness of names is the coordinator's job.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hearth_core::{HearthError, Module, Result};

use crate::archive::ModuleMetadata;
use crate::contract::DispatchTable;
use crate::loader::ModuleLoader;

/// Lifecycle states a record can be observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    Instantiating,
    Initializing,
    Enabled,
    Disabling,
    Quarantined,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleState::Instantiating => "INSTANTIATING",
            ModuleState::Initializing => "INITIALIZING",
            ModuleState::Enabled => "ENABLED",
            ModuleState::Disabling => "DISABLING",
            ModuleState::Quarantined => "QUARANTINED",
        };
        f.pad(s)
    }
}

/// Shared handle to a live module instance.
///
/// Entry points take `&mut self`, so calls into one instance are serialised
/// by the handle's lock.
#[derive(Clone)]
pub struct ModuleHandle(Arc<Mutex<Box<dyn Module>>>);

impl ModuleHandle {
    pub fn new(instance: Box<dyn Module>) -> Self {
        Self(Arc::new(Mutex::new(instance)))
    }

    /// Run `f` against the instance, waiting at most `wait` for the lock.
    ///
    /// A call that timed out in the sandbox may still hold the lock; callers
    /// use a bound so teardown is never stuck behind it.
    pub fn with<T>(
        &self,
        module: &str,
        wait: Duration,
        f: impl FnOnce(&mut dyn Module) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self
            .0
            .try_lock_for(wait)
            .ok_or_else(|| HearthError::module(module, "instance is busy"))?;
        f(&mut **guard)
    }
}

/// One loaded (or loading) module.
#[derive(Clone)]
pub struct ModuleRecord {
    pub metadata: Arc<ModuleMetadata>,
    pub archive: PathBuf,
    pub loader: Arc<ModuleLoader>,
    pub instance: Option<ModuleHandle>,
    pub dispatch: Option<Arc<DispatchTable>>,
    pub state: ModuleState,
    /// Registration order; full reload unloads in reverse.
    pub sequence: u64,
    pub loaded_at: DateTime<Utc>,
}

impl ModuleRecord {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// A copy of this record in a new state.
    pub fn with_state(&self, state: ModuleState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.metadata.name)
            .field("version", &self.metadata.version)
            .field("archive", &self.archive)
            .field("state", &self.state)
            .field("sequence", &self.sequence)
            .field("has_instance", &self.instance.is_some())
            .finish()
    }
}

/// Concurrent name → record map.
#[derive(Default)]
pub struct ModuleRegistry {
    records: DashMap<String, Arc<ModuleRecord>>,
    sequence: AtomicU64,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `record`, replacing any record of the same name whole.
    pub fn upsert(&self, record: ModuleRecord) -> Arc<ModuleRecord> {
        let record = Arc::new(record);
        self.records
            .insert(record.name().to_string(), record.clone());
        record
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        self.records.get(name).map(|r| r.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        self.records.remove(name).map(|(_, r)| r)
    }

    /// Names of every record, sorted.
    pub fn snapshot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Every record, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<ModuleRecord>> {
        let mut records: Vec<Arc<ModuleRecord>> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    pub fn enabled_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.state == ModuleState::Enabled)
            .map(|r| r.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// The record whose archive is `archive`, if any.
    pub fn find_by_archive(&self, archive: &Path) -> Option<Arc<ModuleRecord>> {
        self.records
            .iter()
            .find(|r| r.archive == archive)
            .map(|r| r.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::HostLoader;
    use hearth_core::{ModuleApi, ModuleConfig};

    struct Noop;

    impl Module for Noop {
        fn initialize(&mut self, _api: ModuleApi, _config: &ModuleConfig) -> Result<()> {
            Ok(())
        }
        fn disable(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn record(registry: &ModuleRegistry, name: &str, state: ModuleState) -> ModuleRecord {
        let metadata = ModuleMetadata::from_toml(&format!(
            "[module]\nname = \"{name}\"\nmain = \"{name}\"\nversion = \"1.0\"\n"
        ))
        .unwrap();
        let archive = PathBuf::from(format!("/modules/{}", name));
        ModuleRecord {
            metadata: Arc::new(metadata),
            loader: Arc::new(ModuleLoader::new(
                1,
                name,
                &archive,
                Arc::new(HostLoader::default()),
                None,
            )),
            archive,
            instance: None,
            dispatch: None,
            state,
            sequence: registry.next_sequence(),
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_replaces_whole_record() {
        let registry = ModuleRegistry::new();
        let placeholder = registry.upsert(record(&registry, "Foo", ModuleState::Instantiating));
        assert!(placeholder.instance.is_none());

        let mut full = placeholder.with_state(ModuleState::Enabled);
        full.instance = Some(ModuleHandle::new(Box::new(Noop)));
        registry.upsert(full);

        assert_eq!(registry.len(), 1);
        let current = registry.get("Foo").unwrap();
        assert_eq!(current.state, ModuleState::Enabled);
        assert!(current.instance.is_some());
        // The earlier snapshot is untouched.
        assert_eq!(placeholder.state, ModuleState::Instantiating);
    }

    #[test]
    fn snapshot_is_in_registration_order() {
        let registry = ModuleRegistry::new();
        registry.upsert(record(&registry, "Zed", ModuleState::Enabled));
        registry.upsert(record(&registry, "Alpha", ModuleState::Initializing));
        let order: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(order, vec!["Zed", "Alpha"]);
        assert_eq!(registry.snapshot_names(), vec!["Alpha", "Zed"]);
        assert_eq!(registry.enabled_names(), vec!["Zed"]);
    }

    #[test]
    fn find_by_archive_and_remove() {
        let registry = ModuleRegistry::new();
        registry.upsert(record(&registry, "Foo", ModuleState::Enabled));
        assert!(registry.find_by_archive(Path::new("/modules/Foo")).is_some());
        assert!(registry.remove("Foo").is_some());
        assert!(registry.is_empty());
        assert!(registry.remove("Foo").is_none());
    }

    #[test]
    fn busy_handle_times_out() {
        let handle = ModuleHandle::new(Box::new(Noop));
        let held = handle.clone();
        let _guard = held.0.lock();
        let err = handle
            .with("Foo", Duration::from_millis(10), |m| m.disable())
            .unwrap_err();
        assert!(err.to_string().contains("busy"));
    }
}
