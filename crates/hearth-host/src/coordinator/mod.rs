//! Lifecycle coordinator.
//!
//! [`ModuleManager`] owns every other host component and is the only thing
//! that moves a module between lifecycle states. Operations on one module
//! name are serialised by a per-name lock; operations on different names run
//! concurrently.

mod layout;
mod lifecycle;
mod order;
mod reload;

pub use layout::{bootstrap_config, extract_resources};
pub use order::{Candidate, LoadPlan, plan};
pub use reload::{ScanFailure, ScanReport};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hearth_config::{HearthConfig, LoadMode};
use hearth_core::{
    Broadcaster, CommandRegistrar, Event, EventBus, HearthError, HostServices, ListenerRegistry,
    ModulePaths, PermissionRegistrar, Result, SharedData,
};

use crate::archive::ModuleMetadata;
use crate::collaborators::{CommandTable, LogBroadcaster, PermissionTable};
use crate::loader::HostLoader;
use crate::main_context::MainContext;
use crate::performance::PerformanceTracker;
use crate::registry::{ModuleRegistry, ModuleState};
use crate::sandbox::{Notifier, QuarantineHandler, Sandbox, SandboxFailure, panic_message};
use crate::watcher::{ModuleWatcher, ReloadRequest};

tokio::task_local! {
    /// Module names whose lock the current task already holds.
    static HELD: RefCell<HashSet<String>>;
}

/// Releases a nested name-lock entry when the inner future finishes.
struct Release(String);

impl Drop for Release {
    fn drop(&mut self) {
        let _ = HELD.try_with(|held| held.borrow_mut().remove(&self.0));
    }
}

// ── Builder ────────────────────────────────────────────────────

/// Wires a [`ModuleManager`] from a config and optional collaborators.
pub struct HostBuilder {
    config: HearthConfig,
    host_loader: Option<Arc<HostLoader>>,
    commands: Option<Arc<dyn CommandRegistrar>>,
    permissions: Option<Arc<dyn PermissionRegistrar>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    events: Option<EventBus>,
}

impl HostBuilder {
    pub fn new(config: HearthConfig) -> Self {
        Self {
            config,
            host_loader: None,
            commands: None,
            permissions: None,
            broadcaster: None,
            events: None,
        }
    }

    /// Module classes and shared API types the embedding application provides.
    pub fn host_loader(mut self, loader: Arc<HostLoader>) -> Self {
        self.host_loader = Some(loader);
        self
    }

    pub fn commands(mut self, commands: Arc<dyn CommandRegistrar>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionRegistrar>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Arc<ModuleManager>> {
        let config = self.config;
        for warning in config.validate().map_err(HearthError::Config)? {
            warn!("{}", warning);
        }

        std::fs::create_dir_all(&config.host.modules_dir)?;
        let modules_dir = config.host.modules_dir.canonicalize()?;

        let main = MainContext::start()?;
        let events = self.events.unwrap_or_default();
        let registry = Arc::new(ModuleRegistry::new());
        let tracker = Arc::new(PerformanceTracker::new(
            config.performance.clone(),
            registry.clone(),
            events.clone(),
        ));
        let host_loader = self
            .host_loader
            .unwrap_or_else(|| Arc::new(HostLoader::new(config.host.shared_api_prefixes.clone())));
        let commands = self
            .commands
            .unwrap_or_else(|| Arc::new(CommandTable::new()));
        let permissions = self
            .permissions
            .unwrap_or_else(|| Arc::new(PermissionTable::new()));
        let broadcaster = self
            .broadcaster
            .unwrap_or_else(|| Arc::new(LogBroadcaster::new()));
        let runtime = tokio::runtime::Handle::try_current().ok();

        let manager = Arc::new_cyclic(|me: &Weak<ModuleManager>| {
            let handler: Weak<dyn QuarantineHandler> = me.clone();
            let sandbox = Sandbox::new(
                &config.sandbox,
                registry.clone(),
                tracker.clone(),
                Notifier::new(Some(broadcaster.clone()), main.clone()),
                events.clone(),
                handler,
            );
            ModuleManager {
                me: me.clone(),
                modules_dir,
                registry,
                host_loader,
                sandbox,
                tracker,
                main,
                commands,
                permissions,
                broadcaster,
                listeners: Arc::new(ListenerRegistry::new()),
                shared: Arc::new(SharedData::new()),
                events,
                locks: DashMap::new(),
                loader_ids: AtomicU64::new(1),
                runtime,
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                watcher: Mutex::new(None),
                config,
            }
        });
        debug!(modules_dir = ?manager.modules_dir, "module host built");
        Ok(manager)
    }
}

// ── Manager ────────────────────────────────────────────────────

pub struct ModuleManager {
    config: HearthConfig,
    me: Weak<ModuleManager>,
    /// Canonical form of `config.host.modules_dir`.
    modules_dir: PathBuf,
    registry: Arc<ModuleRegistry>,
    host_loader: Arc<HostLoader>,
    sandbox: Sandbox,
    tracker: Arc<PerformanceTracker>,
    main: Arc<MainContext>,
    commands: Arc<dyn CommandRegistrar>,
    permissions: Arc<dyn PermissionRegistrar>,
    broadcaster: Arc<dyn Broadcaster>,
    listeners: Arc<ListenerRegistry>,
    shared: Arc<SharedData>,
    events: EventBus,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    loader_ids: AtomicU64,
    runtime: Option<tokio::runtime::Handle>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    watcher: Mutex<Option<ModuleWatcher>>,
}

impl ModuleManager {
    pub fn builder(config: HearthConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    // ── Startup / shutdown ─────────────────────────────────────

    /// Start background tasks and run the initial scan unless the load mode
    /// is manual.
    pub async fn start(&self) -> Result<ScanReport> {
        if let Some(task) = self.tracker.clone().spawn(self.shutdown.clone()) {
            self.tasks.lock().push(task);
        }
        self.spawn_event_pump();
        if self.config.hot_reload.enabled {
            self.start_watcher()?;
        }
        if self.config.host.load_mode == LoadMode::Periodically {
            self.spawn_periodic_scan();
        }

        let report = if self.config.host.load_mode == LoadMode::Manual {
            ScanReport::default()
        } else {
            self.discover_and_load_all().await?
        };
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            mode = ?self.config.host.load_mode,
            "module host started"
        );
        Ok(report)
    }

    /// Unload every module in reverse registration order and stop all
    /// background work.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("module host shutting down");
        self.shutdown.cancel();
        // Dropping the watcher stops it; its thread exits on the next poll.
        self.watcher.lock().take();

        for record in self.registry.snapshot().into_iter().rev() {
            let name = record.name().to_string();
            if let Err(e) = self.unload(&name).await {
                debug!(module = %name, error = %e, "unload during shutdown");
            }
        }

        self.sandbox.shutdown();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.events.publish(Event::Shutdown);
        self.main.shutdown();
    }

    fn spawn_event_pump(&self) {
        let mut rx = self.events.subscribe();
        let shutdown = self.shutdown.clone();
        let me = self.me.clone();
        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!(skipped = n, "event pump lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                let Some(manager) = me.upgrade() else { break };
                manager.deliver(event).await;
            }
        });
        self.tasks.lock().push(task);
    }

    /// Run matching module listeners on the main context. A panicking
    /// listener is logged and does not stop the others.
    async fn deliver(&self, event: Event) {
        let matching = self.listeners.matching(&event);
        if matching.is_empty() {
            return;
        }
        let delivered = self
            .main
            .run(move || {
                for (owner, listener) in matching {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                        warn!(
                            module = %owner,
                            event = event.kind(),
                            "listener panicked: {}",
                            panic_message(panic.as_ref())
                        );
                    }
                }
                Ok(())
            })
            .await;
        if let Err(e) = delivered {
            debug!(error = %e, "event delivery skipped");
        }
    }

    fn start_watcher(&self) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ReloadRequest>(64);
        let watcher = ModuleWatcher::start(&self.modules_dir, &self.config.hot_reload, tx)?;
        *self.watcher.lock() = Some(watcher);

        let me = self.me.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    request = rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };
                let Some(manager) = me.upgrade() else { break };
                if let Err(e) = manager.hot_reload(&request.archive).await {
                    debug!(archive = ?request.archive, error = %e, "hot reload did not complete");
                }
            }
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    fn spawn_periodic_scan(&self) {
        let me = self.me.clone();
        let shutdown = self.shutdown.clone();
        let every = self.config.host.check_interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = me.upgrade() else { break };
                        let report = manager.check_for_new_modules().await;
                        if !report.loaded.is_empty() {
                            info!(loaded = ?report.loaded, "periodic scan loaded new modules");
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(task);
    }

    // ── Per-name serialisation ─────────────────────────────────

    /// Run `fut` holding the lock for `name`. Re-entrant within one task, so
    /// a quarantine triggered from inside a load of the same module proceeds.
    /// The lock entry is dropped again once nobody holds or awaits it.
    pub(crate) async fn with_name_lock<F: Future>(&self, name: &str, fut: F) -> F::Output {
        let held = HELD
            .try_with(|held| held.borrow().contains(name))
            .unwrap_or(false);
        if held {
            return fut.await;
        }

        let lock = self.locks.entry(name.to_string()).or_default().clone();
        let output = {
            let _guard = lock.lock().await;
            if HELD.try_with(|_| ()).is_ok() {
                HELD.with(|held| held.borrow_mut().insert(name.to_string()));
                let _release = Release(name.to_string());
                fut.await
            } else {
                let held = RefCell::new(HashSet::from([name.to_string()]));
                HELD.scope(held, fut).await
            }
        };
        drop(lock);
        // Waiters hold a clone, so a count of one means the map is the
        // only owner. The check runs under the shard lock `entry` takes.
        self.locks
            .remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
        output
    }

    /// Push the runtime-adjustable parts of a reloaded config into the
    /// sandbox and the performance tracker. Paths, load mode and watcher
    /// settings only take effect on restart.
    pub fn apply_config(&self, config: &HearthConfig) {
        self.sandbox.apply_policy(&config.sandbox);
        self.tracker.set_thresholds(&config.performance);
        info!("reloaded sandbox and performance settings applied");
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn config(&self) -> &HearthConfig {
        &self.config
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn host_loader(&self) -> &Arc<HostLoader> {
        &self.host_loader
    }

    pub fn main_context(&self) -> &Arc<MainContext> {
        &self.main
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Names of enabled modules, sorted.
    pub fn loaded_names(&self) -> Vec<String> {
        self.registry.enabled_names()
    }

    pub fn metadata(&self, name: &str) -> Option<Arc<ModuleMetadata>> {
        self.registry.get(name).map(|r| r.metadata.clone())
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.registry.get(name).map(|r| r.state)
    }

    fn host_services(&self) -> Weak<dyn HostServices> {
        let host: Weak<dyn HostServices> = self.me.clone();
        host
    }

    fn next_loader_id(&self) -> u64 {
        self.loader_ids
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

/// Canonical path when it exists, the input otherwise.
fn canonical(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    // A removed bundle still has to match the path it was registered under.
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Log a terminal lifecycle failure exactly once.
fn report_failure(module: &str, err: &HearthError) {
    match err {
        HearthError::ModuleDisabled(_) => info!(module, kind = err.kind(), "{}", err),
        _ => error!(module, kind = err.kind(), "{}", err),
    }
}

// ── Trait impls ────────────────────────────────────────────────

impl HostServices for ModuleManager {
    fn paths(&self, module: &str) -> ModulePaths {
        ModulePaths::new(&self.config.host.data_dir, module)
    }

    fn is_loaded(&self, module: &str) -> bool {
        self.registry
            .get(module)
            .is_some_and(|r| matches!(r.state, ModuleState::Initializing | ModuleState::Enabled))
    }

    fn loaded_modules(&self) -> Vec<String> {
        self.registry.enabled_names()
    }

    fn module_version(&self, module: &str) -> Option<String> {
        self.registry.get(module).map(|r| r.metadata.version.clone())
    }

    fn shared_data(&self) -> &SharedData {
        &self.shared
    }

    fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    fn broadcast(&self, message: &str) -> Result<()> {
        let broadcaster = self.broadcaster.clone();
        let message = message.to_string();
        self.main
            .run_blocking(move || broadcaster.broadcast(&message))
    }
}

#[async_trait]
impl QuarantineHandler for ModuleManager {
    async fn quarantine(&self, module: &str, failure: &SandboxFailure) -> Option<PathBuf> {
        let archive = self
            .with_name_lock(module, self.teardown(module, true))
            .await;
        if archive.is_some() {
            warn!(module, kind = %failure.kind, "module quarantined");
            self.events.publish(Event::ModuleQuarantined {
                module: module.to_string(),
                failure: failure.kind,
                message: failure.message.clone(),
            });
        }
        archive
    }

    async fn restart(&self, module: &str, archive: PathBuf) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(module, archive = ?archive, "restarting module");
        match self.load_archive(&archive).await {
            Ok(name) => info!(module = %name, "module restarted"),
            Err(e) => debug!(module, error = %e, "restart did not load the module"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn manager(dir: &Path) -> Arc<ModuleManager> {
        let mut config = HearthConfig::default();
        config.host.modules_dir = dir.join("modules");
        config.host.data_dir = dir.join("data");
        config.host.load_mode = LoadMode::Manual;
        config.hot_reload.enabled = false;
        ModuleManager::builder(config).build().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reloaded_config_reaches_sandbox_and_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let mut reloaded = manager.config().clone();
        reloaded.sandbox.enabled = false;
        reloaded.sandbox.max_execution_ms = 1234;
        reloaded.performance.cpu_critical = 42.0;
        manager.apply_config(&reloaded);

        assert!(!manager.sandbox().is_enabled());
        assert_eq!(
            manager.sandbox().policy().max_execution,
            Duration::from_millis(1234)
        );
        assert_eq!(manager.tracker().thresholds().cpu_critical, 42.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn name_lock_entries_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let nested = manager
            .with_name_lock("Foo", async {
                assert_eq!(manager.locks.len(), 1);
                manager.with_name_lock("Foo", async { 7 }).await
            })
            .await;
        assert_eq!(nested, 7);
        assert!(manager.locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn contended_name_lock_survives_until_last_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let manager = manager.clone();
            let order = order.clone();
            tokio::spawn(async move {
                manager
                    .with_name_lock("Foo", async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        order.lock().push("first");
                    })
                    .await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = {
            let manager = manager.clone();
            let order = order.clone();
            tokio::spawn(async move {
                manager
                    .with_name_lock("Foo", async {
                        order.lock().push("second");
                    })
                    .await;
            })
        };
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(*order.lock(), vec!["first", "second"]);
        assert!(manager.locks.is_empty());
    }
}
