//! Bounded, supervised execution of module entry points.
//!
//! Every call into module code goes through [`Sandbox::run`] or one of its
//! variants. Untrusted calls run on a bounded worker pool under a timeout;
//! trusted calls (and every call while the sandbox is disabled) run inline.
//! Either way, errors and panics are caught and escalated the same way:
//! crash report, data save, quarantine, restart policy, notification.

pub mod crash;
pub mod notify;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, Once, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hearth_config::{NotifyConfig, SandboxConfig};
use hearth_core::context::{ContextGuard, Frame, Interrupt};
use hearth_core::{Event, EventBus, FailureKind, HearthError, Result};

use crate::performance::PerformanceTracker;
use crate::registry::ModuleRegistry;

pub use crash::{CrashReport, RuntimeContext};
pub use notify::{CrashNotice, Notifier, RestartOutcome};

/// Deployment-wide sandbox settings, adjustable at runtime.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub enabled: bool,
    pub max_execution: Duration,
    pub save_data_on_crash: bool,
    pub save_data_timeout: Duration,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub restart_delay: Duration,
    pub crash_report_dir: PathBuf,
    pub detailed_error_logging: bool,
    pub trusted: HashSet<String>,
    pub notify: NotifyConfig,
}

impl SandboxPolicy {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_execution: config.max_execution(),
            save_data_on_crash: config.save_data_on_crash,
            save_data_timeout: config.save_data_timeout(),
            auto_restart: config.auto_restart,
            max_restart_attempts: config.max_restart_attempts,
            restart_delay: config.restart_delay(),
            crash_report_dir: config.crash_report_dir.clone(),
            detailed_error_logging: config.detailed_error_logging,
            trusted: config.trusted_modules.iter().cloned().collect(),
            notify: config.notify.clone(),
        }
    }

    pub fn is_trusted(&self, module: &str) -> bool {
        self.trusted.contains(module)
    }

    /// The time bound for a call into `module`, if any.
    fn limit_for(&self, module: &str) -> Option<Duration> {
        (self.enabled && !self.is_trusted(module)).then_some(self.max_execution)
    }
}

/// A caught failure of one sandboxed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxFailure {
    pub kind: FailureKind,
    pub message: String,
    pub trace: Option<String>,
}

impl SandboxFailure {
    fn exception(message: impl Into<String>, trace: Option<String>) -> Self {
        Self {
            kind: FailureKind::Exception,
            message: message.into(),
            trace,
        }
    }
}

impl std::fmt::Display for SandboxFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The coordinator side of failure escalation.
#[async_trait]
pub trait QuarantineHandler: Send + Sync {
    /// Disable and unregister `module`. Returns its archive when a record
    /// was torn down.
    async fn quarantine(&self, module: &str, failure: &SandboxFailure) -> Option<PathBuf>;

    /// Load `archive` again after an automatic restart delay.
    async fn restart(&self, module: &str, archive: PathBuf);
}

pub struct Sandbox {
    policy: RwLock<SandboxPolicy>,
    permits: Arc<Semaphore>,
    registry: Arc<ModuleRegistry>,
    tracker: Arc<PerformanceTracker>,
    notifier: Notifier,
    events: EventBus,
    handler: Weak<dyn QuarantineHandler>,
    restarts: DashMap<String, u32>,
    shutdown: CancellationToken,
}

impl Sandbox {
    pub fn new(
        config: &SandboxConfig,
        registry: Arc<ModuleRegistry>,
        tracker: Arc<PerformanceTracker>,
        notifier: Notifier,
        events: EventBus,
        handler: Weak<dyn QuarantineHandler>,
    ) -> Self {
        install_panic_trace_hook();
        Self {
            policy: RwLock::new(SandboxPolicy::from_config(config)),
            permits: Arc::new(Semaphore::new(config.worker_threads.max(1))),
            registry,
            tracker,
            notifier,
            events,
            handler,
            restarts: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    // ── Execution ──────────────────────────────────────────────

    /// Run `action` for `module` under the sandbox. Any failure is escalated
    /// before it is returned.
    pub async fn run<T, F>(
        &self,
        module: &str,
        operation: &str,
        action: F,
    ) -> std::result::Result<T, SandboxFailure>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let limit = self.policy.read().limit_for(module);
        let outcome = self.invoke(module, operation, limit, action).await;
        if let Err(failure) = &outcome {
            self.handle_failure(module, operation, failure).await;
        }
        outcome
    }

    /// Run an action, reporting only whether it succeeded.
    pub async fn execute<F>(&self, module: &str, action: F) -> bool
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.run(module, "execute", action).await.is_ok()
    }

    /// Run an action, returning `default` if it fails.
    pub async fn execute_or<T, F>(&self, module: &str, default: T, action: F) -> T
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_or(module, "execute", default, action).await
    }

    /// [`execute_or`](Self::execute_or) with a named operation, for crash
    /// reports and latency stats.
    pub async fn run_or<T, F>(&self, module: &str, operation: &str, default: T, action: F) -> T
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run(module, operation, action).await.unwrap_or(default)
    }

    /// Bounded run without escalation. `limit` overrides the policy bound.
    /// Used for `disable`, `on_enable` and the post-crash data save, whose
    /// failures are logged by the caller and never quarantine anything.
    pub async fn run_bounded<T, F>(
        &self,
        module: &str,
        operation: &str,
        limit: Option<Duration>,
        action: F,
    ) -> std::result::Result<T, SandboxFailure>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let limit = limit.or_else(|| self.policy.read().limit_for(module));
        self.invoke(module, operation, limit, action).await
    }

    async fn invoke<T, F>(
        &self,
        module: &str,
        operation: &str,
        limit: Option<Duration>,
        action: F,
    ) -> std::result::Result<T, SandboxFailure>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let interrupt = Interrupt::new();
        let frame = Frame {
            module: module.to_string(),
            loader_id: self.registry.get(module).map(|r| r.loader.id()).unwrap_or(0),
            interrupt: interrupt.clone(),
        };
        let started = Instant::now();

        let outcome = match limit {
            None => run_in_frame(frame, action),
            Some(limit) => {
                let permit = self
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| SandboxFailure::exception("sandbox is shut down", None))?;
                let task = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    run_in_frame(frame, action)
                });
                match tokio::time::timeout(limit, task).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(join)) => Err(SandboxFailure::exception(
                        format!("worker failed: {}", join),
                        None,
                    )),
                    Err(_) => {
                        // The worker keeps running until it notices; its
                        // result is dropped with the join handle.
                        interrupt.trigger();
                        Err(SandboxFailure {
                            kind: FailureKind::Timeout,
                            message: format!(
                                "{} did not finish within {} ms",
                                operation,
                                limit.as_millis()
                            ),
                            trace: None,
                        })
                    }
                }
            }
        };

        self.tracker.record(module, operation, started.elapsed());
        outcome
    }

    // ── Failure escalation ─────────────────────────────────────

    async fn handle_failure(&self, module: &str, operation: &str, failure: &SandboxFailure) {
        let policy = self.policy.read().clone();
        let record = self.registry.get(module);

        // 1. Crash report.
        let context = RuntimeContext::capture(
            policy.enabled,
            policy.is_trusted(module),
            self.registry.snapshot_names(),
        );
        let report = CrashReport::new(
            module,
            record.as_deref(),
            operation,
            failure.kind,
            &failure.message,
            failure.trace.clone(),
            context,
        );
        let report_path = match report.write(&policy.crash_report_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(module, error = %e, "failed to write crash report");
                None
            }
        };

        // 2. Best-effort data save, bounded independently of the failure.
        if policy.save_data_on_crash {
            if let Some(handle) = record.as_ref().and_then(|r| r.instance.clone()) {
                let wait = policy.save_data_timeout;
                let name = module.to_string();
                let saved = self
                    .run_bounded(module, "save_data", Some(wait), move || {
                        handle.with(&name, wait, |m| m.save_data())
                    })
                    .await;
                match saved {
                    Ok(()) => debug!(module, "module data saved after crash"),
                    Err(e) => warn!(module, error = %e, "save_data after crash failed"),
                }
            }
        }

        // 3. Quarantine through the coordinator.
        let handler = self.handler.upgrade();
        let archive = match &handler {
            Some(handler) => handler.quarantine(module, failure).await,
            None => None,
        };

        // 4. Restart policy.
        let restart = match archive {
            Some(archive) if policy.auto_restart => self.schedule_restart(module, archive, &policy),
            _ => RestartOutcome::Disabled,
        };

        // 5. Notify.
        let notice = CrashNotice {
            module: module.to_string(),
            operation: operation.to_string(),
            kind: failure.kind,
            message: failure.message.clone(),
            trace: failure.trace.clone(),
            restart,
            report: report_path,
            timestamp: report.timestamp,
        };
        self.notifier
            .notify(&policy.notify, &notice, policy.detailed_error_logging)
            .await;
    }

    fn schedule_restart(
        &self,
        module: &str,
        archive: PathBuf,
        policy: &SandboxPolicy,
    ) -> RestartOutcome {
        let attempt = {
            let mut count = self.restarts.entry(module.to_string()).or_insert(0);
            if *count >= policy.max_restart_attempts {
                None
            } else {
                *count += 1;
                Some(*count)
            }
        };

        let Some(attempt) = attempt else {
            let attempts = policy.max_restart_attempts;
            let err = HearthError::RestartLimitReached {
                module: module.to_string(),
                attempts,
            };
            error!(module, kind = err.kind(), "{}", err);
            self.events.publish(Event::RestartLimitReached {
                module: module.to_string(),
                attempts,
            });
            return RestartOutcome::LimitReached { attempts };
        };

        let delay = policy.restart_delay;
        info!(module, attempt, delay_ms = delay.as_millis() as u64, "scheduling restart");
        self.events.publish(Event::RestartScheduled {
            module: module.to_string(),
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        let handler = self.handler.clone();
        let shutdown = self.shutdown.clone();
        let name = module.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(handler) = handler.upgrade() {
                        handler.restart(&name, archive).await;
                    }
                }
            }
        });
        RestartOutcome::Scheduled {
            attempt,
            delay_ms: delay.as_millis() as u64,
        }
    }

    // ── Administration ─────────────────────────────────────────

    pub fn restart_attempts(&self, module: &str) -> u32 {
        self.restarts.get(module).map(|c| *c).unwrap_or(0)
    }

    /// Clear the restart counter so automatic restarts may resume.
    pub fn reset_restart_attempts(&self, module: &str) -> bool {
        self.restarts.remove(module).is_some()
    }

    pub fn trust(&self, module: &str) -> bool {
        self.policy.write().trusted.insert(module.to_string())
    }

    pub fn untrust(&self, module: &str) -> bool {
        self.policy.write().trusted.remove(module)
    }

    pub fn is_trusted(&self, module: &str) -> bool {
        self.policy.read().is_trusted(module)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.policy.write().enabled = enabled;
        info!(enabled, "sandbox toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.read().enabled
    }

    pub fn policy(&self) -> SandboxPolicy {
        self.policy.read().clone()
    }

    /// Replace the policy from a reloaded config. Trust granted at runtime is
    /// dropped along with everything else; the worker pool keeps its size.
    pub fn apply_policy(&self, config: &SandboxConfig) {
        let policy = SandboxPolicy::from_config(config);
        info!(
            enabled = policy.enabled,
            max_execution_ms = policy.max_execution.as_millis() as u64,
            trusted = policy.trusted.len(),
            "sandbox policy updated"
        );
        *self.policy.write() = policy;
    }

    /// Cancel pending restarts and stop admitting bounded calls.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.permits.close();
    }
}

thread_local! {
    /// Backtrace of the last panic raised inside a context frame on this thread.
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a panic hook that records a backtrace for panics in module code.
/// The previous hook still runs.
fn install_panic_trace_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if hearth_core::context::current().is_some() {
                let trace = Backtrace::force_capture().to_string();
                PANIC_TRACE.with(|t| *t.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}

fn run_in_frame<T>(
    frame: Frame,
    action: impl FnOnce() -> Result<T>,
) -> std::result::Result<T, SandboxFailure> {
    let _guard = ContextGuard::enter(frame);
    PANIC_TRACE.with(|t| t.borrow_mut().take());
    match catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            let trace = format!("{:?}\n\n{}", e, Backtrace::force_capture());
            Err(SandboxFailure::exception(e.to_string(), Some(trace)))
        }
        Err(panic) => {
            let message = format!("panicked: {}", panic_message(panic.as_ref()));
            let trace = PANIC_TRACE
                .with(|t| t.borrow_mut().take())
                .unwrap_or_else(|| Backtrace::force_capture().to_string());
            Err(SandboxFailure::exception(message, Some(trace)))
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_context::MainContext;
    use hearth_config::PerformanceConfig;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        quarantined: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QuarantineHandler for RecordingHandler {
        async fn quarantine(&self, module: &str, _failure: &SandboxFailure) -> Option<PathBuf> {
            self.quarantined.lock().push(module.to_string());
            Some(PathBuf::from(format!("/modules/{}", module)))
        }

        async fn restart(&self, _module: &str, _archive: PathBuf) {}
    }

    fn sandbox(
        config: SandboxConfig,
        handler: &Arc<RecordingHandler>,
    ) -> (Sandbox, Arc<PerformanceTracker>) {
        let registry = Arc::new(ModuleRegistry::new());
        let events = EventBus::default();
        let tracker = Arc::new(PerformanceTracker::new(
            PerformanceConfig::default(),
            registry.clone(),
            events.clone(),
        ));
        let main = MainContext::start().unwrap();
        let handler: Arc<dyn QuarantineHandler> = handler.clone();
        let sandbox = Sandbox::new(
            &config,
            registry,
            tracker.clone(),
            Notifier::new(None, main),
            events,
            Arc::downgrade(&handler),
        );
        (sandbox, tracker)
    }

    fn config(dir: &std::path::Path) -> SandboxConfig {
        SandboxConfig {
            max_execution_ms: 100,
            crash_report_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn reports(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn success_returns_value_and_records_latency() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let (sandbox, tracker) = sandbox(config(dir.path()), &handler);
        let v = sandbox.run("Foo", "initialize", || Ok(7)).await.unwrap();
        assert_eq!(v, 7);
        assert_eq!(tracker.sample("Foo").unwrap().operations["initialize"].count, 1);
        assert!(handler.quarantined.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn error_is_escalated_once() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let (sandbox, _) = sandbox(config(dir.path()), &handler);
        let failure = sandbox
            .run("Foo", "initialize", || -> Result<()> {
                Err(HearthError::module("Foo", "bad config"))
            })
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exception);
        assert!(failure.message.contains("bad config"));
        assert_eq!(*handler.quarantined.lock(), vec!["Foo"]);
        assert_eq!(reports(dir.path()), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panic_is_caught_as_exception() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let (sandbox, _) = sandbox(config(dir.path()), &handler);
        let failure = sandbox
            .run("Foo", "command:boom", || -> Result<()> { panic!("index out of range") })
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exception);
        assert!(failure.message.contains("index out of range"));
        assert!(failure.trace.as_deref().is_some_and(|t| !t.is_empty()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn crash_report_carries_backtrace() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let (sandbox, _) = sandbox(config(dir.path()), &handler);
        let failure = sandbox
            .run("Foo", "initialize", || -> Result<()> {
                Err(HearthError::module("Foo", "bad config"))
            })
            .await
            .unwrap_err();
        let trace = failure.trace.expect("error failures carry a trace");
        assert!(trace.starts_with("Module {"));

        let report = std::fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let text = std::fs::read_to_string(report).unwrap();
        assert!(text.contains("bad config"));
        assert!(text.contains("Module {"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_interrupts_cooperative_code() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let (sandbox, _) = sandbox(config(dir.path()), &handler);
        let saw_cancel = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = saw_cancel.clone();
        let failure = sandbox
            .run("Foo", "initialize", move || -> Result<()> {
                let deadline = Instant::now() + Duration::from_secs(3);
                while Instant::now() < deadline {
                    if hearth_core::context::is_cancelled() {
                        flag.store(true, std::sync::atomic::Ordering::SeqCst);
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Timeout);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(saw_cancel.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trusted_module_skips_timeout_but_not_crash_handling() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let (sandbox, _) = sandbox(config(dir.path()), &handler);
        sandbox.trust("Core");

        let slow = sandbox
            .run("Core", "initialize", || {
                std::thread::sleep(Duration::from_millis(250));
                Ok(())
            })
            .await;
        assert!(slow.is_ok());

        let failure = sandbox
            .run("Core", "initialize", || -> Result<()> {
                Err(HearthError::module("Core", "boom"))
            })
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exception);
        assert_eq!(*handler.quarantined.lock(), vec!["Core"]);
        assert_eq!(reports(dir.path()), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_counter_stops_at_max_until_reset() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let mut cfg = config(dir.path());
        cfg.auto_restart = true;
        cfg.max_restart_attempts = 2;
        cfg.restart_delay_ms = 60_000;
        let (sandbox, _) = sandbox(cfg, &handler);
        let mut events = sandbox.events.subscribe();

        for _ in 0..3 {
            sandbox
                .run("Foo", "initialize", || -> Result<()> {
                    Err(HearthError::module("Foo", "boom"))
                })
                .await
                .unwrap_err();
        }
        assert_eq!(sandbox.restart_attempts("Foo"), 2);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(
            kinds,
            vec!["restart_scheduled", "restart_scheduled", "restart_limit_reached"]
        );

        assert!(sandbox.reset_restart_attempts("Foo"));
        assert_eq!(sandbox.restart_attempts("Foo"), 0);
        sandbox.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn execute_or_returns_default_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let (sandbox, _) = sandbox(config(dir.path()), &handler);
        let v = sandbox
            .execute_or("Foo", vec!["fallback".to_string()], || {
                Err(HearthError::module("Foo", "no completions"))
            })
            .await;
        assert_eq!(v, vec!["fallback"]);
        assert!(sandbox.execute("Bar", || Ok(())).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reloaded_policy_applies_to_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        let (sandbox, _) = sandbox(config(dir.path()), &handler);
        sandbox.trust("Foo");

        let mut reloaded = config(dir.path());
        reloaded.max_execution_ms = 2000;
        sandbox.apply_policy(&reloaded);
        assert_eq!(sandbox.policy().max_execution, Duration::from_millis(2000));
        assert!(!sandbox.is_trusted("Foo"));

        let slow = sandbox
            .run("Foo", "initialize", || {
                std::thread::sleep(Duration::from_millis(250));
                Ok(())
            })
            .await;
        assert!(slow.is_ok());
        assert!(handler.quarantined.lock().is_empty());
    }

    #[test]
    fn panic_message_handles_both_payloads() {
        let p = catch_unwind(|| -> i32 { panic!("static") }).unwrap_err();
        assert_eq!(panic_message(p.as_ref()), "static");
        let p = catch_unwind(|| -> i32 { panic!("{}", 42) }).unwrap_err();
        assert_eq!(panic_message(p.as_ref()), "42");
    }
}
