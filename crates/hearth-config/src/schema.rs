use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration, mapped to `hearth.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HearthConfig {
    pub host: HostConfig,
    pub hot_reload: HotReloadConfig,
    pub sandbox: SandboxConfig,
    pub performance: PerformanceConfig,
    pub logging: LoggingConfig,
}

// ── Host ───────────────────────────────────────────────────────

/// When the host scans the modules directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Scan once at startup.
    #[default]
    StartupOnly,
    /// Scan at startup and then every `check_interval_secs` for new archives.
    Periodically,
    /// Only load what an administrator asks for.
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory containing module archives (one bundle directory per module).
    pub modules_dir: PathBuf,
    /// Root of per-module data, config and resources directories.
    pub data_dir: PathBuf,
    pub load_mode: LoadMode,
    /// Interval between scans in `periodically` mode.
    pub check_interval_secs: u64,
    /// Load a module even when one of its dependencies failed or is missing.
    pub ignore_failed_dependencies: bool,
    /// Copy an archive's `resources/` into the module's resources directory.
    pub extract_resources: bool,
    /// Pause between unloading everything and rescanning during a full reload.
    pub reload_pause_ms: u64,
    /// Name prefixes always resolved by the host loader first.
    pub shared_api_prefixes: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from("modules"),
            data_dir: PathBuf::from("module-data"),
            load_mode: LoadMode::StartupOnly,
            check_interval_secs: 30,
            ignore_failed_dependencies: true,
            extract_resources: true,
            reload_pause_ms: 500,
            shared_api_prefixes: vec!["hearth::api::".into(), "hearth::api::impl::".into()],
        }
    }
}

impl HostConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn reload_pause(&self) -> Duration {
        Duration::from_millis(self.reload_pause_ms)
    }
}

// ── Hot reload ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub enabled: bool,
    /// Upper bound on how long the watcher blocks waiting for filesystem events.
    pub poll_interval_secs: u64,
    /// Quiet period after a change before the archive is reloaded.
    pub settle_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 5,
            settle_ms: 100,
        }
    }
}

impl HotReloadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

// ── Sandbox ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub enabled: bool,
    /// Maximum wall-clock time for one sandboxed module call.
    pub max_execution_ms: u64,
    pub save_data_on_crash: bool,
    /// Bound on the best-effort data save after a crash.
    pub save_data_timeout_ms: u64,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub restart_delay_ms: u64,
    /// Size of the bounded worker pool running sandboxed calls.
    pub worker_threads: usize,
    pub crash_report_dir: PathBuf,
    /// Include full error chains in crash logs.
    pub detailed_error_logging: bool,
    /// Modules exempt from the execution time limit (never from crash handling).
    pub trusted_modules: Vec<String>,
    pub notify: NotifyConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_execution_ms: 5000,
            save_data_on_crash: true,
            save_data_timeout_ms: 2000,
            auto_restart: false,
            max_restart_attempts: 3,
            restart_delay_ms: 5000,
            worker_threads: 8,
            crash_report_dir: PathBuf::from("crashes"),
            detailed_error_logging: true,
            trusted_modules: Vec::new(),
            notify: NotifyConfig::default(),
        }
    }
}

impl SandboxConfig {
    pub fn max_execution(&self) -> Duration {
        Duration::from_millis(self.max_execution_ms)
    }

    pub fn save_data_timeout(&self) -> Duration {
        Duration::from_millis(self.save_data_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Crash notification channels. Each is independent of the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub console: bool,
    pub broadcast: bool,
    pub webhook: bool,
    pub webhook_url: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            console: true,
            broadcast: true,
            webhook: false,
            webhook_url: String::new(),
        }
    }
}

// ── Performance ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Exponential smoothing factor for CPU and memory (0.0–1.0).
    pub smoothing: f64,
    /// CPU estimates kept per module.
    pub history_size: usize,
    /// Latencies kept per operation for the recent window.
    pub recent_window: usize,
    pub critical_events_capacity: usize,
    /// Samples of unregistered modules older than this are pruned.
    pub stale_after_secs: u64,
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub memory_warning_mb: f64,
    pub memory_critical_mb: f64,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            smoothing: 0.3,
            history_size: 60,
            recent_window: 20,
            critical_events_capacity: 100,
            stale_after_secs: 300,
            cpu_warning: 70.0,
            cpu_critical: 90.0,
            memory_warning_mb: 256.0,
            memory_critical_mb: 512.0,
            latency_warning_ms: 50.0,
            latency_critical_ms: 200.0,
        }
    }
}

impl PerformanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl HearthConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Sandbox timing ───
        if self.sandbox.max_execution_ms == 0 {
            warnings.push(ConfigWarning {
                field: "sandbox.max_execution_ms".into(),
                message: "execution limit is 0, every sandboxed call would time out".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5000, or list the module in sandbox.trusted_modules".into()),
            });
        }
        if self.sandbox.worker_threads == 0 {
            warnings.push(ConfigWarning {
                field: "sandbox.worker_threads".into(),
                message: "worker pool has no threads".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 8".into()),
            });
        }
        if self.sandbox.save_data_on_crash
            && self.sandbox.save_data_timeout_ms > self.sandbox.max_execution_ms
        {
            warnings.push(ConfigWarning {
                field: "sandbox.save_data_timeout_ms".into(),
                message: "crash-time data save may run longer than a normal call".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Restart policy ───
        if self.sandbox.auto_restart && self.sandbox.max_restart_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "sandbox.max_restart_attempts".into(),
                message: "auto_restart is on but no attempts are allowed".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set max_restart_attempts > 0 or turn auto_restart off".into()),
            });
        }
        if !self.sandbox.enabled {
            warnings.push(ConfigWarning {
                field: "sandbox.enabled".into(),
                message: "sandbox disabled, module calls are not time-bounded".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Webhook ───
        let url = &self.sandbox.notify.webhook_url;
        if self.sandbox.notify.webhook {
            if url.is_empty() {
                warnings.push(ConfigWarning {
                    field: "sandbox.notify.webhook_url".into(),
                    message: "webhook notifications enabled without a URL".into(),
                    severity: WarningSeverity::Warning,
                    hint: Some("Set webhook_url or disable sandbox.notify.webhook".into()),
                });
            } else if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(ConfigWarning {
                    field: "sandbox.notify.webhook_url".into(),
                    message: format!("'{}' is not an http(s) URL", url),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }

        // ── Performance ───
        let perf = &self.performance;
        if !(0.0..=1.0).contains(&perf.smoothing) || perf.smoothing == 0.0 {
            warnings.push(ConfigWarning {
                field: "performance.smoothing".into(),
                message: format!("smoothing {} is out of range", perf.smoothing),
                severity: WarningSeverity::Error,
                hint: Some("Smoothing must be in (0.0, 1.0]".into()),
            });
        }
        for (field, warn, crit) in [
            ("cpu", perf.cpu_warning, perf.cpu_critical),
            ("memory_mb", perf.memory_warning_mb, perf.memory_critical_mb),
            ("latency_ms", perf.latency_warning_ms, perf.latency_critical_ms),
        ] {
            if warn > crit {
                warnings.push(ConfigWarning {
                    field: format!("performance.{}_warning", field),
                    message: format!("warning threshold {} exceeds critical {}", warn, crit),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }
        if perf.history_size == 0 || perf.recent_window == 0 {
            warnings.push(ConfigWarning {
                field: "performance.history_size".into(),
                message: "history and recent window must hold at least one entry".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        // ── Hot reload ───
        if self.hot_reload.enabled && self.host.load_mode == LoadMode::Manual {
            warnings.push(ConfigWarning {
                field: "hot_reload.enabled".into(),
                message: "hot reload is on while load_mode is manual".into(),
                severity: WarningSeverity::Info,
                hint: Some("Changed archives will still be reloaded automatically".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
