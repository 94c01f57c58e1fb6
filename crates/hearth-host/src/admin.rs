//! Administrative facade over the module manager.
//!
//! Each operation returns data; [`Admin::execute_line`] renders the same
//! operations as console text.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use hearth_core::{CommandSender, Result};

use crate::coordinator::{ModuleManager, ScanReport};
use crate::performance::{CriticalEvent, ModulePerformanceSample};
use crate::registry::ModuleState;

/// One row of `list`.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub version: String,
    pub state: ModuleState,
    pub archive: PathBuf,
    pub commands: usize,
    pub trusted: bool,
    pub restart_attempts: u32,
}

pub const CONSOLE_HELP: &str = "\
Commands:
  list                 loaded modules
  reload               unload and reload every module
  load <path|name>     load one bundle
  unload <name>        unload one module
  trust <name>         exempt a module from the execution limit
  untrust <name>       remove a module from the trusted set
  sandbox on|off       enable or disable the sandbox
  perf [name]          performance snapshot
  critical             recent critical performance events
  reset <name>         clear a module's restart counter
  help                 this text
Anything else is dispatched to the module that declares the command.";

#[derive(Clone)]
pub struct Admin {
    manager: Arc<ModuleManager>,
}

impl Admin {
    pub fn new(manager: Arc<ModuleManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ModuleManager> {
        &self.manager
    }

    pub async fn reload_all(&self) -> Result<ScanReport> {
        self.manager.reload_all().await
    }

    /// Load a bundle by path, or by directory name inside the modules dir.
    pub async fn load(&self, target: &str) -> Result<String> {
        let path = Path::new(target);
        let archive = if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.manager.modules_dir().join(target)
        };
        self.manager.load_archive(&archive).await
    }

    pub async fn unload(&self, name: &str) -> Result<()> {
        self.manager.unload(name).await
    }

    pub fn trust(&self, name: &str) -> bool {
        let added = self.manager.sandbox().trust(name);
        info!(module = name, "module trusted");
        added
    }

    pub fn untrust(&self, name: &str) -> bool {
        let removed = self.manager.sandbox().untrust(name);
        info!(module = name, "module untrusted");
        removed
    }

    pub fn set_sandbox_enabled(&self, enabled: bool) {
        self.manager.sandbox().set_enabled(enabled);
    }

    /// One module's sample, or all of them.
    pub fn performance(&self, name: Option<&str>) -> Vec<ModulePerformanceSample> {
        let tracker = self.manager.tracker();
        match name {
            Some(name) => tracker.sample(name).into_iter().collect(),
            None => tracker.all(),
        }
    }

    pub fn critical(&self) -> Vec<CriticalEvent> {
        self.manager.tracker().critical_events()
    }

    pub fn reset_restarts(&self, name: &str) -> bool {
        self.manager.sandbox().reset_restart_attempts(name)
    }

    pub fn list(&self) -> Vec<ModuleSummary> {
        let sandbox = self.manager.sandbox();
        self.manager
            .registry()
            .snapshot()
            .into_iter()
            .map(|r| ModuleSummary {
                name: r.name().to_string(),
                version: r.metadata.version.clone(),
                state: r.state,
                archive: r.archive.clone(),
                commands: r.metadata.commands.len(),
                trusted: sandbox.is_trusted(r.name()),
                restart_attempts: sandbox.restart_attempts(r.name()),
            })
            .collect()
    }

    // ── Console ────────────────────────────────────────────────

    /// Execute one console line and return what to print.
    pub async fn execute_line(&self, line: &str) -> String {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return String::new();
        };
        let args: Vec<String> = words.map(str::to_string).collect();
        let arg = args.first().map(String::as_str);

        match (command, arg) {
            ("help", _) | ("?", _) => CONSOLE_HELP.to_string(),
            ("list", _) | ("ls", _) => render_list(&self.list()),
            ("reload", _) => match self.reload_all().await {
                Ok(report) => render_scan(&report),
                Err(e) => format!("reload failed: {}", e),
            },
            ("load", Some(target)) => match self.load(target).await {
                Ok(name) => format!("loaded {}", name),
                Err(e) => format!("load failed [{}]: {}", e.kind(), e),
            },
            ("unload", Some(name)) => match self.unload(name).await {
                Ok(()) => format!("unloaded {}", name),
                Err(e) => format!("unload failed [{}]: {}", e.kind(), e),
            },
            ("trust", Some(name)) => {
                if self.trust(name) {
                    format!("{} is now trusted", name)
                } else {
                    format!("{} was already trusted", name)
                }
            }
            ("untrust", Some(name)) => {
                if self.untrust(name) {
                    format!("{} is no longer trusted", name)
                } else {
                    format!("{} was not trusted", name)
                }
            }
            ("sandbox", Some("on")) => {
                self.set_sandbox_enabled(true);
                "sandbox enabled".to_string()
            }
            ("sandbox", Some("off")) => {
                self.set_sandbox_enabled(false);
                "sandbox disabled".to_string()
            }
            ("sandbox", _) => format!(
                "sandbox is {}",
                if self.manager.sandbox().is_enabled() { "on" } else { "off" }
            ),
            ("perf", name) => render_performance(&self.performance(name)),
            ("critical", _) => render_critical(&self.critical()),
            ("reset", Some(name)) => {
                if self.reset_restarts(name) {
                    format!("restart counter for {} cleared", name)
                } else {
                    format!("{} has no restart attempts", name)
                }
            }
            ("load" | "unload" | "trust" | "untrust" | "reset", None) => {
                format!("usage: {} <name>", command)
            }
            (label, _) => self.dispatch(label, args.clone()).await,
        }
    }

    async fn dispatch(&self, label: &str, args: Vec<String>) -> String {
        let Some((module, spec)) = self.manager.find_command(label) else {
            return format!("unknown command '{}', try 'help'", label);
        };
        match self
            .manager
            .dispatch_command(&module, label, CommandSender::console(), args)
            .await
        {
            Ok(true) => String::new(),
            Ok(false) if spec.usage.is_empty() => format!("{}: command not handled", module),
            Ok(false) => format!("usage: {}", spec.usage),
            Err(e) => format!("{}: {}", module, e),
        }
    }
}

fn render_list(modules: &[ModuleSummary]) -> String {
    if modules.is_empty() {
        return "no modules loaded".to_string();
    }
    let mut out = format!("{} module(s)", modules.len());
    for m in modules {
        out.push_str(&format!(
            "\n  {:<24} {:<10} {:<14} commands={} restarts={}{}",
            m.name,
            m.version,
            m.state,
            m.commands,
            m.restart_attempts,
            if m.trusted { " trusted" } else { "" }
        ));
    }
    out
}

fn render_scan(report: &ScanReport) -> String {
    let mut out = format!(
        "loaded {} module(s), {} failed",
        report.loaded.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        out.push_str(&format!(
            "\n  {} [{}]: {}",
            failure.module, failure.kind, failure.reason
        ));
    }
    out
}

fn render_performance(samples: &[ModulePerformanceSample]) -> String {
    if samples.is_empty() {
        return "no performance data".to_string();
    }
    let mut out = String::new();
    for s in samples {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!(
            "{:<24} {:<8} cpu={:.1}% mem={:.2}MB latency={:.1}ms",
            s.module,
            s.status,
            s.cpu_percent,
            s.memory_mb,
            s.latency_ms()
        ));
    }
    out
}

fn render_critical(events: &[CriticalEvent]) -> String {
    if events.is_empty() {
        return "no critical events".to_string();
    }
    events
        .iter()
        .map(|e| {
            format!(
                "{} {} cpu={:.1}% mem={:.2}MB latency={:.1}ms",
                e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                e.module,
                e.cpu_percent,
                e.memory_mb,
                e.latency_ms
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
