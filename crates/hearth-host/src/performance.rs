//! Per-module performance estimates.
//!
//! CPU and memory figures are estimates derived from the latency of
//! sandboxed calls, not per-thread accounting. Both are exponentially
//! smoothed so one slow call does not flip a module to CRITICAL.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use hearth_config::PerformanceConfig;
use hearth_core::{Event, EventBus};

use crate::registry::ModuleRegistry;

/// Memory charged per recorded operation in the sampling window.
const BYTES_PER_OPERATION: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceStatus {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub cpu_warning: f64,
    pub cpu_critical: f64,
    pub memory_warning_mb: f64,
    pub memory_critical_mb: f64,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
}

impl From<&PerformanceConfig> for Thresholds {
    fn from(c: &PerformanceConfig) -> Self {
        Self {
            cpu_warning: c.cpu_warning,
            cpu_critical: c.cpu_critical,
            memory_warning_mb: c.memory_warning_mb,
            memory_critical_mb: c.memory_critical_mb,
            latency_warning_ms: c.latency_warning_ms,
            latency_critical_ms: c.latency_critical_ms,
        }
    }
}

impl std::fmt::Display for PerformanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            PerformanceStatus::Ok => "OK",
            PerformanceStatus::Warning => "WARNING",
            PerformanceStatus::Critical => "CRITICAL",
        })
    }
}

impl PerformanceStatus {
    pub fn evaluate(cpu: f64, memory_mb: f64, latency_ms: f64, t: &Thresholds) -> Self {
        if cpu >= t.cpu_critical
            || memory_mb >= t.memory_critical_mb
            || latency_ms >= t.latency_critical_ms
        {
            PerformanceStatus::Critical
        } else if cpu >= t.cpu_warning
            || memory_mb >= t.memory_warning_mb
            || latency_ms >= t.latency_warning_ms
        {
            PerformanceStatus::Warning
        } else {
            PerformanceStatus::Ok
        }
    }
}

/// Latency statistics for one operation name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub recent: VecDeque<f64>,
}

impl OperationStats {
    fn record(&mut self, ms: f64, window: usize) {
        if self.count == 0 || ms < self.min_ms {
            self.min_ms = ms;
        }
        if ms > self.max_ms {
            self.max_ms = ms;
        }
        self.count += 1;
        self.total_ms += ms;
        if self.recent.len() == window.max(1) {
            self.recent.pop_front();
        }
        self.recent.push_back(ms);
    }

    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }

    pub fn recent_average_ms(&self) -> f64 {
        if self.recent.is_empty() {
            0.0
        } else {
            self.recent.iter().sum::<f64>() / self.recent.len() as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModulePerformanceSample {
    pub module: String,
    pub cpu_percent: f64,
    pub cpu_history: VecDeque<f64>,
    pub memory_mb: f64,
    pub operations: BTreeMap<String, OperationStats>,
    pub status: PerformanceStatus,
    pub last_update: DateTime<Utc>,
    #[serde(skip)]
    busy_ms: f64,
    #[serde(skip)]
    window_ops: u64,
    #[serde(skip)]
    touched: Instant,
}

impl ModulePerformanceSample {
    fn new(module: &str, now: Instant) -> Self {
        Self {
            module: module.to_string(),
            cpu_percent: 0.0,
            cpu_history: VecDeque::new(),
            memory_mb: 0.0,
            operations: BTreeMap::new(),
            status: PerformanceStatus::Ok,
            last_update: Utc::now(),
            busy_ms: 0.0,
            window_ops: 0,
            touched: now,
        }
    }

    /// Mean of the recent windows across all operations.
    pub fn latency_ms(&self) -> f64 {
        let (sum, n) = self
            .operations
            .values()
            .flat_map(|s| s.recent.iter())
            .fold((0.0, 0usize), |(sum, n), ms| (sum + ms, n + 1));
        if n == 0 { 0.0 } else { sum / n as f64 }
    }
}

/// A transition into CRITICAL.
#[derive(Debug, Clone, Serialize)]
pub struct CriticalEvent {
    pub module: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub latency_ms: f64,
}

pub struct PerformanceTracker {
    config: PerformanceConfig,
    thresholds: RwLock<Thresholds>,
    samples: DashMap<String, ModulePerformanceSample>,
    critical: Mutex<VecDeque<CriticalEvent>>,
    last_tick: Mutex<Instant>,
    registry: Arc<ModuleRegistry>,
    events: EventBus,
}

impl PerformanceTracker {
    pub fn new(config: PerformanceConfig, registry: Arc<ModuleRegistry>, events: EventBus) -> Self {
        Self {
            thresholds: RwLock::new(Thresholds::from(&config)),
            config,
            samples: DashMap::new(),
            critical: Mutex::new(VecDeque::new()),
            last_tick: Mutex::new(Instant::now()),
            registry,
            events,
        }
    }

    /// Record one sandboxed call. Creates the module's sample on first use.
    pub fn record(&self, module: &str, operation: &str, elapsed: Duration) {
        if !self.config.enabled {
            return;
        }
        let now = Instant::now();
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut sample = self
            .samples
            .entry(module.to_string())
            .or_insert_with(|| ModulePerformanceSample::new(module, now));
        sample
            .operations
            .entry(operation.to_string())
            .or_default()
            .record(ms, self.config.recent_window);
        sample.busy_ms += ms;
        sample.window_ops += 1;
        sample.touched = now;
    }

    /// One sampling pass over every enabled module, then prune.
    pub fn tick(&self) {
        let now = Instant::now();
        let elapsed_ms = {
            let mut last = self.last_tick.lock();
            let ms = now.duration_since(*last).as_secs_f64() * 1000.0;
            *last = now;
            ms.max(1.0)
        };
        let alpha = self.config.smoothing;
        let thresholds = *self.thresholds.read();

        for name in self.registry.enabled_names() {
            let footprint = self
                .registry
                .get(&name)
                .map(|r| r.loader.code_footprint())
                .unwrap_or(0);
            let mut sample = self
                .samples
                .entry(name.clone())
                .or_insert_with(|| ModulePerformanceSample::new(&name, now));

            let raw_cpu = (sample.busy_ms / elapsed_ms * 100.0).min(100.0);
            let raw_memory =
                (footprint as f64 + sample.window_ops as f64 * BYTES_PER_OPERATION) / MIB;
            sample.cpu_percent = alpha * raw_cpu + (1.0 - alpha) * sample.cpu_percent;
            sample.memory_mb = alpha * raw_memory + (1.0 - alpha) * sample.memory_mb;
            let cpu = sample.cpu_percent;
            if sample.cpu_history.len() == self.config.history_size.max(1) {
                sample.cpu_history.pop_front();
            }
            sample.cpu_history.push_back(cpu);
            sample.busy_ms = 0.0;
            sample.window_ops = 0;
            sample.touched = now;
            sample.last_update = Utc::now();

            let latency = sample.latency_ms();
            let memory = sample.memory_mb;
            let previous = sample.status;
            let status = PerformanceStatus::evaluate(cpu, memory, latency, &thresholds);
            sample.status = status;
            if status == PerformanceStatus::Critical && previous != PerformanceStatus::Critical {
                let event = CriticalEvent {
                    module: name.clone(),
                    timestamp: sample.last_update,
                    cpu_percent: cpu,
                    memory_mb: memory,
                    latency_ms: latency,
                };
                drop(sample);
                self.push_critical(event);
            }
        }

        let pruned = self.prune_stale(now);
        if pruned > 0 {
            debug!(pruned, "pruned stale performance samples");
        }
    }

    fn push_critical(&self, event: CriticalEvent) {
        warn!(
            module = %event.module,
            cpu = event.cpu_percent,
            memory_mb = event.memory_mb,
            latency_ms = event.latency_ms,
            "module performance is critical"
        );
        self.events.publish(Event::PerformanceCritical {
            module: event.module.clone(),
            cpu_percent: event.cpu_percent,
            memory_mb: event.memory_mb,
            latency_ms: event.latency_ms,
        });
        let mut queue = self.critical.lock();
        if queue.len() >= self.config.critical_events_capacity.max(1) {
            queue.pop_front();
        }
        queue.push_back(event);
    }

    /// Replace the status thresholds; the next tick evaluates against them.
    pub fn set_thresholds(&self, config: &PerformanceConfig) {
        *self.thresholds.write() = Thresholds::from(config);
        debug!("performance thresholds updated");
    }

    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.read()
    }

    /// Drop samples of modules that are no longer registered and have not
    /// been touched for `stale_after`. Registered modules are always kept.
    pub fn prune_stale(&self, now: Instant) -> usize {
        let stale_after = self.config.stale_after();
        let before = self.samples.len();
        self.samples.retain(|name, sample| {
            self.registry.contains(name) || now.duration_since(sample.touched) < stale_after
        });
        before - self.samples.len()
    }

    /// Run [`tick`](Self::tick) every `interval_secs` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            return None;
        }
        let period = self.config.interval();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => self.tick(),
                }
            }
        }))
    }

    // ── Queries ────────────────────────────────────────────────

    pub fn sample(&self, module: &str) -> Option<ModulePerformanceSample> {
        self.samples.get(module).map(|s| s.value().clone())
    }

    pub fn all(&self) -> Vec<ModulePerformanceSample> {
        let mut all: Vec<_> = self.samples.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.module.cmp(&b.module));
        all
    }

    /// Samples currently in CRITICAL.
    pub fn critical(&self) -> Vec<ModulePerformanceSample> {
        self.all()
            .into_iter()
            .filter(|s| s.status == PerformanceStatus::Critical)
            .collect()
    }

    /// Recent transitions into CRITICAL, oldest first.
    pub fn critical_events(&self) -> Vec<CriticalEvent> {
        self.critical.lock().iter().cloned().collect()
    }
}
