use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::FailureKind;

/// Lifecycle and supervision events published by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Module lifecycle ───────────────────────────────────────
    ModuleLoaded {
        module: String,
        version: String,
    },
    ModuleUnloaded {
        module: String,
    },
    ModulesReloaded {
        module_count: usize,
    },

    // ── Sandbox supervision ────────────────────────────────────
    ModuleQuarantined {
        module: String,
        failure: FailureKind,
        message: String,
    },
    RestartScheduled {
        module: String,
        attempt: u32,
        delay_ms: u64,
    },
    RestartLimitReached {
        module: String,
        attempts: u32,
    },

    // ── Performance ────────────────────────────────────────────
    PerformanceCritical {
        module: String,
        cpu_percent: f64,
        memory_mb: f64,
        latency_ms: f64,
    },

    // ── Module-defined ─────────────────────────────────────────
    Custom {
        source: String,
        name: String,
        payload: serde_json::Value,
    },

    // ── System ─────────────────────────────────────────────────
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    Shutdown,
}

impl Event {
    /// The serde tag of this event, used as the listener key.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ModuleLoaded { .. } => "module_loaded",
            Event::ModuleUnloaded { .. } => "module_unloaded",
            Event::ModulesReloaded { .. } => "modules_reloaded",
            Event::ModuleQuarantined { .. } => "module_quarantined",
            Event::RestartScheduled { .. } => "restart_scheduled",
            Event::RestartLimitReached { .. } => "restart_limit_reached",
            Event::PerformanceCritical { .. } => "performance_critical",
            Event::Custom { .. } => "custom",
            Event::Heartbeat { .. } => "heartbeat",
            Event::Shutdown => "shutdown",
        }
    }
}

/// A broadcast-based event bus for host-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
