//! Crash notification channels: console, in-application broadcast, webhook.
//!
//! Each channel is attempted on its own; a failing channel is logged and
//! never stops the others.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, warn};

use hearth_config::NotifyConfig;
use hearth_core::{Broadcaster, FailureKind};

use crate::main_context::MainContext;

/// What happened to the module after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RestartOutcome {
    Scheduled { attempt: u32, delay_ms: u64 },
    LimitReached { attempts: u32 },
    Disabled,
}

impl std::fmt::Display for RestartOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartOutcome::Scheduled { attempt, delay_ms } => {
                write!(f, "restart #{} in {} ms", attempt, delay_ms)
            }
            RestartOutcome::LimitReached { attempts } => {
                write!(f, "restart limit reached after {} attempts", attempts)
            }
            RestartOutcome::Disabled => write!(f, "quarantined"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrashNotice {
    pub module: String,
    pub operation: String,
    pub kind: FailureKind,
    pub message: String,
    pub trace: Option<String>,
    pub restart: RestartOutcome,
    pub report: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    module: &'a str,
    kind: FailureKind,
    message: &'a str,
    operation: &'a str,
    restart: RestartOutcome,
    timestamp: DateTime<Utc>,
    host: String,
}

pub struct Notifier {
    broadcaster: Option<Arc<dyn Broadcaster>>,
    main: Arc<MainContext>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(broadcaster: Option<Arc<dyn Broadcaster>>, main: Arc<MainContext>) -> Self {
        Self {
            broadcaster,
            main,
            client: reqwest::Client::new(),
        }
    }

    pub async fn notify(&self, config: &NotifyConfig, notice: &CrashNotice, detailed: bool) {
        if config.console {
            self.console(notice, detailed);
        }
        if config.broadcast {
            self.broadcast(notice).await;
        }
        if config.webhook {
            self.webhook(&config.webhook_url, notice);
        }
    }

    fn console(&self, notice: &CrashNotice, detailed: bool) {
        error!(
            module = %notice.module,
            operation = %notice.operation,
            kind = %notice.kind,
            restart = %notice.restart,
            report = ?notice.report,
            "module crashed: {}",
            notice.message
        );
        if detailed {
            if let Some(trace) = &notice.trace {
                error!(module = %notice.module, "{}", trace);
            }
        }
    }

    async fn broadcast(&self, notice: &CrashNotice) {
        let Some(broadcaster) = self.broadcaster.clone() else {
            return;
        };
        let message = format!(
            "[Hearth] Module {} crashed ({}) during {}: {}",
            notice.module, notice.kind, notice.operation, notice.restart
        );
        if let Err(e) = self.main.run(move || broadcaster.broadcast(&message)).await {
            warn!(module = %notice.module, error = %e, "crash broadcast failed");
        }
    }

    fn webhook(&self, url: &str, notice: &CrashNotice) {
        if url.is_empty() {
            warn!(module = %notice.module, "webhook notification enabled but no URL configured");
            return;
        }
        let payload = WebhookPayload {
            event: "module_crash",
            module: &notice.module,
            kind: notice.kind,
            message: &notice.message,
            operation: &notice.operation,
            restart: notice.restart,
            timestamp: notice.timestamp,
            host: format!("hearth/{}", env!("CARGO_PKG_VERSION")),
        };
        let body = match serde_json::to_value(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(module = %notice.module, error = %e, "failed to encode webhook payload");
                return;
            }
        };
        let request = self.client.post(url).json(&body);
        let module = notice.module.clone();
        tokio::spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(module = %module, "crash webhook delivered");
                }
                Ok(resp) => {
                    warn!(module = %module, status = %resp.status(), "crash webhook rejected");
                }
                Err(e) => warn!(module = %module, error = %e, "crash webhook failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::LogBroadcaster;

    fn notice() -> CrashNotice {
        CrashNotice {
            module: "Foo".into(),
            operation: "initialize".into(),
            kind: FailureKind::Exception,
            message: "boom".into(),
            trace: None,
            restart: RestartOutcome::Scheduled {
                attempt: 1,
                delay_ms: 5000,
            },
            report: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn broadcast_runs_even_when_webhook_is_misconfigured() {
        let main = MainContext::start().unwrap();
        let inbox = Arc::new(LogBroadcaster::new());
        let notifier = Notifier::new(Some(inbox.clone() as Arc<dyn Broadcaster>), main.clone());
        let config = NotifyConfig {
            console: true,
            broadcast: true,
            webhook: true,
            webhook_url: String::new(),
        };
        notifier.notify(&config, &notice(), true).await;
        let messages = inbox.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Foo"));
        assert!(messages[0].contains("EXCEPTION"));
        assert!(messages[0].contains("restart #1"));
        main.shutdown();
    }

    #[test]
    fn restart_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(RestartOutcome::LimitReached { attempts: 2 }).unwrap();
        assert_eq!(json["status"], "limit_reached");
        assert_eq!(json["attempts"], 2);
    }
}
