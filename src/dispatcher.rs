//! Dispatcher - the path every inbound message takes.
//!
//! ```text
//! InboundMessage (channel: "github", payload: {...})
//!     │
//!     ▼
//! ┌─────────────────────────────────────┐
//! │            DISPATCHER               │
//! │                                     │
//! │  1. Decode: push? pull request? unknown
//! │  2. Log the classification          │
//! │  3. Hand off to the Action          │
//! └─────────────────────────────────────┘
//!     │
//!     ├── TriggerAction   -> filter -> build server
//!     └── RepublishAction -> route  -> bus topic
//! ```
//!
//! The dispatcher holds nothing mutable, so one instance behind an `Arc`
//! serves every source task concurrently.

use crate::actions::{Action, ActionError, ActionOutcome};
use crate::event::{ClassifiedEvent, InboundMessage};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("action '{action}' failed: {source}")]
    ActionFailed {
        action: String,
        #[source]
        source: ActionError,
    },
}

/// Result of dispatching one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Channel the message arrived on
    pub channel: String,

    /// Classification of the payload ("push", "pull_request", "unknown")
    pub event_type: &'static str,

    /// Name of the action that handled it
    pub action: String,

    pub outcome: ActionOutcome,
}

/// Decodes inbound messages and hands them to a downstream action.
#[derive(Clone)]
pub struct Dispatcher {
    action: Arc<dyn Action>,
}

impl Dispatcher {
    pub fn new(action: Arc<dyn Action>) -> Self {
        Self { action }
    }

    /// Name of the configured action
    pub fn action_name(&self) -> &str {
        self.action.name()
    }

    /// Dispatch one message.
    ///
    /// Classification never fails; only the downstream action can, and its
    /// error comes back as a value for the caller to log.
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<DispatchReport, DispatchError> {
        debug!(
            channel = %message.channel,
            bytes = message.payload.len(),
            "Dispatching message"
        );

        let event = ClassifiedEvent::decode(&message.payload);
        log_classification(message, &event);

        match self.action.handle(message, &event).await {
            Ok(outcome) => {
                debug!(
                    channel = %message.channel,
                    action = %self.action.name(),
                    outcome = ?outcome,
                    "Message dispatched"
                );
                Ok(DispatchReport {
                    channel: message.channel.clone(),
                    event_type: event.kind(),
                    action: self.action.name().to_string(),
                    outcome,
                })
            }
            Err(source) => {
                warn!(
                    channel = %message.channel,
                    action = %self.action.name(),
                    error = %source,
                    "Action failed"
                );
                Err(DispatchError::ActionFailed {
                    action: self.action.name().to_string(),
                    source,
                })
            }
        }
    }
}

fn log_classification(message: &InboundMessage, event: &ClassifiedEvent) {
    match event {
        ClassifiedEvent::Push(push) => info!(
            channel = %message.channel,
            repository = %push.repository_name,
            git_ref = %push.git_ref,
            "Received push event"
        ),
        ClassifiedEvent::PullRequest(pr) => info!(
            channel = %message.channel,
            repository = %pr.repository_name,
            action = %pr.action,
            "Received pull request event"
        ),
        ClassifiedEvent::Unknown(_) => info!(
            channel = %message.channel,
            payload = %message.payload_lossy(),
            "Received unknown event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{RepublishAction, TriggerAction};
    use crate::bus::InMemoryBus;
    use crate::filter::{FilterPolicy, IgnoreReason};
    use crate::routes::{RouteTable, DEAD_LETTER_TOPIC};
    use crate::test_utils::CapturedLogs;
    use crate::trigger::{JobTrigger, TriggerError, TriggerResponse};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTrigger {
        jobs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobTrigger for RecordingTrigger {
        async fn trigger(&self, job: &str) -> Result<TriggerResponse, TriggerError> {
            if job.is_empty() {
                return Err(TriggerError::EmptyJobName);
            }
            self.jobs.lock().unwrap().push(job.to_string());
            Ok(TriggerResponse {
                url: format!("http://host/job/{}/build", job),
                status: 200,
            })
        }
    }

    fn trigger_dispatcher() -> (Dispatcher, Arc<RecordingTrigger>) {
        let recorder = Arc::new(RecordingTrigger::default());
        let action = TriggerAction::new(FilterPolicy::default(), recorder.clone());
        (Dispatcher::new(Arc::new(action)), recorder)
    }

    #[tokio::test]
    async fn test_master_push_triggers_job() {
        let (dispatcher, recorder) = trigger_dispatcher();
        let message = InboundMessage::new(
            "github",
            r#"{"ref":"refs/heads/master","repository":{"name":"svc"}}"#,
        );

        let report = dispatcher.dispatch(&message).await.unwrap();

        assert_eq!(report.channel, "github");
        assert_eq!(report.event_type, "push");
        assert_eq!(report.action, "trigger");
        assert_eq!(
            report.outcome,
            ActionOutcome::Triggered {
                job: "svc".to_string(),
                status: 200
            }
        );
        assert_eq!(*recorder.jobs.lock().unwrap(), vec!["svc".to_string()]);
    }

    #[tokio::test]
    async fn test_feature_branch_push_is_ignored() {
        let (dispatcher, recorder) = trigger_dispatcher();
        let message = InboundMessage::new(
            "github",
            r#"{"ref":"refs/heads/feature-x","repository":{"name":"svc"}}"#,
        );

        let report = dispatcher.dispatch(&message).await.unwrap();

        assert_eq!(
            report.outcome,
            ActionOutcome::Ignored {
                reason: IgnoreReason::BranchMismatch {
                    git_ref: "refs/heads/feature-x".to_string()
                }
            }
        );
        assert!(recorder.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_payload_is_reported() {
        let (dispatcher, _) = trigger_dispatcher();
        let message = InboundMessage::new("github", "plain text");

        let report = dispatcher.dispatch(&message).await.unwrap();

        assert_eq!(report.event_type, "unknown");
        assert!(!matches!(report.outcome, ActionOutcome::Triggered { .. }));
    }

    #[tokio::test]
    async fn test_republish_unmapped_channel() {
        let bus = Arc::new(InMemoryBus::new());
        let routes = Arc::new(RouteTable::new(HashMap::from([(
            "github".to_string(),
            "events.github".to_string(),
        )])));
        let dispatcher = Dispatcher::new(Arc::new(RepublishAction::new(routes, bus.clone())));
        let message = InboundMessage::new(
            "chan-9",
            r#"{"ref":"refs/heads/master","repository":{"name":"svc"}}"#,
        );

        let report = dispatcher.dispatch(&message).await.unwrap();

        assert_eq!(report.action, "republish");
        let messages = bus.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, DEAD_LETTER_TOPIC);
        assert_eq!(
            messages[0].payload,
            br#"{"ref":"refs/heads/master","repository":{"name":"svc"}}"#
        );
    }

    #[tokio::test]
    async fn test_action_failure_becomes_dispatch_error() {
        let bus = Arc::new(InMemoryBus::new());
        let routes = Arc::new(RouteTable::new(HashMap::new()));
        let dispatcher = Dispatcher::new(Arc::new(RepublishAction::new(routes, bus)));

        let result = dispatcher
            .dispatch(&InboundMessage::new("github", "{not json"))
            .await;

        match result {
            Err(DispatchError::ActionFailed { action, .. }) => assert_eq!(action, "republish"),
            other => panic!("expected action failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_feature_branch_push_logs_one_info_record() {
        let (logs, _guard) = CapturedLogs::install();
        let (dispatcher, recorder) = trigger_dispatcher();
        let message = InboundMessage::new(
            "github",
            r#"{"ref":"refs/heads/feature-x","repository":{"name":"svc"}}"#,
        );

        dispatcher.dispatch(&message).await.unwrap();

        let ignored = logs.matching("INFO", "Ignoring event");
        assert_eq!(ignored.len(), 1, "{:?}", logs.lines());
        assert!(ignored[0].contains("refs/heads/feature-x"));
        assert!(logs.matching("INFO", "Triggering build job").is_empty());
        assert!(recorder.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_payload_logs_at_info() {
        let (logs, _guard) = CapturedLogs::install();
        let (dispatcher, _) = trigger_dispatcher();

        dispatcher
            .dispatch(&InboundMessage::new("github", "plain text"))
            .await
            .unwrap();

        let received = logs.matching("INFO", "Received unknown event");
        assert_eq!(received.len(), 1, "{:?}", logs.lines());
        assert!(received[0].contains("plain text"));
        assert_eq!(logs.matching("INFO", "Ignoring event").len(), 1);
        assert!(logs.matching("ERROR", "").is_empty());
    }

    #[tokio::test]
    async fn test_route_miss_logs_warning() {
        let (logs, _guard) = CapturedLogs::install();
        let bus = Arc::new(InMemoryBus::new());
        let routes: RouteTable = [("github".to_string(), "events.github".to_string())]
            .into_iter()
            .collect();
        let dispatcher = Dispatcher::new(Arc::new(RepublishAction::new(
            Arc::new(routes),
            bus.clone(),
        )));

        dispatcher
            .dispatch(&InboundMessage::new("chan-9", r#"{"a":1}"#))
            .await
            .unwrap();

        let misses = logs.matching("WARN", "No route for channel");
        assert_eq!(misses.len(), 1, "{:?}", logs.lines());
        assert!(misses[0].contains("chan-9"));
    }

    #[tokio::test]
    async fn test_concurrent_dispatch() {
        let (dispatcher, recorder) = trigger_dispatcher();
        let dispatcher = Arc::new(dispatcher);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let payload = format!(
                        r#"{{"ref":"refs/heads/master","repository":{{"name":"svc-{}"}}}}"#,
                        i
                    );
                    dispatcher
                        .dispatch(&InboundMessage::new("github", payload))
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(recorder.jobs.lock().unwrap().len(), 8);
    }
}
