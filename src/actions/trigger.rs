//! Trigger Action - starts a build job for qualifying push events.
//!
//! # Example
//!
//! ```rust,ignore
//! use webhook_bridge::actions::TriggerAction;
//! use webhook_bridge::filter::{BranchMatch, FilterPolicy};
//! use webhook_bridge::trigger::{TriggerClient, TriggerConfig};
//! use std::sync::Arc;
//!
//! let config = TriggerConfig::new("ci", "token", "http://jenkins:8080/job/%s/build")?;
//! let action = TriggerAction::new(
//!     FilterPolicy::default().with_branch_match(BranchMatch::Exact),
//!     Arc::new(TriggerClient::new(config)),
//! );
//! ```

use super::{Action, ActionError, ActionOutcome};
use crate::event::{ClassifiedEvent, InboundMessage};
use crate::filter::{FilterPolicy, Verdict};
use crate::trigger::JobTrigger;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Filters events and calls the build server for qualifying pushes.
///
/// Pull-request and unrecognized events are logged only.
#[derive(Clone)]
pub struct TriggerAction {
    policy: FilterPolicy,
    trigger: Arc<dyn JobTrigger>,
}

impl TriggerAction {
    pub fn new(policy: FilterPolicy, trigger: Arc<dyn JobTrigger>) -> Self {
        Self { policy, trigger }
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }
}

#[async_trait]
impl Action for TriggerAction {
    fn name(&self) -> &str {
        "trigger"
    }

    async fn handle(
        &self,
        message: &InboundMessage,
        event: &ClassifiedEvent,
    ) -> Result<ActionOutcome, ActionError> {
        match self.policy.evaluate(event) {
            Verdict::Trigger { job } => {
                info!(channel = %message.channel, job = %job, "Triggering build job");
                let response = self.trigger.trigger(&job).await?;
                Ok(ActionOutcome::Triggered {
                    job,
                    status: response.status,
                })
            }
            Verdict::NoActionConfigured { repository } => {
                info!(
                    channel = %message.channel,
                    repository = %repository,
                    event_type = %event.kind(),
                    "Event qualifies but no action is configured for it"
                );
                Ok(ActionOutcome::NoActionConfigured { repository })
            }
            Verdict::Ignored { reason } => {
                info!(
                    channel = %message.channel,
                    event_type = %event.kind(),
                    reason = %reason,
                    "Ignoring event"
                );
                Ok(ActionOutcome::Ignored { reason })
            }
        }
    }
}
