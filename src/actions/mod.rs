//! Downstream actions for classified events.
//!
//! An [`Action`] is the strategy a [`Dispatcher`](crate::Dispatcher) hands
//! every decoded message to. The two deployment modes are two actions over
//! the same decoder:
//!
//! - [`TriggerAction`]: filters push events by branch and starts a build job
//! - [`RepublishAction`]: forwards every message to the bus topic routed from
//!   its inbound channel
//!
//! ## Writing an Action
//!
//! ```rust,ignore
//! use webhook_bridge::actions::{Action, ActionError, ActionOutcome};
//! use webhook_bridge::event::{ClassifiedEvent, InboundMessage};
//! use webhook_bridge::filter::IgnoreReason;
//! use async_trait::async_trait;
//!
//! struct Discard;
//!
//! #[async_trait]
//! impl Action for Discard {
//!     fn name(&self) -> &str {
//!         "discard"
//!     }
//!
//!     async fn handle(
//!         &self,
//!         _message: &InboundMessage,
//!         _event: &ClassifiedEvent,
//!     ) -> Result<ActionOutcome, ActionError> {
//!         Ok(ActionOutcome::Ignored { reason: IgnoreReason::Unrecognized })
//!     }
//! }
//! ```

pub mod republish;
pub mod trigger;

use crate::bus::PublishError;
use crate::event::{ClassifiedEvent, InboundMessage};
use crate::filter::IgnoreReason;
use crate::trigger::TriggerError;
use async_trait::async_trait;
use thiserror::Error;

pub use republish::RepublishAction;
pub use trigger::TriggerAction;

/// Errors from a downstream action. None of them are fatal to the relay.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("trigger failed: {0}")]
    Trigger(#[from] TriggerError),

    #[error("publish to '{topic}' failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: PublishError,
    },

    /// The payload could not be re-serialized for republishing
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What an action did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// A build job was triggered
    Triggered { job: String, status: u16 },

    /// The event qualified but no action is defined for it
    NoActionConfigured { repository: String },

    /// The event did not qualify
    Ignored { reason: IgnoreReason },

    /// The message was forwarded to a bus topic
    Republished { topic: String, dead_lettered: bool },
}

impl ActionOutcome {
    /// Stable short name for logs and responses
    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Triggered { .. } => "triggered",
            ActionOutcome::NoActionConfigured { .. } => "no_action_configured",
            ActionOutcome::Ignored { .. } => "ignored",
            ActionOutcome::Republished { .. } => "republished",
        }
    }
}

/// A downstream action strategy.
///
/// Actions are shared across tasks and must hold no per-message state.
#[async_trait]
pub trait Action: Send + Sync {
    /// Name used in logs (e.g. "trigger", "republish")
    fn name(&self) -> &str;

    /// Act on one decoded message.
    async fn handle(
        &self,
        message: &InboundMessage,
        event: &ClassifiedEvent,
    ) -> Result<ActionOutcome, ActionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_from_trigger_error() {
        let err: ActionError = TriggerError::EmptyJobName.into();
        assert!(matches!(err, ActionError::Trigger(TriggerError::EmptyJobName)));
        assert_eq!(err.to_string(), "trigger failed: job name must not be empty");
    }

    #[test]
    fn test_publish_error_names_topic() {
        let err = ActionError::Publish {
            topic: "dlq".to_string(),
            source: PublishError::Connection("refused".to_string()),
        };
        assert!(err.to_string().contains("'dlq'"));
    }

    #[test]
    fn test_outcome_labels() {
        let outcome = ActionOutcome::Republished {
            topic: "dlq".to_string(),
            dead_lettered: true,
        };
        assert_eq!(outcome.label(), "republished");
        assert_eq!(
            ActionOutcome::Ignored {
                reason: IgnoreReason::Unrecognized
            }
            .label(),
            "ignored"
        );
    }
}
