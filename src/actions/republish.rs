//! Republish Action - forwards messages onto the internal bus.
//!
//! The payload is parsed generically and re-serialized before publishing, so
//! the bus always carries compact JSON regardless of how the sender
//! formatted it. No branch filtering happens here: every message that is
//! valid JSON is forwarded to the topic routed from its channel.

use super::{Action, ActionError, ActionOutcome};
use crate::bus::BusPublisher;
use crate::event::{ClassifiedEvent, InboundMessage};
use crate::routes::RouteTable;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Routes messages by channel and publishes them on the bus.
#[derive(Clone)]
pub struct RepublishAction {
    routes: Arc<RouteTable>,
    bus: Arc<dyn BusPublisher>,
}

impl RepublishAction {
    pub fn new(routes: Arc<RouteTable>, bus: Arc<dyn BusPublisher>) -> Self {
        Self { routes, bus }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

#[async_trait]
impl Action for RepublishAction {
    fn name(&self) -> &str {
        "republish"
    }

    async fn handle(
        &self,
        message: &InboundMessage,
        event: &ClassifiedEvent,
    ) -> Result<ActionOutcome, ActionError> {
        let body: Value = serde_json::from_slice(&message.payload).map_err(|e| {
            error!(
                channel = %message.channel,
                error = %e,
                "Message is not valid JSON, cannot republish"
            );
            ActionError::Serialization(e)
        })?;
        let payload = serde_json::to_vec(&body)?;

        let topic = self.routes.resolve(&message.channel);
        let dead_lettered = topic == self.routes.dead_letter_topic();

        debug!(
            channel = %message.channel,
            topic = %topic,
            event_type = %event.kind(),
            payload = %body,
            "Republishing message"
        );

        if let Err(source) = self.bus.publish(topic, &payload).await {
            error!(
                channel = %message.channel,
                topic = %topic,
                error = %source,
                "Failed to publish message"
            );
            return Err(ActionError::Publish {
                topic: topic.to_string(),
                source,
            });
        }

        info!(
            channel = %message.channel,
            topic = %topic,
            event_type = %event.kind(),
            "Message republished"
        );

        Ok(ActionOutcome::Republished {
            topic: topic.to_string(),
            dead_lettered,
        })
    }
}
