//! Static channel-to-topic routing for the republish relay.
//!
//! Lookups are exact matches only. A channel with no entry resolves to the
//! dead-letter topic so no message is ever dropped for lack of a route.

use std::collections::HashMap;
use tracing::warn;

/// Topic for messages whose channel has no configured route
pub const DEAD_LETTER_TOPIC: &str = "dlq";

/// Read-only map from inbound channel to outbound topic.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, String>,
    dead_letter_topic: String,
}

impl RouteTable {
    /// Create a table that falls back to [`DEAD_LETTER_TOPIC`]
    pub fn new(routes: HashMap<String, String>) -> Self {
        Self {
            routes,
            dead_letter_topic: DEAD_LETTER_TOPIC.to_string(),
        }
    }

    /// Use a different dead-letter topic
    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = topic.into();
        self
    }

    /// Resolve the outbound topic for a channel.
    pub fn resolve(&self, channel: &str) -> &str {
        match self.routes.get(channel) {
            Some(topic) => topic,
            None => {
                warn!(
                    channel = %channel,
                    dead_letter_topic = %self.dead_letter_topic,
                    "No route for channel, using dead-letter topic"
                );
                &self.dead_letter_topic
            }
        }
    }

    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Inbound channels with a route
    pub fn channels(&self) -> Vec<&str> {
        self.routes.keys().map(|s| s.as_str()).collect()
    }
}

impl FromIterator<(String, String)> for RouteTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
