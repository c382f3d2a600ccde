//! # Webhook Bridge
//!
//! Relays webhook events that arrive over a pub/sub transport to where they
//! are needed: a build server job trigger, or a topic on the internal bus.
//!
//! ## Architecture
//!
//! ```text
//! Source (Redis stream / HTTP) -> Dispatcher -> Decoder -> Action
//!                                                           ├─ Trigger:   Filter -> build server
//!                                                           └─ Republish: Routes -> bus topic
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Inbound messages and the push / pull-request decoder
//! - [`filter`]: Branch and pull-request action filter
//! - [`routes`]: Channel-to-topic routing with dead-letter fallback
//! - [`dispatcher`]: Decode-and-hand-off for every inbound message
//! - [`actions`]: Trigger and republish strategies
//! - [`trigger`]: Build server HTTP client
//! - [`bus`]: Outbound bus publisher
//! - [`source`]: Redis stream and HTTP inbound transports

pub mod actions;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod event;
pub mod filter;
pub mod health;
pub mod routes;
pub mod shutdown;
pub mod source;
pub mod trigger;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at crate root
pub use actions::{Action, ActionError, ActionOutcome};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use event::{ClassifiedEvent, InboundMessage};
pub use filter::{BranchMatch, FilterPolicy, Verdict};
pub use routes::{RouteTable, DEAD_LETTER_TOPIC};
