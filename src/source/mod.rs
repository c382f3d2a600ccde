//! Inbound transports.
//!
//! A source turns whatever the transport delivers into an
//! [`InboundMessage`](crate::event::InboundMessage) and hands it to the
//! shared [`Dispatcher`](crate::Dispatcher):
//!
//! - [`RedisStreamSource`]: one Redis stream per channel, read through a
//!   consumer group
//! - [`http`]: `POST /hooks/{channel}` ingress

pub mod http;
pub mod redis;

use thiserror::Error;

pub use http::{ingress_router, IngressState};
pub use redis::RedisStreamSource;

/// Errors that stop a source from starting or running.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
