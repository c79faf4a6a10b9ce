//! Client-side subscription and polling
//!
//! Consumers of a running execution either subscribe to its live events
//! ([`SubscriptionManager`] over a [`Connector`]) or poll the status endpoint
//! ([`StatusPoller`]) until the run is complete.

pub mod connector;
pub mod polling;
pub mod reassembly;
pub mod subscription;

pub use connector::{BusConnector, Connector, EventStream, WebSocketConnector};
pub use polling::{HttpStatusSource, PollHandle, StatusPoller, StatusSource, DEFAULT_POLL_INTERVAL};
pub use reassembly::{IterationPhase, IterationView, Reassembly, Update};
pub use subscription::{SubscriptionHandlers, SubscriptionManager};

use thiserror::Error;

/// Errors seen by subscription and polling clients
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not open the event connection
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Connection broke after it was established
    #[error("Transport error: {0}")]
    Transport(String),

    /// Status endpoint answered with a non-2xx status
    #[error("Status request failed: {status} - {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// Response body could not be decoded
    #[error("Invalid response: {0}")]
    Decode(String),
}
