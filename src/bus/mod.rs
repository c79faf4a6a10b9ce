//! Real-time event bus
//!
//! Iteration events go to `Topic::Iterations(id)`, the final status to
//! `Topic::Execution(id)`.

pub mod broadcast;
pub mod events;

pub use broadcast::{BroadcastBus, BusSubscription};
pub use events::{FinalStatus, IterationEvent, StreamEvent, Topic};
