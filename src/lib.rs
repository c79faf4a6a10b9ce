//! Prompt Runner Library
//!
//! Runs a prompt configuration N times against a text-generation service,
//! persists one result per iteration and broadcasts progress to live
//! subscribers. The server binary lives in `src/main.rs`.

pub mod api;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod provider;
/// Shared handles for HTTP handlers
pub mod state;
pub mod store;
pub mod websocket;
