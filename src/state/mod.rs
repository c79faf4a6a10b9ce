// State management module
// Shared handles passed to every HTTP and WebSocket handler

pub mod app_state;

pub use app_state::AppState;
