// Application state
// Holds the collaborators the request handlers need

use crate::bus::BroadcastBus;
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::provider::{ProviderGateway, StreamingTransport};
use crate::store::ExecutionStore;
use std::sync::Arc;

/// Shared application state
///
/// Cheap to clone: every field is a handle.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration
    pub config: Arc<Config>,
    /// Record store for prompts, executions and results
    pub store: Arc<dyn ExecutionStore>,
    /// Progress events for live subscribers
    pub bus: BroadcastBus,
    /// Background runner for executions
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Wire the orchestrator and bus around a store
    ///
    /// `client` is shared by the batch gateway and the streaming transport so
    /// both reuse one connection pool.
    pub fn new(config: Config, store: Arc<dyn ExecutionStore>, client: reqwest::Client) -> Self {
        let bus = BroadcastBus::new(config.bus.channel_capacity);
        let gateway = ProviderGateway::new(
            client.clone(),
            config.provider.base_url.clone(),
            config.provider.timeout(),
        );
        let transport = StreamingTransport::new(
            client,
            config.provider.base_url.clone(),
            config.provider.stream_idle_timeout(),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            gateway,
            transport,
            bus.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            bus,
            orchestrator,
        }
    }
}
