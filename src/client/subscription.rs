//! Subscription manager
//!
//! Owned by the caller; there is no process-wide registry. At most one live
//! subscription exists per execution: subscribing again tears the previous
//! one down (task stopped and awaited) before the new feed is opened, so no
//! event is delivered twice.

use crate::client::connector::Connector;
use crate::client::reassembly::{IterationView, Reassembly, Update};
use crate::client::ClientError;
use crate::store::models::{ExecutionId, ExecutionStatus};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callbacks invoked from the subscription task, in event order
///
/// Every method has a no-op default.
pub trait SubscriptionHandlers: Send + 'static {
    /// Feed is open
    fn on_connected(&mut self, _execution_id: &str) {}

    /// Text of an iteration grew
    ///
    /// `text` is the full accumulated text of the iteration, so a renderer
    /// can redraw it without asking the server.
    fn on_chunk(&mut self, _iteration: u32, _delta: &str, _text: &str) {}

    /// An iteration completed
    fn on_complete(&mut self, _view: &IterationView) {}

    /// An iteration failed; other iterations are unaffected
    fn on_error(&mut self, _iteration: u32, _error: &str) {}

    /// The execution reached its terminal status
    fn on_finished(&mut self, _status: ExecutionStatus) {}

    /// Feed closed (after `on_finished`, on transport error, or on teardown)
    fn on_disconnected(&mut self, _execution_id: &str) {}
}

struct ActiveSubscription {
    task: Option<JoinHandle<()>>,
    view: Arc<RwLock<Reassembly>>,
}

impl ActiveSubscription {
    async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Wait until the task is gone so no callback can fire afterwards
            let _ = task.await;
        }
    }

    fn is_live(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Caller-owned set of live execution subscriptions
pub struct SubscriptionManager<C: Connector> {
    connector: Arc<C>,
    active: HashMap<ExecutionId, ActiveSubscription>,
}

impl<C: Connector> SubscriptionManager<C> {
    /// Manager opening feeds through `connector`
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            active: HashMap::new(),
        }
    }

    /// Subscribe to an execution, replacing any existing subscription for it
    ///
    /// Returns once the feed is open; events published from then on reach
    /// `handlers`.
    pub async fn subscribe<H: SubscriptionHandlers>(
        &mut self,
        execution_id: &str,
        mut handlers: H,
    ) -> Result<(), ClientError> {
        if self.unsubscribe(execution_id).await {
            debug!(execution_id = %execution_id, "Replaced existing subscription");
        }

        let mut events = self.connector.connect(execution_id).await?;
        let view = Arc::new(RwLock::new(Reassembly::new(execution_id)));
        let task_view = Arc::clone(&view);
        let id = execution_id.to_string();

        let task = tokio::spawn(async move {
            handlers.on_connected(&id);

            while let Some(item) = events.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(execution_id = %id, error = %e, "Subscription feed failed");
                        break;
                    }
                };

                let update = task_view.write().await.apply(&event);
                match update {
                    Update::Text {
                        iteration,
                        delta,
                        text,
                    } => handlers.on_chunk(iteration, &delta, &text),
                    Update::Completed(view) => handlers.on_complete(&view),
                    Update::Failed { iteration, error } => handlers.on_error(iteration, &error),
                    Update::Finished(status) => {
                        handlers.on_finished(status);
                        break;
                    }
                    Update::Ignored => {}
                }
            }

            handlers.on_disconnected(&id);
        });

        info!(execution_id = %execution_id, "Subscribed to execution");
        self.active.insert(
            execution_id.to_string(),
            ActiveSubscription {
                task: Some(task),
                view,
            },
        );
        Ok(())
    }

    /// Tear down the subscription of an execution and discard its buffers
    ///
    /// Returns whether a subscription existed.
    pub async fn unsubscribe(&mut self, execution_id: &str) -> bool {
        match self.active.remove(execution_id) {
            Some(subscription) => {
                subscription.shutdown().await;
                debug!(execution_id = %execution_id, "Unsubscribed from execution");
                true
            }
            None => false,
        }
    }

    /// Tear down every subscription
    pub async fn unsubscribe_all(&mut self) {
        for (_, subscription) in self.active.drain() {
            subscription.shutdown().await;
        }
    }

    /// Whether a subscription (live or finished) is held for the execution
    pub fn is_subscribed(&self, execution_id: &str) -> bool {
        self.active.contains_key(execution_id)
    }

    /// Whether the subscription's feed is still being read
    pub fn is_live(&self, execution_id: &str) -> bool {
        self.active
            .get(execution_id)
            .is_some_and(ActiveSubscription::is_live)
    }

    /// Number of subscriptions held
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Copy of the current client-side view of an execution
    pub async fn snapshot(&self, execution_id: &str) -> Option<Reassembly> {
        let subscription = self.active.get(execution_id)?;
        let view = subscription.view.read().await;
        Some(view.clone())
    }
}
