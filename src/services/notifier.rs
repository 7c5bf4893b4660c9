use crate::models::ServerEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Push channel back to connected clients.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, connection_id: &str, event: ServerEvent);
}

/// Per-connection outbound queues drained by each socket's writer task.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    senders: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(connection_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, connection_id: &str) {
        self.senders
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(connection_id);
    }
}

impl NotificationSink for ClientRegistry {
    fn notify(&self, connection_id: &str, event: ServerEvent) {
        let senders = self
            .senders
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match senders.get(connection_id) {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::debug!("Client {} is no longer reading events", connection_id);
                }
            }
            None => tracing::debug!(
                "Dropping {} event for disconnected client {}",
                event.name(),
                connection_id
            ),
        }
    }
}
