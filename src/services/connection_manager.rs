use crate::error::{AppError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Admission gate capping the number of live client connections.
#[derive(Clone)]
pub struct ConnectionManager {
    active: Arc<Mutex<HashSet<String>>>,
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Admits `connection_id` unless the cap is already reached.
    pub fn try_register(&self, connection_id: &str) -> Result<()> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.contains(connection_id) {
            return Ok(());
        }
        if active.len() >= self.max_connections {
            return Err(AppError::Unauthorized(self.rejection_message()));
        }
        active.insert(connection_id.to_string());
        tracing::info!(
            "Client connected: {} ({}/{})",
            connection_id,
            active.len(),
            self.max_connections
        );
        Ok(())
    }

    pub fn unregister(&self, connection_id: &str) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.remove(connection_id) {
            tracing::info!("Client disconnected: {}", connection_id);
        }
    }

    pub fn is_active(&self, connection_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(connection_id)
    }

    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Refuses operations from connections that were never admitted.
    pub fn ensure_active(&self, connection_id: &str) -> Result<()> {
        if self.is_active(connection_id) {
            Ok(())
        } else {
            Err(AppError::Unauthorized(connection_id.to_string()))
        }
    }

    pub fn rejection_message(&self) -> String {
        format!(
            "Connection rejected: Only {} client(s) allowed at a time",
            self.max_connections
        )
    }
}
