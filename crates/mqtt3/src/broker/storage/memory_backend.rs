//! In-memory storage backend
//!
//! Keeps stored state for the lifetime of the process. Useful for tests and
//! for sharing state between broker instances in the same process.

use super::{RetainedMessage, StorageBackend, StorageFuture};
use crate::broker::session::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    retained: Arc<Mutex<HashMap<String, RetainedMessage>>>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn session(&self, client_id: &str) -> Option<Session> {
        self.sessions.lock().get(client_id).cloned()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<RetainedMessage> {
        self.retained.lock().get(topic).cloned()
    }

    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained.lock().len()
    }
}

impl StorageBackend for MemoryBackend {
    fn load_session<'a>(&'a self, client_id: &'a str) -> StorageFuture<'a, Option<Session>> {
        Box::pin(async move { Ok(self.sessions.lock().get(client_id).cloned()) })
    }

    fn save_session<'a>(&'a self, session: &'a Session) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.sessions
                .lock()
                .insert(session.client_id.clone(), session.clone());
            debug!(client_id = %session.client_id, "Stored session");
            Ok(())
        })
    }

    fn remove_session<'a>(&'a self, client_id: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.sessions.lock().remove(client_id);
            Ok(())
        })
    }

    fn load_retained(&self) -> StorageFuture<'_, Vec<RetainedMessage>> {
        Box::pin(async move { Ok(self.retained.lock().values().cloned().collect()) })
    }

    fn save_retained<'a>(&'a self, message: &'a RetainedMessage) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.retained
                .lock()
                .insert(message.topic.clone(), message.clone());
            debug!(topic = %message.topic, "Stored retained message");
            Ok(())
        })
    }

    fn remove_retained<'a>(&'a self, topic: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.retained.lock().remove(topic);
            Ok(())
        })
    }
}
