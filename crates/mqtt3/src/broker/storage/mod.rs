//! Persistence hooks for broker state
//!
//! The broker keeps sessions and retained messages in memory. A
//! [`StorageBackend`] lets that state survive restarts: sessions are loaded on
//! CONNECT when they are not already in memory and saved when a persistent
//! session loses its connection; retained messages are loaded at startup and
//! written through on every change.

pub mod memory_backend;

pub use memory_backend::MemoryBackend;

use crate::broker::session::{now_secs, Session};
use crate::error::Result;
use crate::packet::PublishPacket;
use crate::QoS;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;

pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Retained message stored by topic name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    /// Unix seconds
    pub stored_at_secs: u64,
}

impl RetainedMessage {
    #[must_use]
    pub fn new(publish: &PublishPacket) -> Self {
        Self {
            topic: publish.topic_name.clone(),
            payload: publish.payload.to_vec(),
            qos: publish.qos,
            stored_at_secs: now_secs(),
        }
    }

    /// PUBLISH for a new subscriber, retain flag set.
    #[must_use]
    pub fn to_publish(&self) -> PublishPacket {
        PublishPacket::new(self.topic.clone(), Bytes::from(self.payload.clone()), self.qos)
            .with_retain(true)
    }
}

pub trait StorageBackend: Send + Sync + Debug {
    fn load_session<'a>(&'a self, client_id: &'a str) -> StorageFuture<'a, Option<Session>>;

    fn save_session<'a>(&'a self, session: &'a Session) -> StorageFuture<'a, ()>;

    fn remove_session<'a>(&'a self, client_id: &'a str) -> StorageFuture<'a, ()>;

    fn load_retained(&self) -> StorageFuture<'_, Vec<RetainedMessage>>;

    fn save_retained<'a>(&'a self, message: &'a RetainedMessage) -> StorageFuture<'a, ()>;

    fn remove_retained<'a>(&'a self, topic: &'a str) -> StorageFuture<'a, ()>;
}
