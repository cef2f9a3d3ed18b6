//! Broker counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct BrokerStats {
    clients_connected: AtomicUsize,
    clients_total: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    retained_messages: AtomicUsize,
}

/// Point-in-time copy of [`BrokerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub clients_connected: usize,
    pub clients_total: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub retained_messages: usize,
}

impl BrokerStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_connected(&self) {
        self.clients_connected.fetch_add(1, Ordering::Relaxed);
        self.clients_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        let _ = self
            .clients_connected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn publish_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_retained_count(&self, count: usize) {
        self.retained_messages.store(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn clients_connected(&self) -> usize {
        self.clients_connected.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            clients_connected: self.clients_connected.load(Ordering::Relaxed),
            clients_total: self.clients_total.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            retained_messages: self.retained_messages.load(Ordering::Relaxed),
        }
    }
}
