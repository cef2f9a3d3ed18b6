//! Message routing for the broker
//!
//! Indexes subscriptions by topic filter, resolves a published topic to the
//! sessions that should receive it and owns the retained message store.
//! Exact filters and wildcard filters live in separate maps so a publish to a
//! plain topic is a single hash lookup plus a scan of the wildcard filters.

use crate::broker::session::{SessionRegistry, StoredMessage};
use crate::broker::stats::BrokerStats;
use crate::broker::storage::{RetainedMessage, StorageBackend};
use crate::packet::PublishPacket;
use crate::topic_matching::topic_matches_filter;
use crate::validation::validate_topic_filter;
use crate::QoS;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace, warn};

/// Client subscription information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub client_id: String,
    /// Generation of the session that made the subscription
    pub generation: u64,
    /// Granted QoS
    pub qos: QoS,
}

/// Live connection registered for a client identifier
#[derive(Debug)]
pub struct ClientInfo {
    pub connection_id: u64,
    /// Bounded outbound queue of the connection
    pub sender: flume::Sender<PublishPacket>,
    /// Signals the connection to close when another one takes over the id
    pub disconnect_tx: tokio::sync::oneshot::Sender<()>,
}

pub struct MessageRouter {
    exact_subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    wildcard_subscriptions: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    retained_messages: Arc<RwLock<HashMap<String, RetainedMessage>>>,
    clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
    sessions: Arc<SessionRegistry>,
    storage: Option<Arc<dyn StorageBackend>>,
    stats: Arc<BrokerStats>,
    max_queued_messages: usize,
    retain_available: bool,
}

impl MessageRouter {
    #[must_use]
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            exact_subscriptions: Arc::new(RwLock::new(HashMap::new())),
            wildcard_subscriptions: Arc::new(RwLock::new(HashMap::new())),
            retained_messages: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            sessions,
            storage: None,
            stats: Arc::new(BrokerStats::new()),
            max_queued_messages: 1000,
            retain_available: true,
        }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<BrokerStats>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn with_max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = max;
        self
    }

    #[must_use]
    pub fn with_retain_available(mut self, available: bool) -> Self {
        self.retain_available = available;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    fn has_wildcards(topic_filter: &str) -> bool {
        topic_filter.contains('+') || topic_filter.contains('#')
    }

    /// Loads retained messages from storage.
    pub async fn initialize(&self) -> Result<()> {
        if let Some(ref storage) = self.storage {
            let stored_messages = storage.load_retained().await?;
            let mut retained = self.retained_messages.write().await;
            for message in stored_messages {
                retained.insert(message.topic.clone(), message);
            }
            self.stats.set_retained_count(retained.len());
            debug!(count = retained.len(), "Loaded retained messages from storage");
        }
        Ok(())
    }

    /// Registers a live connection. An existing connection with the same
    /// client id is told to close.
    pub async fn register_client(
        &self,
        client_id: String,
        connection_id: u64,
        sender: flume::Sender<PublishPacket>,
        disconnect_tx: tokio::sync::oneshot::Sender<()>,
    ) {
        let mut clients = self.clients.write().await;

        if let Some(old_client) = clients.remove(&client_id) {
            info!(client_id = %client_id, "Client ID takeover");
            let _ = old_client.disconnect_tx.send(());
        }

        clients.insert(
            client_id.clone(),
            ClientInfo {
                connection_id,
                sender,
                disconnect_tx,
            },
        );
        debug!(client_id = %client_id, connection_id, "Registered client");
    }

    /// Removes the live connection if it is still the registered one.
    /// Subscriptions are kept.
    pub async fn disconnect_client(&self, client_id: &str, connection_id: u64) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get(client_id) {
            Some(info) if info.connection_id == connection_id => {
                clients.remove(client_id);
                debug!(client_id = %client_id, "Disconnected client (keeping subscriptions)");
                true
            }
            _ => false,
        }
    }

    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.clients.read().await.contains_key(client_id)
    }

    /// Removes the subscriptions made by one session of the client. Entries
    /// of a newer session with the same client id are kept.
    pub async fn remove_session_subscriptions(&self, client_id: &str, generation: u64) {
        let owned = |sub: &Subscription| sub.client_id == client_id && sub.generation == generation;
        let mut removed = 0;
        for map in [&self.exact_subscriptions, &self.wildcard_subscriptions] {
            let mut subs_map = map.write().await;
            for subs in subs_map.values_mut() {
                let before = subs.len();
                subs.retain(|sub| !owned(sub));
                removed += before - subs.len();
            }
            subs_map.retain(|_, subs| !subs.is_empty());
        }
        debug!(client_id = %client_id, generation, removed, "Removed session subscriptions");
    }

    /// Adds or replaces a subscription. Returns true when it is new.
    ///
    /// A subscription from an older session than the one already recorded
    /// for the client is ignored.
    pub async fn subscribe(
        &self,
        client_id: &str,
        generation: u64,
        topic_filter: &str,
        qos: QoS,
    ) -> Result<bool> {
        validate_topic_filter(topic_filter)?;

        let subscription = Subscription {
            client_id: client_id.to_string(),
            generation,
            qos,
        };

        let map = if Self::has_wildcards(topic_filter) {
            &self.wildcard_subscriptions
        } else {
            &self.exact_subscriptions
        };
        let mut subs_map = map.write().await;
        let subs = subs_map.entry(topic_filter.to_string()).or_default();

        if let Some(existing) = subs.iter_mut().find(|s| s.client_id == client_id) {
            if existing.generation > generation {
                debug!(client_id = %client_id, filter = %topic_filter, generation, "Ignoring subscription of a replaced session");
                return Ok(false);
            }
            *existing = subscription;
            debug!(client_id = %client_id, filter = %topic_filter, ?qos, "Updated subscription");
            Ok(false)
        } else {
            subs.push(subscription);
            debug!(client_id = %client_id, filter = %topic_filter, ?qos, "Subscribed");
            Ok(true)
        }
    }

    pub async fn unsubscribe(&self, client_id: &str, generation: u64, topic_filter: &str) -> bool {
        let map = if Self::has_wildcards(topic_filter) {
            &self.wildcard_subscriptions
        } else {
            &self.exact_subscriptions
        };
        let mut subs_map = map.write().await;

        let Some(subs) = subs_map.get_mut(topic_filter) else {
            return false;
        };
        let initial_len = subs.len();
        subs.retain(|sub| sub.client_id != client_id || sub.generation != generation);
        let removed = initial_len != subs.len();
        if subs.is_empty() {
            subs_map.remove(topic_filter);
        }
        if removed {
            debug!(client_id = %client_id, filter = %topic_filter, "Unsubscribed");
        }
        removed
    }

    /// Client id to granted QoS for every session matching `topic`. Sessions
    /// with several matching filters appear once at their highest QoS.
    async fn matching_subscribers(&self, topic: &str) -> HashMap<String, QoS> {
        let mut targets: HashMap<String, QoS> = HashMap::new();
        let mut add = |sub: &Subscription| {
            targets
                .entry(sub.client_id.clone())
                .and_modify(|qos| *qos = (*qos).max(sub.qos))
                .or_insert(sub.qos);
        };

        {
            let exact = self.exact_subscriptions.read().await;
            if let Some(subs) = exact.get(topic) {
                subs.iter().for_each(&mut add);
            }
        }
        {
            let wildcard = self.wildcard_subscriptions.read().await;
            for (filter, subs) in wildcard.iter() {
                if topic_matches_filter(topic, filter) {
                    subs.iter().for_each(&mut add);
                }
            }
        }
        targets
    }

    /// Updates the retained store for a PUBLISH with the retain flag. An
    /// empty payload deletes the topic's retained message.
    async fn store_retained(&self, publish: &PublishPacket) {
        if !self.retain_available {
            return;
        }
        let topic = publish.topic_name.as_str();

        if publish.payload.is_empty() {
            let removed = {
                let mut retained = self.retained_messages.write().await;
                let removed = retained.remove(topic).is_some();
                self.stats.set_retained_count(retained.len());
                removed
            };
            if removed {
                debug!(topic = %topic, "Cleared retained message");
                if let Some(ref storage) = self.storage {
                    if let Err(e) = storage.remove_retained(topic).await {
                        error!(topic = %topic, "Failed to remove retained message: {e}");
                    }
                }
            }
            return;
        }

        let message = RetainedMessage::new(publish);
        {
            let mut retained = self.retained_messages.write().await;
            retained.insert(topic.to_string(), message.clone());
            self.stats.set_retained_count(retained.len());
        }
        debug!(topic = %topic, "Stored retained message");
        if let Some(ref storage) = self.storage {
            if let Err(e) = storage.save_retained(&message).await {
                error!(topic = %topic, "Failed to store retained message: {e}");
            }
        }
    }

    /// Routes a PUBLISH to every matching session and returns how many
    /// sessions it was handed to.
    pub async fn route_message(&self, publish: &PublishPacket) -> usize {
        if publish.retain {
            self.store_retained(publish).await;
        }

        let targets = self.matching_subscribers(&publish.topic_name).await;
        if targets.is_empty() {
            trace!(topic = %publish.topic_name, "No subscribers");
            return 0;
        }

        let clients = self.clients.read().await;
        let mut delivered = 0;
        for (client_id, granted) in &targets {
            let mut message = publish.clone();
            message.qos = publish.qos.min(*granted);
            message.retain = false;
            message.dup = false;
            message.packet_id = None;

            if self.deliver_to_subscriber(client_id, message, clients.get(client_id)) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Hands a message to a live connection's channel, or to the session
    /// queue when the channel is full, the queue already holds older
    /// messages, or the client is offline.
    fn deliver_to_subscriber(
        &self,
        client_id: &str,
        message: PublishPacket,
        client: Option<&ClientInfo>,
    ) -> bool {
        let session = self.sessions.get(client_id);
        let Some(session) = session else {
            return match client {
                Some(info) => match info.sender.try_send(message) {
                    Ok(()) => true,
                    Err(_) => {
                        self.stats.message_dropped();
                        false
                    }
                },
                None => false,
            };
        };

        let mut session = session.lock();
        let qos = message.qos;

        if let Some(info) = client {
            if !session.has_pending() {
                match info.sender.try_send(message) {
                    Ok(()) => return true,
                    Err(e) => {
                        let message = e.into_inner();
                        if qos == QoS::AtMostOnce {
                            warn!(
                                client_id = %client_id,
                                topic = %message.topic_name,
                                "Outbound queue full, dropping QoS 0 message"
                            );
                            self.stats.message_dropped();
                            return false;
                        }
                        if session.enqueue(StoredMessage::from_publish(&message), self.max_queued_messages) {
                            warn!(client_id = %client_id, "Session queue full, dropped oldest message");
                            self.stats.message_dropped();
                        }
                        return true;
                    }
                }
            }
        } else if qos == QoS::AtMostOnce || session.clean_start {
            trace!(client_id = %client_id, "Offline subscriber, message not queued");
            return false;
        }

        if session.enqueue(StoredMessage::from_publish(&message), self.max_queued_messages) {
            warn!(client_id = %client_id, "Session queue full, dropped oldest message");
            self.stats.message_dropped();
        }
        trace!(client_id = %client_id, topic = %message.topic_name, "Queued message");
        true
    }

    /// Retained messages matching a filter, as PUBLISH packets with the
    /// retain flag set.
    pub async fn retained_messages(&self, topic_filter: &str) -> Vec<PublishPacket> {
        let retained = self.retained_messages.read().await;
        let mut matching: Vec<&RetainedMessage> = retained
            .values()
            .filter(|msg| topic_matches_filter(&msg.topic, topic_filter))
            .collect();
        matching.sort_by(|a, b| a.topic.cmp(&b.topic));
        matching.into_iter().map(RetainedMessage::to_publish).collect()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Number of distinct topic filters with at least one subscriber
    pub async fn topic_count(&self) -> usize {
        let exact = self.exact_subscriptions.read().await;
        let wildcard = self.wildcard_subscriptions.read().await;
        exact.len() + wildcard.len()
    }

    pub async fn retained_count(&self) -> usize {
        self.retained_messages.read().await.len()
    }

    pub async fn subscription_count_for_client(&self, client_id: &str) -> usize {
        let exact = self.exact_subscriptions.read().await;
        let wildcard = self.wildcard_subscriptions.read().await;
        exact
            .values()
            .chain(wildcard.values())
            .flat_map(|subs| subs.iter())
            .filter(|sub| sub.client_id == client_id)
            .count()
    }

    pub async fn has_subscription(&self, client_id: &str, topic_filter: &str) -> bool {
        let map = if Self::has_wildcards(topic_filter) {
            &self.wildcard_subscriptions
        } else {
            &self.exact_subscriptions
        };
        map.read()
            .await
            .get(topic_filter)
            .is_some_and(|subs| subs.iter().any(|sub| sub.client_id == client_id))
    }

    pub async fn has_retained_message(&self, topic: &str) -> bool {
        self.retained_messages.read().await.contains_key(topic)
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(Arc::new(SessionRegistry::new()))
    }
}
