//! Session registry
//!
//! Durable per-client state keyed by client identifier: subscriptions, QoS
//! handshakes in both directions and the queue of messages waiting for
//! delivery. A connection attaches to its session on CONNECT and detaches on
//! close; the session outlives the connection unless it was opened with clean
//! start.

use crate::handshake::HandshakeState;
use crate::packet::{Packet, PubRelPacket, PublishPacket};
use crate::QoS;
use crate::{MqttError, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub type SessionHandle = Arc<Mutex<Session>>;

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// A message held by a session, either queued or in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl StoredMessage {
    #[must_use]
    pub fn from_publish(publish: &PublishPacket) -> Self {
        Self {
            topic: publish.topic_name.clone(),
            payload: publish.payload.to_vec(),
            qos: publish.qos,
            retain: publish.retain,
        }
    }

    /// Rebuilds the PUBLISH without a packet identifier.
    #[must_use]
    pub fn to_publish(&self) -> PublishPacket {
        PublishPacket::new(self.topic.clone(), Bytes::from(self.payload.clone()), self.qos)
            .with_retain(self.retain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflightMessage {
    pub message: StoredMessage,
    pub state: HandshakeState,
    /// Send order, used to retransmit in the original order.
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub client_id: String,
    pub clean_start: bool,
    /// Topic filter to granted QoS.
    pub subscriptions: HashMap<String, QoS>,
    /// Inbound QoS 2 identifiers that are awaiting PUBREL.
    pub inbound_qos2: BTreeSet<u16>,
    /// Outbound deliveries awaiting acknowledgment, by packet identifier.
    pub outbound: BTreeMap<u16, InflightMessage>,
    /// Messages waiting for the client, oldest first.
    pub pending: VecDeque<StoredMessage>,
    pub last_seen_secs: u64,
    next_packet_id: u16,
    next_seq: u64,
    #[serde(skip)]
    owner: Option<u64>,
    /// Assigned by the registry; a client id that gets a new session gets a
    /// higher generation.
    #[serde(skip)]
    generation: u64,
}

impl Session {
    #[must_use]
    pub fn new(client_id: impl Into<String>, clean_start: bool) -> Self {
        Self {
            client_id: client_id.into(),
            clean_start,
            subscriptions: HashMap::new(),
            inbound_qos2: BTreeSet::new(),
            outbound: BTreeMap::new(),
            pending: VecDeque::new(),
            last_seen_secs: now_secs(),
            next_packet_id: 1,
            next_seq: 0,
            owner: None,
            generation: 0,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.owner.is_some()
    }

    #[must_use]
    pub fn owner(&self) -> Option<u64> {
        self.owner
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn touch(&mut self) {
        self.last_seen_secs = now_secs();
    }

    /// Returns true when the filter was not subscribed before.
    pub fn add_subscription(&mut self, filter: impl Into<String>, qos: QoS) -> bool {
        self.subscriptions.insert(filter.into(), qos).is_none()
    }

    pub fn remove_subscription(&mut self, filter: &str) -> bool {
        self.subscriptions.remove(filter).is_some()
    }

    /// Next free outbound packet identifier. Identifiers still in flight are
    /// skipped.
    pub fn allocate_packet_id(&mut self) -> Result<u16> {
        for _ in 0..u16::MAX {
            let id = self.next_packet_id;
            self.next_packet_id = if id == u16::MAX { 1 } else { id + 1 };
            if !self.outbound.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(MqttError::PacketIdExhausted)
    }

    pub fn track_outbound(&mut self, packet_id: u16, message: StoredMessage, state: HandshakeState) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outbound.insert(
            packet_id,
            InflightMessage {
                message,
                state,
                seq,
            },
        );
    }

    #[must_use]
    pub fn outbound_state(&self, packet_id: u16) -> Option<HandshakeState> {
        self.outbound.get(&packet_id).map(|m| m.state)
    }

    pub fn set_outbound_state(&mut self, packet_id: u16, state: HandshakeState) {
        if let Some(inflight) = self.outbound.get_mut(&packet_id) {
            inflight.state = state;
        }
    }

    pub fn complete_outbound(&mut self, packet_id: u16) -> Option<InflightMessage> {
        self.outbound.remove(&packet_id)
    }

    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    #[must_use]
    pub fn is_awaiting_pubrel(&self, packet_id: u16) -> bool {
        self.inbound_qos2.contains(&packet_id)
    }

    pub fn track_inbound(&mut self, packet_id: u16, limit: usize) -> Result<()> {
        if self.inbound_qos2.len() >= limit && !self.inbound_qos2.contains(&packet_id) {
            return Err(MqttError::InflightLimitExceeded(limit));
        }
        self.inbound_qos2.insert(packet_id);
        Ok(())
    }

    pub fn release_inbound(&mut self, packet_id: u16) -> bool {
        self.inbound_qos2.remove(&packet_id)
    }

    /// Appends to the delivery queue, dropping the oldest entry when full.
    /// Returns true if something was dropped.
    pub fn enqueue(&mut self, message: StoredMessage, limit: usize) -> bool {
        let mut dropped = false;
        while limit > 0 && self.pending.len() >= limit {
            self.pending.pop_front();
            dropped = true;
        }
        if limit == 0 {
            return true;
        }
        self.pending.push_back(message);
        dropped
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Puts messages back at the head of the queue, keeping their order.
    /// Used for messages a closing connection had accepted but not sent.
    pub fn requeue_front(&mut self, messages: Vec<StoredMessage>, limit: usize) {
        for message in messages.into_iter().rev() {
            self.pending.push_front(message);
        }
        while limit > 0 && self.pending.len() > limit {
            self.pending.pop_back();
        }
    }

    pub fn take_pending(&mut self, max: usize) -> Vec<StoredMessage> {
        let count = max.min(self.pending.len());
        self.pending.drain(..count).collect()
    }

    /// Packets to resend after the client reconnects: PUBLISH with DUP for
    /// unacknowledged deliveries and PUBREL for released QoS 2 ones, in the
    /// order they were first sent.
    #[must_use]
    pub fn retransmissions(&self) -> Vec<Packet> {
        let mut inflight: Vec<(&u16, &InflightMessage)> = self.outbound.iter().collect();
        inflight.sort_by_key(|(_, m)| m.seq);
        inflight
            .into_iter()
            .map(|(&packet_id, inflight)| match inflight.state {
                HandshakeState::AwaitingPubComp => Packet::PubRel(PubRelPacket::new(packet_id)),
                _ => Packet::Publish(
                    inflight
                        .message
                        .to_publish()
                        .with_packet_id(packet_id)
                        .with_dup(true),
                ),
            })
            .collect()
    }

    #[must_use]
    pub fn is_expired_at(&self, expiry: Duration, now_secs: u64) -> bool {
        !expiry.is_zero()
            && self.owner.is_none()
            && now_secs.saturating_sub(self.last_seen_secs) >= expiry.as_secs()
    }
}

/// Outcome of detaching a connection from its session.
#[derive(Debug)]
pub enum SessionRelease {
    /// Another connection owns the session now.
    NotOwner,
    /// Clean-start session, removed from the registry.
    Discarded,
    /// Persistent session kept; the snapshot is for the persistence hook.
    Retained(Box<Session>),
}

/// Result of [`SessionRegistry::open`].
#[derive(Debug)]
pub struct OpenedSession {
    pub handle: SessionHandle,
    pub session_present: bool,
    pub generation: u64,
    /// Generation of the session this one replaced, if any. Its router
    /// subscriptions are stale.
    pub replaced: Option<u64>,
}

/// A detached session removed by expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredSession {
    pub client_id: String,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(client_id).cloned()
    }

    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.read().contains_key(client_id)
    }

    /// Generation of the session currently registered for `client_id`.
    #[must_use]
    pub fn generation(&self, client_id: &str) -> Option<u64> {
        self.sessions
            .read()
            .get(client_id)
            .map(|handle| handle.lock().generation)
    }

    fn install(
        &self,
        sessions: &mut HashMap<String, SessionHandle>,
        mut session: Session,
        connection_id: u64,
    ) -> (SessionHandle, u64, Option<u64>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        session.generation = generation;
        session.owner = Some(connection_id);
        session.touch();

        let client_id = session.client_id.clone();
        let handle = Arc::new(Mutex::new(session));
        let replaced = sessions
            .insert(client_id, Arc::clone(&handle))
            .map(|old| old.lock().generation);
        (handle, generation, replaced)
    }

    /// Attaches `connection_id` to the session for `client_id`.
    ///
    /// Clean start always creates a fresh session. Otherwise the in-memory
    /// session is reused, then `stored` (from the persistence hook), then a
    /// new one. `session_present` is true when earlier state was resumed.
    pub fn open(
        &self,
        client_id: &str,
        clean_start: bool,
        connection_id: u64,
        stored: Option<Session>,
    ) -> OpenedSession {
        let mut sessions = self.sessions.write();

        if !clean_start {
            if let Some(existing) = sessions.get(client_id) {
                let mut session = existing.lock();
                if !session.clean_start {
                    session.owner = Some(connection_id);
                    session.touch();
                    debug!(client_id = %client_id, "Resuming in-memory session");
                    return OpenedSession {
                        handle: Arc::clone(existing),
                        session_present: true,
                        generation: session.generation,
                        replaced: None,
                    };
                }
                debug!(client_id = %client_id, "Replacing live clean session");
            }
        }

        let (session, session_present) = match stored {
            Some(mut stored) if !clean_start => {
                debug!(client_id = %client_id, "Resuming stored session");
                stored.client_id = client_id.to_string();
                (stored, true)
            }
            _ => (Session::new(client_id, clean_start), false),
        };
        let (handle, generation, replaced) = self.install(&mut sessions, session, connection_id);
        OpenedSession {
            handle,
            session_present,
            generation,
            replaced,
        }
    }

    pub fn release(&self, client_id: &str, connection_id: u64) -> SessionRelease {
        let mut sessions = self.sessions.write();
        let Some(handle) = sessions.get(client_id).cloned() else {
            return SessionRelease::NotOwner;
        };
        let mut session = handle.lock();
        if session.owner != Some(connection_id) {
            return SessionRelease::NotOwner;
        }
        session.owner = None;
        session.touch();

        if session.clean_start {
            drop(session);
            sessions.remove(client_id);
            debug!(client_id = %client_id, "Discarded clean session");
            SessionRelease::Discarded
        } else {
            SessionRelease::Retained(Box::new(session.clone()))
        }
    }

    pub fn remove(&self, client_id: &str) -> Option<SessionHandle> {
        self.sessions.write().remove(client_id)
    }

    /// Removes detached sessions idle for at least `expiry`.
    pub fn purge_expired(&self, expiry: Duration) -> Vec<ExpiredSession> {
        self.purge_expired_at(expiry, now_secs())
    }

    pub fn purge_expired_at(&self, expiry: Duration, now_secs: u64) -> Vec<ExpiredSession> {
        let mut sessions = self.sessions.write();
        let expired: Vec<ExpiredSession> = sessions
            .iter()
            .filter_map(|(id, handle)| {
                let session = handle.lock();
                session.is_expired_at(expiry, now_secs).then(|| ExpiredSession {
                    client_id: id.clone(),
                    generation: session.generation,
                })
            })
            .collect();
        for session in &expired {
            sessions.remove(&session.client_id);
            warn!(client_id = %session.client_id, "Session expired");
        }
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
