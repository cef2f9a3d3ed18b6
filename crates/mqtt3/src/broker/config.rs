//! Broker configuration
//!
//! Limits and listener settings for the broker. The struct deserializes from
//! JSON with every field optional; durations use humantime strings such as
//! `"90s"` or `"1h"`.

use crate::encoding::MAX_VARIABLE_INT;
use crate::error::{MqttError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

fn default_client_channel_capacity() -> usize {
    1024
}

/// Broker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// TCP listener addresses
    pub bind_addresses: Vec<SocketAddr>,

    /// Maximum number of concurrent clients
    pub max_clients: usize,

    /// Largest accepted remaining length of an inbound packet
    pub max_packet_size: usize,

    /// How long a new connection may take to send CONNECT
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How long a persistent session survives without a connection.
    /// Zero keeps sessions until the client cleans them.
    #[serde(with = "humantime_serde")]
    pub session_expiry_interval: Duration,

    /// Bounded outbound queue per connection
    #[serde(default = "default_client_channel_capacity")]
    pub client_channel_capacity: usize,

    /// Messages held per session while the client is offline or slow
    pub max_queued_messages: usize,

    /// Unacknowledged outbound QoS 1/2 messages per session
    pub max_inflight_messages: usize,

    /// Inbound QoS 2 identifiers awaiting PUBREL per session
    pub max_inflight_qos2: usize,

    /// Whether retained messages are stored
    pub retain_available: bool,

    /// Assign an identifier to clients that connect with an empty one
    pub allow_anonymous_client_id: bool,

    /// Keep-alive grace as a percentage of the client's interval
    pub keepalive_timeout_percent: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addresses: vec![SocketAddr::from(([0, 0, 0, 0], 1883))],
            max_clients: 10_000,
            max_packet_size: MAX_VARIABLE_INT as usize,
            connect_timeout: Duration::from_secs(10),
            session_expiry_interval: Duration::from_secs(3600),
            client_channel_capacity: default_client_channel_capacity(),
            max_queued_messages: 1000,
            max_inflight_messages: 32,
            max_inflight_qos2: 1024,
            retain_available: true,
            allow_anonymous_client_id: true,
            keepalive_timeout_percent: 150,
        }
    }
}

impl BrokerConfig {
    /// Creates a new broker configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MqttError::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MqttError::Configuration(format!("Invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets a single bind address (replaces all existing addresses)
    #[must_use]
    pub fn with_bind_address(mut self, addr: impl Into<SocketAddr>) -> Self {
        self.bind_addresses = vec![addr.into()];
        self
    }

    #[must_use]
    pub fn with_bind_addresses(mut self, addrs: Vec<SocketAddr>) -> Self {
        self.bind_addresses = addrs;
        self
    }

    #[must_use]
    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_session_expiry(mut self, interval: Duration) -> Self {
        self.session_expiry_interval = interval;
        self
    }

    #[must_use]
    pub fn with_client_channel_capacity(mut self, capacity: usize) -> Self {
        self.client_channel_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = max;
        self
    }

    #[must_use]
    pub fn with_max_inflight_messages(mut self, max: usize) -> Self {
        self.max_inflight_messages = max;
        self
    }

    #[must_use]
    pub fn with_max_inflight_qos2(mut self, max: usize) -> Self {
        self.max_inflight_qos2 = max;
        self
    }

    #[must_use]
    pub fn with_retain_available(mut self, available: bool) -> Self {
        self.retain_available = available;
        self
    }

    #[must_use]
    pub fn with_allow_anonymous_client_id(mut self, allow: bool) -> Self {
        self.allow_anonymous_client_id = allow;
        self
    }

    #[must_use]
    pub fn with_keepalive_timeout_percent(mut self, percent: u16) -> Self {
        self.keepalive_timeout_percent = percent;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<&Self> {
        if self.max_clients == 0 {
            return Err(MqttError::Configuration(
                "max_clients must be greater than 0".to_string(),
            ));
        }
        if self.max_packet_size < 16 || self.max_packet_size > MAX_VARIABLE_INT as usize {
            return Err(MqttError::Configuration(format!(
                "max_packet_size must be between 16 and {MAX_VARIABLE_INT}"
            )));
        }
        if self.client_channel_capacity == 0 {
            return Err(MqttError::Configuration(
                "client_channel_capacity must be greater than 0".to_string(),
            ));
        }
        if self.max_inflight_messages == 0 || self.max_inflight_messages > usize::from(u16::MAX) {
            return Err(MqttError::Configuration(
                "max_inflight_messages must be between 1 and 65535".to_string(),
            ));
        }
        if self.max_inflight_qos2 == 0 {
            return Err(MqttError::Configuration(
                "max_inflight_qos2 must be greater than 0".to_string(),
            ));
        }
        if self.keepalive_timeout_percent < 100 {
            return Err(MqttError::Configuration(
                "keepalive_timeout_percent must be at least 100".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(MqttError::Configuration(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(self)
    }
}
