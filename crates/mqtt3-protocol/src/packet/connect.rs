use crate::encoding::{decode_binary, decode_string, encode_binary, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::{ProtocolVersion, QoS, WillMessage};
use bytes::{Buf, BufMut};

const FLAG_RESERVED: u8 = 0x01;
const FLAG_CLEAN_START: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_WILL_QOS_SHIFT: u8 = 3;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    /// Seconds; `0` disables the keep-alive check.
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<WillMessage>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl ConnectPacket {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            protocol_version: ProtocolVersion::V311,
            clean_start: true,
            keep_alive: 60,
            client_id: client_id.into(),
            will: None,
            username: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_clean_start(mut self, clean_start: bool) -> Self {
        self.clean_start = clean_start;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: u16) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: WillMessage) -> Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_start {
            flags |= FLAG_CLEAN_START;
        }
        if let Some(will) = &self.will {
            flags |= FLAG_WILL;
            flags |= (will.qos as u8) << FLAG_WILL_QOS_SHIFT;
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        flags
    }
}

impl MqttPacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, self.protocol_version.protocol_name())?;
        buf.put_u8(self.protocol_version.level());
        buf.put_u8(self.connect_flags());
        buf.put_u16(self.keep_alive);
        encode_string(buf, &self.client_id)?;
        if let Some(will) = &self.will {
            encode_string(buf, &will.topic)?;
            encode_binary(buf, &will.payload)?;
        }
        if let Some(username) = &self.username {
            encode_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            encode_binary(buf, password)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        let protocol_name = decode_string(buf)
            .map_err(|e| MqttError::MalformedPacket(format!("Invalid protocol name: {e}")))?;
        if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
            return Err(MqttError::MalformedPacket(format!(
                "Invalid protocol name: {protocol_name:?}"
            )));
        }

        if buf.remaining() < 4 {
            return Err(MqttError::MalformedPacket(
                "CONNECT variable header truncated".to_string(),
            ));
        }
        let level = buf.get_u8();
        let protocol_version = ProtocolVersion::from_name_and_level(&protocol_name, level)
            .ok_or(MqttError::UnsupportedProtocolVersion(level))?;

        let flags = buf.get_u8();
        if flags & FLAG_RESERVED != 0 {
            return Err(MqttError::MalformedPacket(
                "CONNECT reserved flag must be 0".to_string(),
            ));
        }
        let keep_alive = buf.get_u16();

        let has_will = flags & FLAG_WILL != 0;
        let will_qos = QoS::try_from_u8((flags >> FLAG_WILL_QOS_SHIFT) & 0x03)?;
        let will_retain = flags & FLAG_WILL_RETAIN != 0;
        if !has_will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(MqttError::MalformedPacket(
                "Will QoS and retain must be 0 without a will".to_string(),
            ));
        }
        let has_username = flags & FLAG_USERNAME != 0;
        let has_password = flags & FLAG_PASSWORD != 0;
        if protocol_version == ProtocolVersion::V311 && has_password && !has_username {
            return Err(MqttError::MalformedPacket(
                "Password flag set without user name flag".to_string(),
            ));
        }

        let client_id = decode_string(buf)?;

        let will = if has_will {
            let topic = decode_string(buf)?;
            crate::validation::validate_topic_name(&topic)
                .map_err(|e| MqttError::MalformedPacket(format!("Invalid will topic: {e}")))?;
            let payload = decode_binary(buf)?;
            Some(WillMessage {
                topic,
                payload,
                qos: will_qos,
                retain: will_retain,
            })
        } else {
            None
        };

        let username = if has_username {
            Some(decode_string(buf)?)
        } else {
            None
        };
        let password = if has_password {
            Some(decode_binary(buf)?)
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            clean_start: flags & FLAG_CLEAN_START != 0,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }
}
