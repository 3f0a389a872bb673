//! # MQTT Packet Structures and Serialization
//!
//! This module defines the owned MQTT 3.1.1 packet model and the encoder that
//! turns a packet into wire bytes. Decoding lives in [`crate::parser`], which
//! builds the same structures incrementally from partial buffers.
//!
//! Every string and byte field is stored in fixed-capacity `heapless`
//! containers, so a packet can be moved between layers without borrowing the
//! buffer it was read from.

use heapless::{String, Vec};

use crate::data::DataDesc;
use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::util;

/// Maximum length of a topic name or filter.
pub const MAX_TOPIC_LEN: usize = 128;
/// Maximum application payload carried by a `PUBLISH`.
pub const MAX_PAYLOAD_LEN: usize = 1024;
/// Maximum client identifier length.
pub const MAX_CLIENT_ID_LEN: usize = 64;
/// Maximum length of a username or password.
pub const MAX_CREDENTIAL_LEN: usize = 64;
/// Maximum will message payload.
pub const MAX_WILL_PAYLOAD_LEN: usize = 128;
/// Maximum number of topic filters in one `SUBSCRIBE` or `UNSUBSCRIBE`.
pub const MAX_SUBSCRIBE_TOPICS: usize = 8;

pub type Topic = String<MAX_TOPIC_LEN>;
pub type PublishPayload = Vec<u8, MAX_PAYLOAD_LEN>;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::InvalidQoS),
        }
    }
}

/// MQTT control packet types as carried in the high nibble of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Parses the fixed header byte, validating the flag nibble.
    pub fn from_header(header: u8) -> Result<Self, ProtocolError> {
        let kind = match header >> 4 {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            other => return Err(ProtocolError::InvalidPacketType(other)),
        };
        let flags = header & 0x0F;
        match kind {
            PacketType::Publish => {
                if (flags >> 1) & 0x03 == 3 {
                    return Err(ProtocolError::InvalidQoS);
                }
            }
            _ if flags != kind.fixed_flags() => return Err(ProtocolError::InvalidFlags(flags)),
            _ => {}
        }
        Ok(kind)
    }

    /// Flags required by MQTT 3.1.1 for every type except `PUBLISH`.
    pub const fn fixed_flags(self) -> u8 {
        match self {
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => 0x02,
            _ => 0x00,
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Serializes the packet into `buf`, returning the number of bytes written.
    ///
    /// The encoder reserves four bytes for the remaining length while writing
    /// the body, so `buf` must have at least five bytes of headroom beyond the
    /// encoded size of very small packets.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError>;
}

/// Writes the fixed header, runs `body`, then compacts the frame so the
/// remaining length uses its minimal encoding.
fn encode_frame(
    buf: &mut [u8],
    header: u8,
    body: impl FnOnce(&mut usize, &mut [u8]) -> Result<(), MqttError>,
) -> Result<usize, MqttError> {
    let mut cursor = 0;
    util::write_u8(&mut cursor, buf, header)?;

    // Reserve space for remaining length (max 4 bytes)
    let remaining_len_pos = cursor;
    cursor += 4;
    let content_start = cursor;
    if buf.len() < content_start {
        return Err(MqttError::BufferTooSmall);
    }

    body(&mut cursor, buf)?;

    // Write remaining length and compact
    let remaining_len = cursor - content_start;
    let len_bytes =
        util::write_variable_byte_integer_len(&mut buf[remaining_len_pos..], remaining_len)?;
    let header_len = 1 + len_bytes;
    buf.copy_within(content_start..cursor, header_len);

    Ok(header_len + remaining_len)
}

fn non_zero(packet_id: u16) -> Result<u16, MqttError> {
    if packet_id == 0 {
        return Err(MqttError::Protocol(ProtocolError::ZeroPacketId));
    }
    Ok(packet_id)
}

// --- CONNECT Packet ---

/// Last-will message registered with `CONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: Topic,
    pub message: Vec<u8, MAX_WILL_PAYLOAD_LEN>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String<MAX_CLIENT_ID_LEN>,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<Will>,
    pub username: Option<String<MAX_CREDENTIAL_LEN>>,
    pub password: Option<Vec<u8, MAX_CREDENTIAL_LEN>>,
}

impl Connect {
    pub fn new(client_id: &str, keep_alive: u16, clean_session: bool) -> Result<Self, MqttError> {
        Ok(Self {
            client_id: util::copy_str(client_id)?,
            keep_alive,
            clean_session,
            will: None,
            username: None,
            password: None,
        })
    }

    pub(crate) fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }
}

impl EncodePacket for Connect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError> {
        if self.password.is_some() && self.username.is_none() {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        encode_frame(buf, 0x10, |cursor, buf| {
            util::write_utf8_string(cursor, buf, "MQTT")?;
            // Protocol level 4 is MQTT 3.1.1
            util::write_u8(cursor, buf, 4)?;
            util::write_u8(cursor, buf, self.flags())?;
            util::write_u16(cursor, buf, self.keep_alive)?;
            util::write_utf8_string(cursor, buf, &self.client_id)?;
            if let Some(will) = &self.will {
                util::write_utf8_string(cursor, buf, &will.topic)?;
                util::write_binary(cursor, buf, &will.message)?;
            }
            if let Some(username) = &self.username {
                util::write_utf8_string(cursor, buf, username)?;
            }
            if let Some(password) = &self.password {
                util::write_binary(cursor, buf, password)?;
            }
            Ok(())
        })
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnectReasonCode,
}

impl EncodePacket for ConnAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError> {
        encode_frame(buf, 0x20, |cursor, buf| {
            util::write_u8(cursor, buf, self.session_present as u8)?;
            util::write_u8(cursor, buf, self.code.into())
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: Topic,
    pub payload: PublishPayload,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub packet_id: Option<u16>,
}

impl Publish {
    /// Builds a `PUBLISH` without a packet identifier; the logic layer assigns
    /// one when the message is queued with QoS above zero.
    pub fn new(topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<Self, MqttError> {
        Ok(Self {
            topic: util::copy_str(topic)?,
            payload: util::copy_bytes(payload)?,
            qos,
            retain,
            dup: false,
            packet_id: None,
        })
    }

    fn header(&self) -> u8 {
        let mut header = 0x30 | ((self.qos as u8) << 1);
        if self.dup {
            header |= 0x08;
        }
        if self.retain {
            header |= 0x01;
        }
        header
    }
}

impl EncodePacket for Publish {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError> {
        encode_frame(buf, self.header(), |cursor, buf| {
            util::write_utf8_string(cursor, buf, &self.topic)?;

            // Packet ID (only for QoS > 0)
            if self.qos != QoS::AtMostOnce {
                let id = self
                    .packet_id
                    .ok_or(MqttError::Protocol(ProtocolError::ZeroPacketId))?;
                util::write_u16(cursor, buf, non_zero(id)?)?;
            }

            util::write_bytes(cursor, buf, &self.payload)
        })
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub topics: Vec<(Topic, QoS), MAX_SUBSCRIBE_TOPICS>,
}

impl Subscribe {
    /// Creates a `SUBSCRIBE` from borrowed filters; the packet id is assigned later.
    pub fn new(filters: &[(&str, QoS)]) -> Result<Self, MqttError> {
        if filters.is_empty() {
            return Err(MqttError::InvalidArgument);
        }
        let mut topics = Vec::new();
        for (topic, qos) in filters {
            topics
                .push((util::copy_str(topic)?, *qos))
                .map_err(|_| MqttError::Protocol(ProtocolError::FieldTooLong))?;
        }
        Ok(Self {
            packet_id: 0,
            topics,
        })
    }
}

impl EncodePacket for Subscribe {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError> {
        encode_frame(buf, 0x82, |cursor, buf| {
            util::write_u16(cursor, buf, non_zero(self.packet_id)?)?;
            for (topic, qos) in &self.topics {
                util::write_utf8_string(cursor, buf, topic)?;
                util::write_u8(cursor, buf, *qos as u8)?;
            }
            Ok(())
        })
    }
}

// --- SUBACK Packet ---

/// Per-filter result of a `SUBSCRIBE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubAckReturnCode {
    Granted(QoS),
    Failure,
}

impl TryFrom<u8> for SubAckReturnCode {
    type Error = ProtocolError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0x80 => Ok(SubAckReturnCode::Failure),
            0..=2 => Ok(SubAckReturnCode::Granted(QoS::try_from(val)?)),
            other => Err(ProtocolError::InvalidSubAckCode(other)),
        }
    }
}

impl From<SubAckReturnCode> for u8 {
    fn from(code: SubAckReturnCode) -> Self {
        match code {
            SubAckReturnCode::Granted(qos) => qos as u8,
            SubAckReturnCode::Failure => 0x80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<SubAckReturnCode, MAX_SUBSCRIBE_TOPICS>,
}

impl EncodePacket for SubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError> {
        encode_frame(buf, 0x90, |cursor, buf| {
            util::write_u16(cursor, buf, non_zero(self.packet_id)?)?;
            for code in &self.return_codes {
                util::write_u8(cursor, buf, (*code).into())?;
            }
            Ok(())
        })
    }
}

// --- UNSUBSCRIBE Packet ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<Topic, MAX_SUBSCRIBE_TOPICS>,
}

impl Unsubscribe {
    pub fn new(filters: &[&str]) -> Result<Self, MqttError> {
        if filters.is_empty() {
            return Err(MqttError::InvalidArgument);
        }
        let mut topics = Vec::new();
        for topic in filters {
            topics
                .push(util::copy_str(topic)?)
                .map_err(|_| MqttError::Protocol(ProtocolError::FieldTooLong))?;
        }
        Ok(Self {
            packet_id: 0,
            topics,
        })
    }
}

impl EncodePacket for Unsubscribe {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError> {
        encode_frame(buf, 0xA2, |cursor, buf| {
            util::write_u16(cursor, buf, non_zero(self.packet_id)?)?;
            for topic in &self.topics {
                util::write_utf8_string(cursor, buf, topic)?;
            }
            Ok(())
        })
    }
}

/// An enumeration of all MQTT 3.1.1 control packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttPacket {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(u16),
    PubRec(u16),
    PubRel(u16),
    PubComp(u16),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(u16),
    PingReq,
    PingResp,
    Disconnect,
}

impl MqttPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            MqttPacket::Connect(_) => PacketType::Connect,
            MqttPacket::ConnAck(_) => PacketType::ConnAck,
            MqttPacket::Publish(_) => PacketType::Publish,
            MqttPacket::PubAck(_) => PacketType::PubAck,
            MqttPacket::PubRec(_) => PacketType::PubRec,
            MqttPacket::PubRel(_) => PacketType::PubRel,
            MqttPacket::PubComp(_) => PacketType::PubComp,
            MqttPacket::Subscribe(_) => PacketType::Subscribe,
            MqttPacket::SubAck(_) => PacketType::SubAck,
            MqttPacket::Unsubscribe(_) => PacketType::Unsubscribe,
            MqttPacket::UnsubAck(_) => PacketType::UnsubAck,
            MqttPacket::PingReq => PacketType::PingReq,
            MqttPacket::PingResp => PacketType::PingResp,
            MqttPacket::Disconnect => PacketType::Disconnect,
        }
    }

    /// Packet identifier, when the packet type carries one.
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            MqttPacket::Publish(p) => p.packet_id,
            MqttPacket::PubAck(id)
            | MqttPacket::PubRec(id)
            | MqttPacket::PubRel(id)
            | MqttPacket::PubComp(id)
            | MqttPacket::UnsubAck(id) => Some(*id),
            MqttPacket::Subscribe(s) => Some(s.packet_id),
            MqttPacket::SubAck(s) => Some(s.packet_id),
            MqttPacket::Unsubscribe(u) => Some(u.packet_id),
            _ => None,
        }
    }

    /// Encodes the packet into a fresh data descriptor.
    pub fn to_desc(&self) -> Result<DataDesc, MqttError> {
        let mut desc = DataDesc::new();
        desc.fill_with(|buf| self.encode(buf))?;
        Ok(desc)
    }
}

impl EncodePacket for MqttPacket {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, MqttError> {
        match self {
            MqttPacket::Connect(p) => p.encode(buf),
            MqttPacket::ConnAck(p) => p.encode(buf),
            MqttPacket::Publish(p) => p.encode(buf),
            MqttPacket::Subscribe(p) => p.encode(buf),
            MqttPacket::SubAck(p) => p.encode(buf),
            MqttPacket::Unsubscribe(p) => p.encode(buf),
            MqttPacket::PubAck(id)
            | MqttPacket::PubRec(id)
            | MqttPacket::PubRel(id)
            | MqttPacket::PubComp(id)
            | MqttPacket::UnsubAck(id) => {
                let header = ((self.packet_type() as u8) << 4) | self.packet_type().fixed_flags();
                encode_frame(buf, header, |cursor, buf| {
                    util::write_u16(cursor, buf, non_zero(*id)?)
                })
            }
            MqttPacket::PingReq | MqttPacket::PingResp | MqttPacket::Disconnect => {
                encode_frame(buf, (self.packet_type() as u8) << 4, |_, _| Ok(()))
            }
        }
    }
}
