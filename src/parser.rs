//! # Incremental MQTT Parser
//!
//! [`MqttParser`] decodes MQTT 3.1.1 packets from descriptors of any size. It
//! keeps the position inside the current field (including half-read
//! remaining-length digits and packet identifiers) between calls, so a caller
//! never has to reassemble frames: it hands over whatever the socket produced
//! and calls again with the next read when told more data is needed.

use heapless::Vec;

use crate::coroutine::{Coroutine, ResumePoint};
use crate::data::DataDesc;
use crate::error::{ConnectReasonCode, ProtocolError};
use crate::packet::{
    ConnAck, Connect, MAX_CLIENT_ID_LEN, MAX_CREDENTIAL_LEN, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN,
    MAX_WILL_PAYLOAD_LEN, MqttPacket, PacketType, Publish, QoS, SubAck, SubAckReturnCode,
    Subscribe, Unsubscribe, Will,
};
use crate::util::{self, VarIntDecoder};
use crate::{yield_now, yield_until};

/// Result of feeding bytes to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// The descriptor was exhausted before the packet ended.
    NeedMore,
    /// A whole packet was decoded. Bytes after it stay unread in the descriptor.
    Complete(MqttPacket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsePoint {
    Header,
    RemainingLength,
    Body,
    ProtocolName,
    ProtocolLevel,
    ConnectFlags,
    KeepAlive,
    ClientId,
    WillTopic,
    WillMessage,
    Username,
    Password,
    AckFlags,
    ReturnCode,
    TopicName,
    PublishId,
    PublishPayload,
    PacketId,
    ListId,
    FilterTopic,
    FilterQos,
    SubAckCode,
    Finish,
}

impl ResumePoint for ParsePoint {
    const START: Self = ParsePoint::Header;
}

/// Incremental decoder for one inbound byte stream.
pub struct MqttParser {
    co: Coroutine<ParsePoint>,
    header: u8,
    kind: PacketType,
    length: VarIntDecoder,
    remaining: usize,
    consumed: usize,
    connect_flags: u8,
    word: u16,
    word_len: u8,
    field_len: Option<usize>,
    field: Vec<u8, MAX_PAYLOAD_LEN>,
    packet: Option<MqttPacket>,
}

impl Default for MqttParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttParser {
    pub const fn new() -> Self {
        Self {
            co: Coroutine::new(),
            header: 0,
            kind: PacketType::Disconnect,
            length: VarIntDecoder::new(),
            remaining: 0,
            consumed: 0,
            connect_flags: 0,
            word: 0,
            word_len: 0,
            field_len: None,
            field: Vec::new(),
            packet: None,
        }
    }

    /// True while a packet has been started but not finished.
    pub fn in_progress(&self) -> bool {
        self.co.is_running()
    }

    /// Drops any partially decoded packet.
    pub fn reset(&mut self) {
        self.co.reset();
        self.length = VarIntDecoder::new();
        self.remaining = 0;
        self.consumed = 0;
        self.connect_flags = 0;
        self.word = 0;
        self.word_len = 0;
        self.field_len = None;
        self.field.clear();
        self.packet = None;
    }

    /// Consumes bytes from `src` until a packet completes or `src` runs dry.
    ///
    /// Any error is fatal for the stream; the parser resets itself before
    /// returning it.
    pub fn parse(&mut self, src: &mut DataDesc) -> Result<Parsed, ProtocolError> {
        let res = self.run(src);
        if res.is_err() {
            self.reset();
        }
        res
    }

    fn run(&mut self, src: &mut DataDesc) -> Result<Parsed, ProtocolError> {
        use ParsePoint as P;
        loop {
            match self.co.point() {
                P::Header => {
                    yield_until!(self.co, P::Header, !src.is_consumed(), Ok(Parsed::NeedMore));
                    let header = src.read_u8().ok_or(ProtocolError::MalformedPacket)?;
                    self.kind = PacketType::from_header(header)?;
                    self.header = header;
                    self.co.jump(P::RemainingLength);
                }
                P::RemainingLength => {
                    let Some(byte) = src.read_u8() else {
                        yield_now!(self.co, P::RemainingLength, Ok(Parsed::NeedMore));
                    };
                    if let Some(len) = self.length.push(byte)? {
                        self.remaining = len;
                        self.consumed = 0;
                        self.co.jump(P::Body);
                    }
                }
                P::Body => self.begin_body()?,
                P::ProtocolName => {
                    if !self.prefixed(src, 4, ProtocolError::UnsupportedProtocol)? {
                        yield_now!(self.co, P::ProtocolName, Ok(Parsed::NeedMore));
                    }
                    if self.field.as_slice() != b"MQTT" {
                        return Err(ProtocolError::UnsupportedProtocol);
                    }
                    self.co.jump(P::ProtocolLevel);
                }
                P::ProtocolLevel => {
                    let Some(level) = self.byte(src)? else {
                        yield_now!(self.co, P::ProtocolLevel, Ok(Parsed::NeedMore));
                    };
                    if level != 4 {
                        return Err(ProtocolError::UnsupportedProtocol);
                    }
                    self.co.jump(P::ConnectFlags);
                }
                P::ConnectFlags => {
                    let Some(flags) = self.byte(src)? else {
                        yield_now!(self.co, P::ConnectFlags, Ok(Parsed::NeedMore));
                    };
                    validate_connect_flags(flags)?;
                    self.connect_flags = flags;
                    self.connect_mut()?.clean_session = flags & 0x02 != 0;
                    self.co.jump(P::KeepAlive);
                }
                P::KeepAlive => {
                    let Some(keep_alive) = self.word(src)? else {
                        yield_now!(self.co, P::KeepAlive, Ok(Parsed::NeedMore));
                    };
                    self.connect_mut()?.keep_alive = keep_alive;
                    self.co.jump(P::ClientId);
                }
                P::ClientId => {
                    if !self.prefixed(src, MAX_CLIENT_ID_LEN, ProtocolError::FieldTooLong)? {
                        yield_now!(self.co, P::ClientId, Ok(Parsed::NeedMore));
                    }
                    let client_id = util::utf8_from_bytes(&self.field)?;
                    self.connect_mut()?.client_id = client_id;
                    let next = self.after_connect_field(P::ClientId);
                    self.co.jump(next);
                }
                P::WillTopic => {
                    if !self.prefixed(src, MAX_TOPIC_LEN, ProtocolError::FieldTooLong)? {
                        yield_now!(self.co, P::WillTopic, Ok(Parsed::NeedMore));
                    }
                    let topic = util::utf8_from_bytes(&self.field)?;
                    let flags = self.connect_flags;
                    self.connect_mut()?.will = Some(Will {
                        topic,
                        message: Vec::new(),
                        qos: QoS::try_from((flags >> 3) & 0x03)?,
                        retain: flags & 0x20 != 0,
                    });
                    self.co.jump(P::WillMessage);
                }
                P::WillMessage => {
                    if !self.prefixed(src, MAX_WILL_PAYLOAD_LEN, ProtocolError::PayloadTooLarge)? {
                        yield_now!(self.co, P::WillMessage, Ok(Parsed::NeedMore));
                    }
                    let message = util::copy_bytes(&self.field)?;
                    if let Some(will) = self.connect_mut()?.will.as_mut() {
                        will.message = message;
                    }
                    let next = self.after_connect_field(P::WillMessage);
                    self.co.jump(next);
                }
                P::Username => {
                    if !self.prefixed(src, MAX_CREDENTIAL_LEN, ProtocolError::FieldTooLong)? {
                        yield_now!(self.co, P::Username, Ok(Parsed::NeedMore));
                    }
                    let username = util::utf8_from_bytes(&self.field)?;
                    self.connect_mut()?.username = Some(username);
                    let next = self.after_connect_field(P::Username);
                    self.co.jump(next);
                }
                P::Password => {
                    if !self.prefixed(src, MAX_CREDENTIAL_LEN, ProtocolError::FieldTooLong)? {
                        yield_now!(self.co, P::Password, Ok(Parsed::NeedMore));
                    }
                    let password = util::copy_bytes(&self.field)?;
                    self.connect_mut()?.password = Some(password);
                    self.co.jump(P::Finish);
                }
                P::AckFlags => {
                    let Some(flags) = self.byte(src)? else {
                        yield_now!(self.co, P::AckFlags, Ok(Parsed::NeedMore));
                    };
                    if flags & !0x01 != 0 {
                        return Err(ProtocolError::MalformedPacket);
                    }
                    self.connect_flags = flags;
                    self.co.jump(P::ReturnCode);
                }
                P::ReturnCode => {
                    let Some(code) = self.byte(src)? else {
                        yield_now!(self.co, P::ReturnCode, Ok(Parsed::NeedMore));
                    };
                    self.packet = Some(MqttPacket::ConnAck(ConnAck {
                        session_present: self.connect_flags & 0x01 != 0,
                        code: ConnectReasonCode::from(code),
                    }));
                    self.co.jump(P::Finish);
                }
                P::TopicName => {
                    if !self.prefixed(src, MAX_TOPIC_LEN, ProtocolError::FieldTooLong)? {
                        yield_now!(self.co, P::TopicName, Ok(Parsed::NeedMore));
                    }
                    let topic = util::utf8_from_bytes(&self.field)?;
                    let publish = self.publish_mut()?;
                    publish.topic = topic;
                    let next = if publish.qos == QoS::AtMostOnce {
                        P::PublishPayload
                    } else {
                        P::PublishId
                    };
                    self.co.jump(next);
                }
                P::PublishId => {
                    let Some(id) = self.word(src)? else {
                        yield_now!(self.co, P::PublishId, Ok(Parsed::NeedMore));
                    };
                    self.publish_mut()?.packet_id = Some(non_zero(id)?);
                    self.co.jump(P::PublishPayload);
                }
                P::PublishPayload => {
                    if self.field_len.is_none() {
                        let len = self.remaining - self.consumed;
                        if len > MAX_PAYLOAD_LEN {
                            return Err(ProtocolError::PayloadTooLarge);
                        }
                        self.field.clear();
                        self.field_len = Some(len);
                    }
                    if !self.fill(src)? {
                        yield_now!(self.co, P::PublishPayload, Ok(Parsed::NeedMore));
                    }
                    let payload = util::copy_bytes(&self.field)?;
                    self.publish_mut()?.payload = payload;
                    self.co.jump(P::Finish);
                }
                P::PacketId => {
                    let Some(id) = self.word(src)? else {
                        yield_now!(self.co, P::PacketId, Ok(Parsed::NeedMore));
                    };
                    let id = non_zero(id)?;
                    self.packet = Some(match self.kind {
                        PacketType::PubAck => MqttPacket::PubAck(id),
                        PacketType::PubRec => MqttPacket::PubRec(id),
                        PacketType::PubRel => MqttPacket::PubRel(id),
                        PacketType::PubComp => MqttPacket::PubComp(id),
                        _ => MqttPacket::UnsubAck(id),
                    });
                    self.co.jump(P::Finish);
                }
                P::ListId => {
                    let Some(id) = self.word(src)? else {
                        yield_now!(self.co, P::ListId, Ok(Parsed::NeedMore));
                    };
                    let packet_id = non_zero(id)?;
                    // Every list packet carries at least one entry.
                    if self.consumed >= self.remaining {
                        return Err(ProtocolError::MalformedPacket);
                    }
                    let (packet, next) = match self.kind {
                        PacketType::Subscribe => (
                            MqttPacket::Subscribe(Subscribe {
                                packet_id,
                                topics: Vec::new(),
                            }),
                            P::FilterTopic,
                        ),
                        PacketType::Unsubscribe => (
                            MqttPacket::Unsubscribe(Unsubscribe {
                                packet_id,
                                topics: Vec::new(),
                            }),
                            P::FilterTopic,
                        ),
                        _ => (
                            MqttPacket::SubAck(SubAck {
                                packet_id,
                                return_codes: Vec::new(),
                            }),
                            P::SubAckCode,
                        ),
                    };
                    self.packet = Some(packet);
                    self.co.jump(next);
                }
                P::FilterTopic => {
                    if !self.prefixed(src, MAX_TOPIC_LEN, ProtocolError::FieldTooLong)? {
                        yield_now!(self.co, P::FilterTopic, Ok(Parsed::NeedMore));
                    }
                    let topic = util::utf8_from_bytes(&self.field)?;
                    let next = match self.packet.as_mut() {
                        Some(MqttPacket::Subscribe(s)) => {
                            s.topics
                                .push((topic, QoS::AtMostOnce))
                                .map_err(|_| ProtocolError::FieldTooLong)?;
                            P::FilterQos
                        }
                        Some(MqttPacket::Unsubscribe(u)) => {
                            u.topics.push(topic).map_err(|_| ProtocolError::FieldTooLong)?;
                            self.list_next(P::FilterTopic)
                        }
                        _ => return Err(ProtocolError::MalformedPacket),
                    };
                    self.co.jump(next);
                }
                P::FilterQos => {
                    let Some(requested) = self.byte(src)? else {
                        yield_now!(self.co, P::FilterQos, Ok(Parsed::NeedMore));
                    };
                    if requested & !0x03 != 0 {
                        return Err(ProtocolError::MalformedPacket);
                    }
                    let qos = QoS::try_from(requested)?;
                    if let Some(MqttPacket::Subscribe(s)) = self.packet.as_mut()
                        && let Some(entry) = s.topics.last_mut()
                    {
                        entry.1 = qos;
                    }
                    let next = self.list_next(P::FilterTopic);
                    self.co.jump(next);
                }
                P::SubAckCode => {
                    let Some(code) = self.byte(src)? else {
                        yield_now!(self.co, P::SubAckCode, Ok(Parsed::NeedMore));
                    };
                    let code = SubAckReturnCode::try_from(code)?;
                    if let Some(MqttPacket::SubAck(ack)) = self.packet.as_mut() {
                        ack.return_codes
                            .push(code)
                            .map_err(|_| ProtocolError::FieldTooLong)?;
                    }
                    let next = self.list_next(P::SubAckCode);
                    self.co.jump(next);
                }
                P::Finish => {
                    if self.consumed != self.remaining {
                        return Err(ProtocolError::MalformedPacket);
                    }
                    let packet = self.packet.take().ok_or(ProtocolError::MalformedPacket)?;
                    self.reset();
                    return Ok(Parsed::Complete(packet));
                }
            }
        }
    }

    /// Validates the declared length against the packet type and creates the
    /// packet the field states will fill in.
    fn begin_body(&mut self) -> Result<(), ProtocolError> {
        use ParsePoint as P;
        let exact = |expected: usize, remaining: usize| {
            if remaining == expected {
                Ok(())
            } else {
                Err(ProtocolError::MalformedPacket)
            }
        };
        let next = match self.kind {
            PacketType::Connect => {
                self.packet = Some(MqttPacket::Connect(Connect {
                    client_id: heapless::String::new(),
                    keep_alive: 0,
                    clean_session: false,
                    will: None,
                    username: None,
                    password: None,
                }));
                P::ProtocolName
            }
            PacketType::ConnAck => {
                exact(2, self.remaining)?;
                P::AckFlags
            }
            PacketType::Publish => {
                let flags = self.header & 0x0F;
                self.packet = Some(MqttPacket::Publish(Publish {
                    topic: heapless::String::new(),
                    payload: Vec::new(),
                    qos: QoS::try_from((flags >> 1) & 0x03)?,
                    retain: flags & 0x01 != 0,
                    dup: flags & 0x08 != 0,
                    packet_id: None,
                }));
                P::TopicName
            }
            PacketType::PubAck
            | PacketType::PubRec
            | PacketType::PubRel
            | PacketType::PubComp
            | PacketType::UnsubAck => {
                exact(2, self.remaining)?;
                P::PacketId
            }
            PacketType::Subscribe | PacketType::SubAck | PacketType::Unsubscribe => P::ListId,
            PacketType::PingReq | PacketType::PingResp | PacketType::Disconnect => {
                exact(0, self.remaining)?;
                self.packet = Some(match self.kind {
                    PacketType::PingReq => MqttPacket::PingReq,
                    PacketType::PingResp => MqttPacket::PingResp,
                    _ => MqttPacket::Disconnect,
                });
                P::Finish
            }
        };
        self.co.jump(next);
        Ok(())
    }

    /// Picks the next optional `CONNECT` field after `current`.
    fn after_connect_field(&self, current: ParsePoint) -> ParsePoint {
        let flags = self.connect_flags;
        let will = flags & 0x04 != 0;
        let username = flags & 0x80 != 0;
        let password = flags & 0x40 != 0;
        match current {
            ParsePoint::ClientId if will => ParsePoint::WillTopic,
            ParsePoint::ClientId | ParsePoint::WillMessage if username => ParsePoint::Username,
            ParsePoint::ClientId | ParsePoint::WillMessage | ParsePoint::Username if password => {
                ParsePoint::Password
            }
            _ => ParsePoint::Finish,
        }
    }

    fn list_next(&self, again: ParsePoint) -> ParsePoint {
        if self.consumed < self.remaining {
            again
        } else {
            ParsePoint::Finish
        }
    }

    fn connect_mut(&mut self) -> Result<&mut Connect, ProtocolError> {
        match self.packet.as_mut() {
            Some(MqttPacket::Connect(c)) => Ok(c),
            _ => Err(ProtocolError::MalformedPacket),
        }
    }

    fn publish_mut(&mut self) -> Result<&mut Publish, ProtocolError> {
        match self.packet.as_mut() {
            Some(MqttPacket::Publish(p)) => Ok(p),
            _ => Err(ProtocolError::MalformedPacket),
        }
    }

    /// Reads one body byte, refusing to run past the declared length.
    fn byte(&mut self, src: &mut DataDesc) -> Result<Option<u8>, ProtocolError> {
        if self.consumed >= self.remaining {
            return Err(ProtocolError::MalformedPacket);
        }
        let Some(byte) = src.read_u8() else {
            return Ok(None);
        };
        self.consumed += 1;
        Ok(Some(byte))
    }

    /// Reads a big-endian `u16`, possibly split across descriptors.
    fn word(&mut self, src: &mut DataDesc) -> Result<Option<u16>, ProtocolError> {
        while self.word_len < 2 {
            let Some(byte) = self.byte(src)? else {
                return Ok(None);
            };
            self.word = (self.word << 8) | byte as u16;
            self.word_len += 1;
        }
        let word = self.word;
        self.word = 0;
        self.word_len = 0;
        Ok(Some(word))
    }

    /// Reads a 2-byte length prefix followed by that many bytes into `field`.
    fn prefixed(
        &mut self,
        src: &mut DataDesc,
        limit: usize,
        too_long: ProtocolError,
    ) -> Result<bool, ProtocolError> {
        if self.field_len.is_none() {
            let Some(len) = self.word(src)? else {
                return Ok(false);
            };
            let len = len as usize;
            if len > limit {
                return Err(too_long);
            }
            self.field.clear();
            self.field_len = Some(len);
        }
        self.fill(src)
    }

    /// Copies bytes into `field` until it reaches `field_len`.
    fn fill(&mut self, src: &mut DataDesc) -> Result<bool, ProtocolError> {
        let len = self.field_len.ok_or(ProtocolError::MalformedPacket)?;
        let missing = len - self.field.len();
        if missing > self.remaining - self.consumed {
            return Err(ProtocolError::MalformedPacket);
        }
        let chunk = src.take(missing);
        self.consumed += chunk.len();
        self.field
            .extend_from_slice(chunk)
            .map_err(|_| ProtocolError::PayloadTooLarge)?;
        if self.field.len() < len {
            return Ok(false);
        }
        self.field_len = None;
        Ok(true)
    }
}

fn non_zero(id: u16) -> Result<u16, ProtocolError> {
    if id == 0 {
        return Err(ProtocolError::ZeroPacketId);
    }
    Ok(id)
}

fn validate_connect_flags(flags: u8) -> Result<(), ProtocolError> {
    let will = flags & 0x04 != 0;
    let will_qos = (flags >> 3) & 0x03;
    let will_retain = flags & 0x20 != 0;
    if flags & 0x01 != 0 {
        return Err(ProtocolError::MalformedPacket);
    }
    if will_qos == 3 {
        return Err(ProtocolError::InvalidQoS);
    }
    if !will && (will_qos != 0 || will_retain) {
        return Err(ProtocolError::MalformedPacket);
    }
    // A password requires a username in 3.1.1.
    if flags & 0x40 != 0 && flags & 0x80 == 0 {
        return Err(ProtocolError::MalformedPacket);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::EncodePacket;

    const REFERENCE_PUBLISH: [u8; 13] = [
        0x30, 0x0B, 0x00, 0x04, b't', b'e', b's', b't', b'h', b'e', b'l', b'l', b'o',
    ];

    fn parse_all(bytes: &[u8]) -> Result<Parsed, ProtocolError> {
        let mut parser = MqttParser::new();
        let mut desc = DataDesc::from_slice(bytes).unwrap();
        parser.parse(&mut desc)
    }

    fn complete(bytes: &[u8]) -> MqttPacket {
        match parse_all(bytes).unwrap() {
            Parsed::Complete(packet) => packet,
            Parsed::NeedMore => panic!("packet incomplete"),
        }
    }

    #[test]
    fn reference_publish_decodes() {
        let MqttPacket::Publish(publish) = complete(&REFERENCE_PUBLISH) else {
            panic!("expected PUBLISH");
        };
        assert_eq!(publish.topic.as_str(), "test");
        assert_eq!(publish.payload.as_slice(), b"hello");
        assert_eq!(publish.qos, QoS::AtMostOnce);
        assert!(!publish.retain);
        assert!(!publish.dup);
        assert_eq!(publish.packet_id, None);
    }

    #[test]
    fn one_byte_chunks_resume_mid_field() {
        let mut parser = MqttParser::new();
        for (i, byte) in REFERENCE_PUBLISH.iter().enumerate() {
            let mut desc = DataDesc::from_slice(&[*byte]).unwrap();
            let res = parser.parse(&mut desc).unwrap();
            if i + 1 < REFERENCE_PUBLISH.len() {
                assert_eq!(res, Parsed::NeedMore, "byte {i}");
                assert!(parser.in_progress());
            } else {
                assert!(matches!(res, Parsed::Complete(MqttPacket::Publish(_))));
                assert!(!parser.in_progress());
            }
        }
    }

    #[test]
    fn trailing_bytes_stay_in_descriptor() {
        let mut bytes = std::vec::Vec::from(REFERENCE_PUBLISH);
        bytes.extend_from_slice(&[0xD0, 0x00]);
        let mut parser = MqttParser::new();
        let mut desc = DataDesc::from_slice(&bytes).unwrap();
        assert!(matches!(parser.parse(&mut desc), Ok(Parsed::Complete(MqttPacket::Publish(_)))));
        assert_eq!(desc.remaining(), &[0xD0, 0x00]);
        assert_eq!(parser.parse(&mut desc), Ok(Parsed::Complete(MqttPacket::PingResp)));
        assert!(desc.is_consumed());
    }

    #[test]
    fn five_byte_remaining_length_is_rejected() {
        assert_eq!(
            parse_all(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]),
            Err(ProtocolError::MalformedRemainingLength)
        );
    }

    #[test]
    fn invalid_headers_are_rejected() {
        assert_eq!(parse_all(&[0x00, 0x00]), Err(ProtocolError::InvalidPacketType(0)));
        assert_eq!(parse_all(&[0x36, 0x00]), Err(ProtocolError::InvalidQoS));
        assert_eq!(parse_all(&[0x82 & 0xF0, 0x00]), Err(ProtocolError::InvalidFlags(0)));
        assert_eq!(parse_all(&[0xC1, 0x00]), Err(ProtocolError::InvalidFlags(1)));
    }

    #[test]
    fn zero_packet_ids_are_rejected() {
        assert_eq!(parse_all(&[0x40, 0x02, 0x00, 0x00]), Err(ProtocolError::ZeroPacketId));
        assert_eq!(
            parse_all(&[0x32, 0x05, 0x00, 0x01, b'a', 0x00, 0x00]),
            Err(ProtocolError::ZeroPacketId)
        );
    }

    #[test]
    fn wrong_fixed_lengths_are_malformed() {
        assert_eq!(parse_all(&[0x40, 0x03, 0x00, 0x01, 0x00]), Err(ProtocolError::MalformedPacket));
        assert_eq!(parse_all(&[0xD0, 0x01, 0x00]), Err(ProtocolError::MalformedPacket));
        assert_eq!(parse_all(&[0x20, 0x02, 0x02, 0x00]), Err(ProtocolError::MalformedPacket));
    }

    #[test]
    fn topic_overrunning_declared_length_is_malformed() {
        // Remaining length 3 but the topic claims 4 bytes.
        assert_eq!(
            parse_all(&[0x30, 0x03, 0x00, 0x04, b't']),
            Err(ProtocolError::MalformedPacket)
        );
    }

    #[test]
    fn suback_codes_are_checked() {
        let MqttPacket::SubAck(ack) = complete(&[0x90, 0x05, 0x00, 0x09, 0x00, 0x02, 0x80]) else {
            panic!("expected SUBACK");
        };
        assert_eq!(ack.packet_id, 9);
        assert_eq!(
            ack.return_codes.as_slice(),
            &[
                SubAckReturnCode::Granted(QoS::AtMostOnce),
                SubAckReturnCode::Granted(QoS::ExactlyOnce),
                SubAckReturnCode::Failure
            ]
        );
        assert_eq!(
            parse_all(&[0x90, 0x03, 0x00, 0x09, 0x03]),
            Err(ProtocolError::InvalidSubAckCode(3))
        );
    }

    #[test]
    fn parser_recovers_after_error_reset() {
        let mut parser = MqttParser::new();
        let mut bad = DataDesc::from_slice(&[0xF0]).unwrap();
        assert!(parser.parse(&mut bad).is_err());
        let mut good = DataDesc::from_slice(&REFERENCE_PUBLISH).unwrap();
        assert!(matches!(parser.parse(&mut good), Ok(Parsed::Complete(_))));
    }

    #[test]
    fn connack_exposes_session_and_code() {
        assert_eq!(
            complete(&[0x20, 0x02, 0x01, 0x05]),
            MqttPacket::ConnAck(ConnAck {
                session_present: true,
                code: ConnectReasonCode::NotAuthorized,
            })
        );
    }

    #[test]
    fn connect_with_all_optional_fields_round_trips() {
        let mut connect = Connect::new("client-1", 45, false).unwrap();
        connect.will = Some(Will {
            topic: util::copy_str("status").unwrap(),
            message: util::copy_bytes(b"offline").unwrap(),
            qos: QoS::ExactlyOnce,
            retain: false,
        });
        connect.username = Some(util::copy_str("user").unwrap());
        connect.password = Some(util::copy_bytes(b"secret").unwrap());
        let packet = MqttPacket::Connect(connect);

        let mut buf = [0u8; 128];
        let len = packet.encode(&mut buf).unwrap();
        assert_eq!(complete(&buf[..len]), packet);
    }
}
