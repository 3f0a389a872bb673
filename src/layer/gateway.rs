//! Tunnels this connection's MQTT stream through a gateway.
//!
//! Every encoded frame from above is wrapped in QoS 0 `PUBLISH` packets on
//! the configured tunnel topic. A frame longer than one publish payload is
//! split, and the parts go out one at a time: the next part leaves once the
//! previous one is written, and the `Written` notice travels up only after
//! the last part. Inbound bytes are parsed as the gateway's own packets;
//! tunnel publishes are unwrapped and their payload passed up as raw bytes
//! for the codec above, which reassembles split frames.

use super::{Flow, Layer, LayerContext, Op, Payload, Wake};
use crate::data::DataDesc;
use crate::error::{MqttError, Status};
use crate::packet::{MAX_PAYLOAD_LEN, MqttPacket, Publish, QoS};
use crate::parser::{MqttParser, Parsed};

pub struct GatewayLayer {
    parser: MqttParser,
    pending: Option<DataDesc>,
    /// Rest of the frame being tunnelled, past the part on the wire.
    outbound: Option<DataDesc>,
}

impl Default for GatewayLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayLayer {
    pub const fn new() -> Self {
        Self {
            parser: MqttParser::new(),
            pending: None,
            outbound: None,
        }
    }

    /// Frame parts still waiting to leave.
    pub fn has_outbound(&self) -> bool {
        self.outbound.is_some()
    }

    /// Wraps the next part of `frame` into a tunnel publish.
    fn wrap(topic: &str, frame: &mut DataDesc) -> Result<DataDesc, MqttError> {
        let publish = Publish::new(topic, frame.take(MAX_PAYLOAD_LEN), QoS::AtMostOnce, false)?;
        MqttPacket::Publish(publish).to_desc()
    }

    fn send_part(&mut self, topic: &str, mut frame: DataDesc, status: Status) -> Flow {
        let part = match Self::wrap(topic, &mut frame) {
            Ok(part) => part,
            Err(err) => {
                error!("cannot tunnel frame: {:?}", err);
                return Self::close(err);
            }
        };
        if !frame.is_consumed() {
            trace!("tunnelling frame in parts, {} bytes left", frame.remaining().len());
            self.outbound = Some(frame);
        }
        Flow::Next(Op::Push, Payload::Bytes(part), status)
    }

    fn close(err: MqttError) -> Flow {
        Flow::Next(Op::Close, Payload::None, Status::Failed(err))
    }
}

impl Layer for GatewayLayer {
    fn init(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        self.parser.reset();
        self.pending = None;
        self.outbound = None;
        Flow::Next(Op::Init, data, status)
    }

    fn push(&mut self, cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        match (data, status) {
            (data, Status::Written) => match self.outbound.take() {
                Some(rest) => self.send_part(cx.conn.options.tunnel_topic(), rest, Status::Ok),
                None => Flow::Prev(Op::Push, data, status),
            },
            (data, Status::Failed(_)) => {
                self.outbound = None;
                Flow::Prev(Op::Push, data, status)
            }
            (Payload::Bytes(_), _) if self.outbound.is_some() => {
                error!("frame pushed while another is still tunnelled");
                Self::close(MqttError::OutOfResources)
            }
            (Payload::Bytes(frame), _) => self.send_part(cx.conn.options.tunnel_topic(), frame, status),
            (data, status) => Flow::Next(Op::Push, data, status),
        }
    }

    fn pull(&mut self, cx: &mut LayerContext<'_>, data: Payload, _status: Status) -> Flow {
        let mut desc = match (data, self.pending.take()) {
            (Payload::Bytes(desc), None) => desc,
            (Payload::Bytes(desc), Some(mut pending)) => {
                if let Err(err) = pending.append(desc.remaining()) {
                    return Self::close(err);
                }
                pending
            }
            (_, Some(pending)) => pending,
            (_, None) => return Flow::Done(Status::WantRead),
        };
        let parsed = match self.parser.parse(&mut desc) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("malformed gateway frame: {:?}", err);
                return Self::close(MqttError::Protocol(err));
            }
        };
        if !desc.is_consumed() {
            self.pending = Some(desc);
            if let Err(err) = cx.post(Op::Pull, Wake::Io) {
                return Self::close(err);
            }
        }
        match parsed {
            Parsed::NeedMore => Flow::Done(Status::WantRead),
            Parsed::Complete(MqttPacket::Publish(publish))
                if publish.topic.as_str() == cx.conn.options.tunnel_topic() =>
            {
                match DataDesc::from_slice(&publish.payload) {
                    Ok(inner) => Flow::Prev(Op::Pull, Payload::Bytes(inner), Status::Ok),
                    Err(err) => Self::close(err),
                }
            }
            Parsed::Complete(packet) => {
                warn!("dropping {:?} outside the tunnel", packet.packet_type());
                Flow::Done(Status::WantRead)
            }
        }
    }

    fn close_externally(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        self.parser.reset();
        self.pending = None;
        self.outbound = None;
        Flow::Prev(Op::CloseExternally, data, status)
    }
}
