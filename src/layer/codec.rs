//! Translates between packets above and bytes below.
//!
//! Outbound packets are encoded into fresh descriptors. Inbound bytes feed the
//! incremental parser; when one read holds more than one packet the rest is
//! parked and the layer re-posts itself, so every packet travels up in its
//! own dispatcher task.

use super::{Flow, Layer, LayerContext, Op, Payload, Wake};
use crate::data::DataDesc;
use crate::error::{MqttError, Status};
use crate::parser::{MqttParser, Parsed};

pub struct CodecLayer {
    parser: MqttParser,
    pending: Option<DataDesc>,
}

impl Default for CodecLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecLayer {
    pub const fn new() -> Self {
        Self {
            parser: MqttParser::new(),
            pending: None,
        }
    }

    fn reset(&mut self) {
        self.parser.reset();
        self.pending = None;
    }
}

impl Layer for CodecLayer {
    fn init(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        self.reset();
        Flow::Next(Op::Init, data, status)
    }

    fn push(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        match (data, status) {
            (data, Status::Written | Status::Failed(_)) => Flow::Prev(Op::Push, data, status),
            (Payload::Packet(packet), _) => match packet.to_desc() {
                Ok(desc) => {
                    trace!("encoded {:?}, {} bytes", packet.packet_type(), desc.len());
                    Flow::Next(Op::Push, Payload::Bytes(desc), status)
                }
                Err(err) => {
                    error!("cannot encode {:?}: {:?}", packet.packet_type(), err);
                    Flow::Next(Op::Close, Payload::None, Status::Failed(err))
                }
            },
            (data, status) => Flow::Next(Op::Push, data, status),
        }
    }

    fn pull(&mut self, cx: &mut LayerContext<'_>, data: Payload, _status: Status) -> Flow {
        let mut desc = match (data, self.pending.take()) {
            (Payload::Bytes(desc), None) => desc,
            (Payload::Bytes(desc), Some(mut pending)) => {
                if let Err(err) = pending.append(desc.remaining()) {
                    return Flow::Next(Op::Close, Payload::None, Status::Failed(err));
                }
                pending
            }
            (_, Some(pending)) => pending,
            (_, None) => return Flow::Done(Status::WantRead),
        };
        match self.parser.parse(&mut desc) {
            Ok(Parsed::Complete(packet)) => {
                if !desc.is_consumed() {
                    self.pending = Some(desc);
                    if let Err(err) = cx.post(Op::Pull, Wake::Io) {
                        return Flow::Next(Op::Close, Payload::None, Status::Failed(err));
                    }
                }
                trace!("decoded {:?}", packet.packet_type());
                Flow::Prev(Op::Pull, Payload::Packet(packet), Status::Ok)
            }
            Ok(Parsed::NeedMore) => Flow::Done(Status::WantRead),
            Err(err) => {
                warn!("malformed inbound packet: {:?}", err);
                Flow::Next(Op::Close, Payload::None, Status::Failed(MqttError::Protocol(err)))
            }
        }
    }

    fn close_externally(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        self.reset();
        Flow::Prev(Op::CloseExternally, data, status)
    }
}
