//! MQTT session logic at the application end of the chain.
//!
//! The layer owns the session: it sends `CONNECT` and waits for `CONNACK`,
//! keeps the connection alive with `PINGREQ`, answers inbound QoS 1 and QoS 2
//! publishes, and drives one [`RequestTask`] per application request.
//!
//! Only one packet travels toward the wire at a time. Whoever holds the writer
//! slot gets it back with the `Written` notice; control packets are served
//! before request tasks.

mod task;

pub use task::{Request, RequestTask};

use heapless::{Deque, Vec};

use self::task::{Ack, TaskEvent, TaskWait};
use super::{ConnectionState, Flow, Layer, LayerContext, Op, Payload, TimerKind};
use crate::coroutine::Step;
use crate::dispatcher::TimerId;
use crate::error::{ConnectReasonCode, MqttError, ProtocolError, Status};
use crate::event::{EventHandler, MqttEvent, RequestId};
use crate::packet::{ConnAck, MqttPacket, Publish, QoS};

/// Requests that may be outstanding at once.
pub const MAX_INFLIGHT: usize = 8;

/// Inbound QoS 2 packet identifiers awaiting `PUBREL`.
const MAX_AWAITING_RELEASE: usize = 16;

const CONTROL_QUEUE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Session {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Writer {
    Connect,
    Control,
    Task(RequestId),
    Disconnect,
}

/// Packets the layer sends on its own behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    PubAck(u16),
    PubRec(u16),
    PubComp(u16),
    PingReq,
}

impl Control {
    fn packet(self) -> MqttPacket {
        match self {
            Control::PubAck(id) => MqttPacket::PubAck(id),
            Control::PubRec(id) => MqttPacket::PubRec(id),
            Control::PubComp(id) => MqttPacket::PubComp(id),
            Control::PingReq => MqttPacket::PingReq,
        }
    }
}

pub struct LogicLayer {
    session: Session,
    writer: Option<Writer>,
    control: Deque<Control, CONTROL_QUEUE_LEN>,
    tasks: Vec<RequestTask, MAX_INFLIGHT>,
    awaiting_release: Vec<u16, MAX_AWAITING_RELEASE>,
    next_packet_id: u16,
    keepalive_timer: Option<TimerId>,
    /// Armed while a `PINGREQ` is unanswered.
    ping_timer: Option<TimerId>,
    connack_timer: Option<TimerId>,
    close_requested: bool,
}

impl Default for LogicLayer {
    fn default() -> Self {
        Self::new()
    }
}

fn close(err: MqttError) -> Flow {
    Flow::Next(Op::Close, Payload::None, Status::Failed(err))
}

impl LogicLayer {
    pub const fn new() -> Self {
        Self {
            session: Session::Idle,
            writer: None,
            control: Deque::new(),
            tasks: Vec::new(),
            awaiting_release: Vec::new(),
            next_packet_id: 0,
            keepalive_timer: None,
            ping_timer: None,
            connack_timer: None,
            close_requested: false,
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session == Session::Connected
    }

    /// Requests not yet completed.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &RequestTask> {
        self.tasks.iter()
    }

    /// Queues a request. The caller kicks the layer afterwards so the request
    /// is sent as soon as the session allows.
    pub fn submit(&mut self, id: RequestId, mut request: Request) -> Result<u16, MqttError> {
        if self.tasks.is_full() {
            return Err(MqttError::OutOfResources);
        }
        let packet_id = if request.needs_ack() {
            self.allocate_packet_id()?
        } else {
            0
        };
        request.set_packet_id(packet_id);
        self.tasks
            .push(RequestTask::new(id, request, packet_id))
            .map_err(|_| MqttError::OutOfResources)?;
        trace!("queued request {}, packet {}", id.0, packet_id);
        Ok(packet_id)
    }

    /// Completes every pending request with `err`. Used once the client gives
    /// up on the connection.
    pub fn fail_all(&mut self, events: &mut dyn EventHandler, err: MqttError) {
        for task in core::mem::take(&mut self.tasks) {
            events.on_event(task.into_event(Err(err)));
        }
        self.awaiting_release.clear();
    }

    fn allocate_packet_id(&mut self) -> Result<u16, MqttError> {
        for _ in 0..=MAX_INFLIGHT {
            self.next_packet_id = match self.next_packet_id.wrapping_add(1) {
                0 => 1,
                id => id,
            };
            let candidate = self.next_packet_id;
            if !self.tasks.iter().any(|t| t.packet_id() == candidate) {
                return Ok(candidate);
            }
        }
        Err(MqttError::OutOfResources)
    }

    fn arm_keepalive(&mut self, cx: &mut LayerContext<'_>) -> Result<(), MqttError> {
        let interval = cx.conn.options.keep_alive();
        if interval.as_ticks() == 0 {
            return Ok(());
        }
        match self.keepalive_timer {
            Some(id) => cx.sched.restart(id, interval),
            None => {
                self.keepalive_timer = Some(cx.timer(interval, Op::Push, TimerKind::KeepAlive)?);
                Ok(())
            }
        }
    }

    fn queue_control(&mut self, control: Control) -> Result<(), MqttError> {
        self.control
            .push_back(control)
            .map_err(|_| MqttError::OutOfResources)
    }

    /// Hands the writer slot to the next packet, if the slot is free.
    fn pump(&mut self, cx: &mut LayerContext<'_>) -> Flow {
        if self.writer.is_some() {
            return Flow::Done(Status::WantWrite);
        }
        if self.session != Session::Connected {
            return Flow::Done(Status::Ok);
        }
        if let Some(control) = self.control.pop_front() {
            self.writer = Some(Writer::Control);
            return Flow::Next(Op::Push, Payload::Packet(control.packet()), Status::Ok);
        }
        if self.close_requested {
            self.close_requested = false;
            self.session = Session::Disconnecting;
            self.writer = Some(Writer::Disconnect);
            debug!("sending DISCONNECT");
            return Flow::Next(Op::Push, Payload::Packet(MqttPacket::Disconnect), Status::Ok);
        }
        let ready = self.tasks.iter().find(|t| t.wants_writer()).map(|t| t.id());
        match ready {
            Some(id) => self.step_task(cx, id, TaskEvent::Writable),
            None => Flow::Done(Status::Ok),
        }
    }

    fn step_task(&mut self, cx: &mut LayerContext<'_>, id: RequestId, event: TaskEvent) -> Flow {
        let Some(pos) = self.tasks.iter().position(|t| t.id() == id) else {
            return self.pump(cx);
        };
        match self.tasks[pos].step(cx, event) {
            Step::Complete(result) => {
                let task = self.tasks.remove(pos);
                trace!("request {} finished", id.0);
                cx.events.on_event(task.into_event(result));
                self.pump(cx)
            }
            Step::Suspend(TaskWait::Send(packet)) => {
                self.writer = Some(Writer::Task(id));
                Flow::Next(Op::Push, Payload::Packet(packet), Status::Ok)
            }
            Step::Suspend(_) => self.pump(cx),
        }
    }

    fn on_written(&mut self, cx: &mut LayerContext<'_>) -> Flow {
        let Some(writer) = self.writer.take() else {
            trace!("written notice without a writer");
            return self.pump(cx);
        };
        if self.session == Session::Connected && self.ping_timer.is_none() {
            if let Err(err) = self.arm_keepalive(cx) {
                return close(err);
            }
        }
        match writer {
            Writer::Connect | Writer::Control => self.pump(cx),
            Writer::Disconnect => Flow::Next(Op::Close, Payload::None, Status::Ok),
            Writer::Task(id) => self.step_task(cx, id, TaskEvent::Written),
        }
    }

    fn on_timer(&mut self, cx: &mut LayerContext<'_>, kind: TimerKind) -> Flow {
        match kind {
            TimerKind::ConnAck => {
                self.connack_timer = None;
                warn!("no CONNACK within the connect timeout");
                close(MqttError::Timeout)
            }
            TimerKind::KeepAlive => {
                self.keepalive_timer = None;
                if self.session != Session::Connected {
                    return Flow::Done(Status::Ok);
                }
                if let Err(err) = self.queue_control(Control::PingReq) {
                    return close(err);
                }
                match cx.timer(cx.conn.options.keep_alive(), Op::Push, TimerKind::PingTimeout) {
                    Ok(id) => self.ping_timer = Some(id),
                    Err(err) => return close(err),
                }
                trace!("keep-alive interval elapsed, pinging");
                self.pump(cx)
            }
            TimerKind::PingTimeout => {
                self.ping_timer = None;
                warn!("no response to PINGREQ");
                close(MqttError::KeepaliveTimeout)
            }
            TimerKind::AckTimeout(packet_id) => {
                match self.tasks.iter().find(|t| t.packet_id() == packet_id) {
                    Some(task) => {
                        let id = task.id();
                        self.step_task(cx, id, TaskEvent::Timeout)
                    }
                    None => self.pump(cx),
                }
            }
            TimerKind::Connect | TimerKind::NetworkIdle => Flow::Done(Status::Ok),
        }
    }

    fn on_connack(&mut self, cx: &mut LayerContext<'_>, ack: ConnAck) -> Flow {
        cx.cancel(&mut self.connack_timer);
        if ack.code != ConnectReasonCode::Success {
            warn!("connection refused: {:?}", ack.code);
            return close(MqttError::ConnectionRefused(ack.code));
        }
        self.session = Session::Connected;
        cx.conn.state = ConnectionState::Opened;
        if !ack.session_present {
            self.awaiting_release.clear();
        }
        info!("connected, session present: {}", ack.session_present);
        cx.events.on_event(MqttEvent::Connected {
            session_present: ack.session_present,
        });
        if let Err(err) = self.arm_keepalive(cx) {
            return close(err);
        }
        self.pump(cx)
    }

    fn on_publish(&mut self, cx: &mut LayerContext<'_>, publish: Publish) -> Flow {
        let queued = match (publish.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => {
                cx.events.on_event(MqttEvent::Message(publish));
                Ok(())
            }
            (QoS::AtLeastOnce, Some(id)) => {
                cx.events.on_event(MqttEvent::Message(publish));
                self.queue_control(Control::PubAck(id))
            }
            (QoS::ExactlyOnce, Some(id)) => {
                if self.awaiting_release.contains(&id) {
                    debug!("duplicate QoS 2 publish {}", id);
                } else {
                    if self.awaiting_release.push(id).is_err() {
                        return close(MqttError::OutOfResources);
                    }
                    cx.events.on_event(MqttEvent::Message(publish));
                }
                self.queue_control(Control::PubRec(id))
            }
            (_, None) => Err(MqttError::Protocol(ProtocolError::MalformedPacket)),
        };
        match queued {
            Ok(()) => self.pump(cx),
            Err(err) => close(err),
        }
    }

    fn on_ack(&mut self, cx: &mut LayerContext<'_>, packet_id: u16, ack: Ack) -> Flow {
        let owner = self
            .tasks
            .iter()
            .find(|t| t.packet_id() != 0 && t.packet_id() == packet_id)
            .map(|t| t.id());
        match owner {
            Some(id) => self.step_task(cx, id, TaskEvent::Ack(ack)),
            None => {
                warn!("acknowledgement for unknown packet {}", packet_id);
                self.pump(cx)
            }
        }
    }

    fn on_release(&mut self, cx: &mut LayerContext<'_>, packet_id: u16) -> Flow {
        self.awaiting_release.retain(|id| *id != packet_id);
        match self.queue_control(Control::PubComp(packet_id)) {
            Ok(()) => self.pump(cx),
            Err(err) => close(err),
        }
    }
}

impl Layer for LogicLayer {
    fn init(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        self.session = Session::Idle;
        self.writer = None;
        self.control.clear();
        self.close_requested = false;
        Flow::Next(Op::Init, data, status)
    }

    fn connect(&mut self, cx: &mut LayerContext<'_>, _data: Payload, _status: Status) -> Flow {
        let packet = match cx.conn.options.connect_packet() {
            Ok(packet) => packet,
            Err(err) => return close(err),
        };
        match cx.timer(cx.conn.options.connect_timeout(), Op::Push, TimerKind::ConnAck) {
            Ok(id) => self.connack_timer = Some(id),
            Err(err) => return close(err),
        }
        self.session = Session::Connecting;
        self.writer = Some(Writer::Connect);
        debug!("transport up, sending CONNECT");
        Flow::Next(Op::Push, Payload::Packet(MqttPacket::Connect(packet)), Status::Ok)
    }

    fn push(&mut self, cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        match (data, status) {
            (Payload::Timer(kind), _) => self.on_timer(cx, kind),
            (_, Status::Written) => self.on_written(cx),
            (_, Status::Failed(err)) => {
                warn!("write rejected: {:?}", err);
                close(err)
            }
            _ => self.pump(cx),
        }
    }

    fn pull(&mut self, cx: &mut LayerContext<'_>, data: Payload, _status: Status) -> Flow {
        let Payload::Packet(packet) = data else {
            return Flow::Done(Status::WantRead);
        };
        // Any inbound packet answers an outstanding ping.
        if self.ping_timer.is_some() {
            cx.cancel(&mut self.ping_timer);
            if let Err(err) = self.arm_keepalive(cx) {
                return close(err);
            }
        }
        match (self.session, packet) {
            (Session::Connecting, MqttPacket::ConnAck(ack)) => self.on_connack(cx, ack),
            (Session::Connected | Session::Disconnecting, packet) => match packet {
                MqttPacket::Publish(publish) => self.on_publish(cx, publish),
                MqttPacket::PubAck(id) => self.on_ack(cx, id, Ack::PubAck),
                MqttPacket::PubRec(id) => self.on_ack(cx, id, Ack::PubRec),
                MqttPacket::PubComp(id) => self.on_ack(cx, id, Ack::PubComp),
                MqttPacket::SubAck(suback) => self.on_ack(cx, suback.packet_id, Ack::SubAck(suback.return_codes)),
                MqttPacket::UnsubAck(id) => self.on_ack(cx, id, Ack::UnsubAck),
                MqttPacket::PubRel(id) => self.on_release(cx, id),
                MqttPacket::PingResp => {
                    trace!("PINGRESP");
                    self.pump(cx)
                }
                other => {
                    warn!("unexpected {:?} from broker", other.packet_type());
                    close(MqttError::Protocol(ProtocolError::UnexpectedPacket(
                        other.packet_type() as u8,
                    )))
                }
            },
            (_, other) => {
                warn!("{:?} before CONNACK", other.packet_type());
                close(MqttError::Protocol(ProtocolError::UnexpectedPacket(
                    other.packet_type() as u8,
                )))
            }
        }
    }

    fn close(&mut self, cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        if self.session != Session::Connected {
            return Flow::Next(Op::Close, data, status);
        }
        self.close_requested = true;
        self.pump(cx)
    }

    fn close_externally(&mut self, cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        cx.cancel(&mut self.keepalive_timer);
        cx.cancel(&mut self.ping_timer);
        cx.cancel(&mut self.connack_timer);
        self.writer = None;
        self.control.clear();
        self.close_requested = false;

        let mut at = 0;
        while at < self.tasks.len() {
            if self.tasks[at].interrupt(cx) {
                at += 1;
            } else {
                let task = self.tasks.remove(at);
                cx.events.on_event(task.into_event(Err(MqttError::NotConnected)));
            }
        }
        if cx.conn.options.clean_session() {
            self.awaiting_release.clear();
        }

        let reason = status.error();
        match self.session {
            Session::Connected | Session::Disconnecting => {
                cx.events.on_event(MqttEvent::Disconnected { reason });
            }
            Session::Idle | Session::Connecting => {
                cx.events
                    .on_event(MqttEvent::ConnectFailed(reason.unwrap_or(MqttError::NotConnected)));
            }
        }
        self.session = Session::Idle;
        Flow::Prev(Op::CloseExternally, data, status)
    }
}

#[cfg(test)]
mod tests {
    use embassy_time::Duration;

    use super::*;
    use crate::data::DataDesc;
    use crate::layer::ChainScheme;
    use crate::layer::testing::{Harness, options};
    use crate::packet::{SubAckReturnCode, Subscribe};
    use crate::parser::{MqttParser, Parsed};

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    fn connected(options: crate::client::MqttOptions) -> Harness {
        let mut h = Harness::new(ChainScheme::Plain, None, options);
        h.open();
        h.net.take_written();
        h.inject(&CONNACK);
        h.run_at(0);
        assert_eq!(
            h.drain_events(),
            [MqttEvent::Connected {
                session_present: false
            }]
        );
        h
    }

    fn submit(h: &mut Harness, id: u32, request: Request) -> u16 {
        let packet_id = h.chain.logic_mut().submit(RequestId(id), request).unwrap();
        let kick = h.chain.kick();
        h.with_cx(|chain, cx| chain.resume(cx, kick)).unwrap();
        packet_id
    }

    fn sent_packets(h: &mut Harness) -> std::vec::Vec<MqttPacket> {
        let mut wire = DataDesc::from_slice(&h.net.take_written()).unwrap();
        let mut parser = MqttParser::new();
        let mut out = std::vec::Vec::new();
        while let Ok(Parsed::Complete(packet)) = parser.parse(&mut wire) {
            out.push(packet);
        }
        out
    }

    /// Hands a decoded packet straight to the logic layer.
    fn deliver(h: &mut Harness, packet: MqttPacket) {
        h.with_cx(|chain, cx| chain.invoke(cx, 0, Op::Pull, Payload::Packet(packet), Status::Ok))
            .unwrap();
    }

    fn publish(qos: QoS) -> Request {
        Request::Publish(Publish::new("t/1", b"x", qos, false).unwrap())
    }

    #[test]
    fn keepalive_pings_then_times_out() {
        let mut h = connected(options());
        h.settle_at(30_000);
        assert_eq!(sent_packets(&mut h), [MqttPacket::PingReq]);
        h.settle_at(59_999);
        assert_eq!(h.conn.state, ConnectionState::Opened);
        h.settle_at(60_000);
        assert_eq!(h.conn.state, ConnectionState::Closed);
        assert_eq!(h.conn.last_error, Some(MqttError::KeepaliveTimeout));
        assert_eq!(
            h.drain_events(),
            [MqttEvent::Disconnected {
                reason: Some(MqttError::KeepaliveTimeout)
            }]
        );
    }

    #[test]
    fn pingresp_keeps_the_session_alive() {
        let mut h = connected(options());
        h.settle_at(30_000);
        h.inject(&[0xD0, 0x00]);
        h.settle_at(30_010);
        h.settle_at(60_000);
        assert_eq!(h.conn.state, ConnectionState::Opened);
        // Next interval counts from the response.
        h.settle_at(60_010);
        assert_eq!(sent_packets(&mut h), [MqttPacket::PingReq, MqttPacket::PingReq]);
    }

    #[test]
    fn zero_keepalive_never_pings() {
        let mut h = connected(options().with_keep_alive(Duration::from_secs(0)));
        h.settle_at(600_000);
        assert!(h.net.written.is_empty());
        assert_eq!(h.conn.state, ConnectionState::Opened);
    }

    #[test]
    fn qos0_publish_completes_once_written() {
        let mut h = connected(options());
        assert_eq!(submit(&mut h, 1, publish(QoS::AtMostOnce)), 0);
        match sent_packets(&mut h).as_slice() {
            [MqttPacket::Publish(p)] => assert_eq!(p.packet_id, None),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            h.drain_events(),
            [MqttEvent::Published {
                id: RequestId(1),
                result: Ok(())
            }]
        );
        assert_eq!(h.chain.logic().pending(), 0);
    }

    #[test]
    fn qos1_retransmits_with_dup_and_completes_once() {
        let mut h = connected(options().with_ack_timeout(Duration::from_secs(5)));
        let pid = submit(&mut h, 7, publish(QoS::AtLeastOnce));
        assert_ne!(pid, 0);
        match sent_packets(&mut h).as_slice() {
            [MqttPacket::Publish(p)] => assert!(!p.dup),
            other => panic!("unexpected {:?}", other),
        }
        h.settle_at(5_000);
        match sent_packets(&mut h).as_slice() {
            [MqttPacket::Publish(p)] => {
                assert!(p.dup);
                assert_eq!(p.packet_id, Some(pid));
            }
            other => panic!("unexpected {:?}", other),
        }
        h.inject(&[0x40, 0x02, (pid >> 8) as u8, pid as u8]);
        h.settle_at(5_001);
        // A late duplicate ack changes nothing.
        h.inject(&[0x40, 0x02, (pid >> 8) as u8, pid as u8]);
        h.settle_at(5_002);
        assert_eq!(
            h.drain_events(),
            [MqttEvent::Published {
                id: RequestId(7),
                result: Ok(())
            }]
        );
    }

    #[test]
    fn retry_budget_exhaustion_fails_the_request() {
        let mut h = connected(
            options()
                .with_ack_timeout(Duration::from_secs(1))
                .with_max_retries(2)
                .with_keep_alive(Duration::from_secs(0)),
        );
        submit(&mut h, 3, publish(QoS::AtLeastOnce));
        for ms in [1_000, 2_000, 3_000] {
            h.settle_at(ms);
        }
        assert_eq!(sent_packets(&mut h).len(), 3);
        assert_eq!(
            h.drain_events(),
            [MqttEvent::Published {
                id: RequestId(3),
                result: Err(MqttError::RetryLimitExceeded)
            }]
        );
    }

    #[test]
    fn ack_arriving_while_a_retransmission_is_queued_completes_the_request() {
        let mut h = connected(
            options()
                .with_ack_timeout(Duration::from_secs(1))
                .with_keep_alive(Duration::from_secs(0)),
        );
        let pid = submit(&mut h, 5, publish(QoS::AtLeastOnce));
        sent_packets(&mut h);

        // The retransmission sits in the socket queue.
        h.net.write_budget = Some(0);
        h.settle_at(1_000);
        assert!(h.net.written.is_empty());
        deliver(&mut h, MqttPacket::PubAck(pid));
        assert!(h.drain_events().is_empty());

        h.net.write_budget = None;
        h.settle_at(1_002);
        assert!(matches!(sent_packets(&mut h).as_slice(), [MqttPacket::Publish(p)] if p.dup));
        assert_eq!(
            h.drain_events(),
            [MqttEvent::Published {
                id: RequestId(5),
                result: Ok(())
            }]
        );
        assert_eq!(h.chain.logic().pending(), 0);
        h.settle_at(10_000);
        assert!(h.net.written.is_empty());
    }

    #[test]
    fn pubcomp_arriving_while_pubrel_is_queued_completes_the_request() {
        let mut h = connected(
            options()
                .with_ack_timeout(Duration::from_secs(1))
                .with_keep_alive(Duration::from_secs(0)),
        );
        let pid = submit(&mut h, 6, publish(QoS::ExactlyOnce));
        h.inject(&[0x50, 0x02, (pid >> 8) as u8, pid as u8]);
        h.settle_at(1);
        assert_eq!(sent_packets(&mut h).last(), Some(&MqttPacket::PubRel(pid)));

        h.net.write_budget = Some(0);
        h.settle_at(1_001);
        deliver(&mut h, MqttPacket::PubComp(pid));
        assert!(h.drain_events().is_empty());
        h.net.write_budget = None;
        h.settle_at(1_003);
        assert_eq!(sent_packets(&mut h), [MqttPacket::PubRel(pid)]);
        assert_eq!(
            h.drain_events(),
            [MqttEvent::Published {
                id: RequestId(6),
                result: Ok(())
            }]
        );
        h.settle_at(10_000);
        assert!(h.net.written.is_empty());
    }

    #[test]
    fn qos2_publish_walks_rec_rel_comp() {
        let mut h = connected(options());
        let pid = submit(&mut h, 2, publish(QoS::ExactlyOnce));
        sent_packets(&mut h);
        h.inject(&[0x50, 0x02, 0x00, pid as u8]);
        h.settle_at(1);
        assert_eq!(sent_packets(&mut h), [MqttPacket::PubRel(pid)]);
        assert!(h.drain_events().is_empty());
        h.inject(&[0x70, 0x02, 0x00, pid as u8]);
        h.settle_at(2);
        assert_eq!(
            h.drain_events(),
            [MqttEvent::Published {
                id: RequestId(2),
                result: Ok(())
            }]
        );
    }

    #[test]
    fn inbound_qos2_is_delivered_once() {
        let mut h = connected(options());
        let inbound = [0x34, 0x06, 0x00, 0x01, b'a', 0x00, 0x09, b'!'];
        h.inject(&inbound);
        h.settle_at(1);
        h.inject(&inbound);
        h.settle_at(2);
        assert_eq!(sent_packets(&mut h), [MqttPacket::PubRec(9), MqttPacket::PubRec(9)]);
        let messages = h
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, MqttEvent::Message(_)))
            .count();
        assert_eq!(messages, 1);

        h.inject(&[0x62, 0x02, 0x00, 0x09]);
        h.settle_at(3);
        assert_eq!(sent_packets(&mut h), [MqttPacket::PubComp(9)]);
    }

    #[test]
    fn inbound_qos1_is_acknowledged() {
        let mut h = connected(options());
        h.inject(&[0x32, 0x06, 0x00, 0x01, b'a', 0x00, 0x05, b'!']);
        h.settle_at(1);
        assert_eq!(sent_packets(&mut h), [MqttPacket::PubAck(5)]);
        assert!(matches!(h.drain_events().as_slice(), [MqttEvent::Message(_)]));
    }

    #[test]
    fn subscribe_reports_granted_codes() {
        let mut h = connected(options());
        let request = Request::Subscribe(Subscribe::new(&[("a/#", QoS::AtLeastOnce)]).unwrap());
        let pid = submit(&mut h, 11, request);
        assert!(matches!(sent_packets(&mut h).as_slice(), [MqttPacket::Subscribe(_)]));
        h.inject(&[0x90, 0x03, 0x00, pid as u8, 0x01]);
        h.settle_at(1);
        match h.drain_events().as_slice() {
            [MqttEvent::Subscribed { id, result: Ok(codes) }] => {
                assert_eq!(*id, RequestId(11));
                assert_eq!(codes.as_slice(), &[SubAckReturnCode::Granted(QoS::AtLeastOnce)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn requests_wait_for_the_session() {
        let mut h = Harness::plain();
        h.open();
        h.net.take_written();
        h.chain.logic_mut().submit(RequestId(1), publish(QoS::AtMostOnce)).unwrap();
        let kick = h.chain.kick();
        h.with_cx(|chain, cx| chain.resume(cx, kick)).unwrap();
        assert!(h.net.written.is_empty());
        h.inject(&CONNACK);
        h.settle_at(1);
        assert!(matches!(sent_packets(&mut h).as_slice(), [MqttPacket::Publish(_)]));
    }

    #[test]
    fn refused_connack_fails_the_attempt() {
        let mut h = Harness::plain();
        h.open();
        h.inject(&[0x20, 0x02, 0x00, 0x05]);
        h.run_at(0);
        assert_eq!(h.conn.state, ConnectionState::OpenFailed);
        assert_eq!(
            h.drain_events(),
            [MqttEvent::ConnectFailed(MqttError::ConnectionRefused(
                ConnectReasonCode::NotAuthorized
            ))]
        );
    }

    #[test]
    fn missing_connack_times_out() {
        let mut h = Harness::plain();
        h.open();
        h.settle_at(10_000);
        assert_eq!(h.conn.state, ConnectionState::OpenFailed);
        assert_eq!(h.conn.last_error, Some(MqttError::Timeout));
    }

    #[test]
    fn graceful_close_sends_disconnect() {
        let mut h = connected(options());
        h.with_cx(|chain, cx| chain.close(cx)).unwrap();
        assert_eq!(sent_packets(&mut h), [MqttPacket::Disconnect]);
        assert_eq!(h.conn.state, ConnectionState::Closed);
        assert_eq!(h.conn.last_error, None);
        assert_eq!(h.drain_events(), [MqttEvent::Disconnected { reason: None }]);
    }

    #[test]
    fn connection_loss_keeps_qos1_and_fails_subscriptions() {
        let mut h = connected(options());
        submit(&mut h, 1, publish(QoS::AtLeastOnce));
        submit(&mut h, 2, Request::Subscribe(Subscribe::new(&[("a", QoS::AtMostOnce)]).unwrap()));
        h.settle_at(1);
        h.net.reset = true;
        h.settle_at(2);
        let events = h.drain_events();
        assert!(events.contains(&MqttEvent::Subscribed {
            id: RequestId(2),
            result: Err(MqttError::NotConnected)
        }));
        assert!(events.contains(&MqttEvent::Disconnected {
            reason: Some(MqttError::ConnectionReset)
        }));
        assert_eq!(h.chain.logic().pending(), 1);

        h.net.reset = false;
        h.net.take_written();
        h.open();
        sent_packets(&mut h);
        h.inject(&[0x20, 0x02, 0x01, 0x00]);
        h.settle_at(3);
        match sent_packets(&mut h).as_slice() {
            [MqttPacket::Publish(p)] => assert!(p.dup),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn packet_ids_skip_ids_in_use() {
        let mut logic = LogicLayer::new();
        let a = logic.submit(RequestId(1), publish(QoS::AtLeastOnce)).unwrap();
        let b = logic.submit(RequestId(2), publish(QoS::AtLeastOnce)).unwrap();
        assert_ne!(a, b);
        logic.next_packet_id = u16::MAX;
        let c = logic.submit(RequestId(3), publish(QoS::AtLeastOnce)).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        for id in 4..=8 {
            logic.submit(RequestId(id), publish(QoS::AtMostOnce)).unwrap();
        }
        assert_eq!(
            logic.submit(RequestId(9), publish(QoS::AtMostOnce)),
            Err(MqttError::OutOfResources)
        );
    }
}
