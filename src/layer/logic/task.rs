//! One resumable task per application request.
//!
//! A task owns its request until the request completes, and it completes
//! exactly once. Sending needs the logic layer's single writer slot, so a
//! task first waits for the slot, then for its packet to be written, then
//! for the acknowledgement that finishes the exchange.

use super::super::{LayerContext, Op, TimerKind};
use crate::coroutine::{Coroutine, ResumePoint, Step};
use crate::dispatcher::TimerId;
use crate::error::MqttError;
use crate::event::{GrantedQoS, MqttEvent, RequestId};
use crate::packet::{MqttPacket, Publish, QoS, Subscribe, Unsubscribe};
use crate::yield_until;

/// What the application asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Publish(Publish),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
}

impl Request {
    /// Whether the exchange uses a packet identifier and an acknowledgement.
    pub fn needs_ack(&self) -> bool {
        match self {
            Request::Publish(p) => p.qos != QoS::AtMostOnce,
            Request::Subscribe(_) | Request::Unsubscribe(_) => true,
        }
    }

    pub(crate) fn set_packet_id(&mut self, id: u16) {
        match self {
            // QoS 0 publishes carry no identifier on the wire.
            Request::Publish(p) => p.packet_id = (id != 0).then_some(id),
            Request::Subscribe(s) => s.packet_id = id,
            Request::Unsubscribe(u) => u.packet_id = id,
        }
    }

    fn packet(&self, dup: bool) -> MqttPacket {
        match self {
            Request::Publish(p) => {
                let mut publish = p.clone();
                publish.dup = dup && p.qos != QoS::AtMostOnce;
                MqttPacket::Publish(publish)
            }
            Request::Subscribe(s) => MqttPacket::Subscribe(s.clone()),
            Request::Unsubscribe(u) => MqttPacket::Unsubscribe(u.clone()),
        }
    }
}

/// Acknowledgements routed to a task by packet identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Ack {
    PubAck,
    PubRec,
    PubComp,
    SubAck(GrantedQoS),
    UnsubAck,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskEvent {
    /// The writer slot is free.
    Writable,
    /// The packet handed out last has reached the socket.
    Written,
    Ack(Ack),
    /// The retransmission timer fired.
    Timeout,
}

/// What a suspended task waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskWait {
    Writer,
    /// Send this packet; resume with [`TaskEvent::Written`].
    Send(MqttPacket),
    Written,
    Ack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPoint {
    Start,
    AwaitWritten,
    AwaitAck,
    Release,
    AwaitReleaseWritten,
    AwaitComplete,
}

impl ResumePoint for TaskPoint {
    const START: Self = TaskPoint::Start;
}

pub struct RequestTask {
    id: RequestId,
    request: Request,
    /// Zero for QoS 0 publishes.
    packet_id: u16,
    co: Coroutine<TaskPoint>,
    retries: u8,
    timer: Option<TimerId>,
    sent: bool,
    released: bool,
    /// Acknowledgement that arrived while the task was not waiting for one.
    early: Option<Ack>,
    granted: GrantedQoS,
}

impl RequestTask {
    pub(crate) fn new(id: RequestId, request: Request, packet_id: u16) -> Self {
        Self {
            id,
            request,
            packet_id,
            co: Coroutine::new(),
            retries: 0,
            timer: None,
            sent: false,
            released: false,
            early: None,
            granted: GrantedQoS::new(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn packet_id(&self) -> u16 {
        self.packet_id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Retransmissions so far.
    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub(crate) fn wants_writer(&self) -> bool {
        matches!(self.co.point(), TaskPoint::Start | TaskPoint::Release)
    }

    /// Whether `ack` is the first acknowledgement this request waits for.
    fn expects(&self, ack: &Ack) -> bool {
        match (&self.request, ack) {
            (Request::Publish(p), Ack::PubAck) => p.qos == QoS::AtLeastOnce,
            (Request::Publish(p), Ack::PubRec) => p.qos == QoS::ExactlyOnce,
            (Request::Subscribe(_), Ack::SubAck(_)) => true,
            (Request::Unsubscribe(_), Ack::UnsubAck) => true,
            _ => false,
        }
    }

    /// Keeps an acknowledgement for a packet already sent once, so a
    /// retransmission in progress does not lose it.
    fn stash(&mut self, ack: Ack) {
        let keep = match self.co.point() {
            TaskPoint::Start | TaskPoint::AwaitWritten => self.sent && self.expects(&ack),
            TaskPoint::Release | TaskPoint::AwaitReleaseWritten => self.released && ack == Ack::PubComp,
            TaskPoint::AwaitAck | TaskPoint::AwaitComplete => false,
        };
        if keep {
            trace!("packet {} acknowledged before its retransmission finished", self.packet_id);
            self.early = Some(ack);
        }
    }

    fn arm(&mut self, cx: &mut LayerContext<'_>) -> Result<(), MqttError> {
        let delay = cx.conn.options.ack_timeout();
        let id = cx.timer(delay, Op::Push, TimerKind::AckTimeout(self.packet_id))?;
        self.timer = Some(id);
        Ok(())
    }

    /// Counts a retransmission, or fails once the budget is spent.
    fn retry(&mut self, cx: &mut LayerContext<'_>) -> Result<(), MqttError> {
        self.timer = None;
        if self.retries >= cx.conn.options.max_retries() {
            warn!("packet {} unacknowledged after {} retries", self.packet_id, self.retries);
            return Err(MqttError::RetryLimitExceeded);
        }
        self.retries += 1;
        debug!("retransmitting packet {}, attempt {}", self.packet_id, self.retries);
        Ok(())
    }

    pub(crate) fn step(
        &mut self,
        cx: &mut LayerContext<'_>,
        event: TaskEvent,
    ) -> Step<TaskWait, Result<(), MqttError>> {
        let writable = event == TaskEvent::Writable;
        let written = event == TaskEvent::Written;
        let mut event = Some(event);
        if let Some(TaskEvent::Ack(ack)) = &event {
            if !matches!(self.co.point(), TaskPoint::AwaitAck | TaskPoint::AwaitComplete) {
                let ack = ack.clone();
                event = None;
                self.stash(ack);
            }
        }
        loop {
            match self.co.point() {
                TaskPoint::Start if self.early.is_some() => {
                    event = self.early.take().map(TaskEvent::Ack);
                    self.co.jump(TaskPoint::AwaitAck);
                }
                TaskPoint::Start => {
                    yield_until!(self.co, TaskPoint::Start, writable, Step::Suspend(TaskWait::Writer));
                    let packet = self.request.packet(self.sent);
                    self.sent = true;
                    return self.co.suspend(TaskPoint::AwaitWritten, TaskWait::Send(packet));
                }
                TaskPoint::AwaitWritten => {
                    yield_until!(self.co, TaskPoint::AwaitWritten, written, Step::Suspend(TaskWait::Written));
                    if !self.request.needs_ack() {
                        return self.co.complete(Ok(()));
                    }
                    if let Some(ack) = self.early.take() {
                        event = Some(TaskEvent::Ack(ack));
                        self.co.jump(TaskPoint::AwaitAck);
                        continue;
                    }
                    if let Err(err) = self.arm(cx) {
                        return self.co.complete(Err(err));
                    }
                    return self.co.suspend(TaskPoint::AwaitAck, TaskWait::Ack);
                }
                TaskPoint::AwaitAck => match event.take() {
                    Some(TaskEvent::Timeout) => {
                        if let Err(err) = self.retry(cx) {
                            return self.co.complete(Err(err));
                        }
                        self.co.jump(TaskPoint::Start);
                    }
                    Some(TaskEvent::Ack(ack)) if self.expects(&ack) => {
                        cx.cancel(&mut self.timer);
                        match ack {
                            Ack::PubRec => {
                                self.retries = 0;
                                self.co.jump(TaskPoint::Release);
                            }
                            Ack::SubAck(codes) => {
                                self.granted = codes;
                                return self.co.complete(Ok(()));
                            }
                            _ => return self.co.complete(Ok(())),
                        }
                    }
                    Some(TaskEvent::Ack(_)) => {
                        warn!("unexpected acknowledgement for packet {}", self.packet_id);
                        return self.co.suspend(TaskPoint::AwaitAck, TaskWait::Ack);
                    }
                    _ => return self.co.suspend(TaskPoint::AwaitAck, TaskWait::Ack),
                },
                TaskPoint::Release if self.early.is_some() => {
                    self.early = None;
                    return self.co.complete(Ok(()));
                }
                TaskPoint::Release => {
                    yield_until!(self.co, TaskPoint::Release, writable, Step::Suspend(TaskWait::Writer));
                    self.released = true;
                    return self.co.suspend(
                        TaskPoint::AwaitReleaseWritten,
                        TaskWait::Send(MqttPacket::PubRel(self.packet_id)),
                    );
                }
                TaskPoint::AwaitReleaseWritten => {
                    yield_until!(
                        self.co,
                        TaskPoint::AwaitReleaseWritten,
                        written,
                        Step::Suspend(TaskWait::Written)
                    );
                    if self.early.take().is_some() {
                        return self.co.complete(Ok(()));
                    }
                    if let Err(err) = self.arm(cx) {
                        return self.co.complete(Err(err));
                    }
                    return self.co.suspend(TaskPoint::AwaitComplete, TaskWait::Ack);
                }
                TaskPoint::AwaitComplete => match event.take() {
                    Some(TaskEvent::Timeout) => {
                        if let Err(err) = self.retry(cx) {
                            return self.co.complete(Err(err));
                        }
                        self.co.jump(TaskPoint::Release);
                    }
                    Some(TaskEvent::Ack(Ack::PubComp)) => {
                        cx.cancel(&mut self.timer);
                        return self.co.complete(Ok(()));
                    }
                    _ => return self.co.suspend(TaskPoint::AwaitComplete, TaskWait::Ack),
                },
            }
        }
    }

    /// Prepares the task for the next connection. Returns false when the
    /// request cannot survive the loss and must fail.
    pub(crate) fn interrupt(&mut self, cx: &mut LayerContext<'_>) -> bool {
        cx.cancel(&mut self.timer);
        match self.co.point() {
            TaskPoint::Start => true,
            TaskPoint::Release | TaskPoint::AwaitReleaseWritten | TaskPoint::AwaitComplete => {
                self.co.reset();
                self.co.jump(TaskPoint::Release);
                true
            }
            TaskPoint::AwaitWritten | TaskPoint::AwaitAck => match &self.request {
                Request::Publish(p) if p.qos != QoS::AtMostOnce => {
                    self.co.reset();
                    true
                }
                _ => false,
            },
        }
    }

    /// The completion event for `result`.
    pub fn into_event(self, result: Result<(), MqttError>) -> MqttEvent {
        let id = self.id;
        match self.request {
            Request::Publish(_) => MqttEvent::Published { id, result },
            Request::Subscribe(_) => MqttEvent::Subscribed {
                id,
                result: result.map(|()| self.granted),
            },
            Request::Unsubscribe(_) => MqttEvent::Unsubscribed { id, result },
        }
    }
}
