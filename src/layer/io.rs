//! Socket layer at the wire end of every chain.
//!
//! Owns the socket and an ordered queue of descriptors waiting to be written.
//! Connecting is non-blocking: an in-progress connect suspends until the
//! dispatcher reports completion or the connect timer fires. With a network
//! timeout configured, a socket that moves no data for that long is closed.

use heapless::Deque;

use super::{Flow, Layer, LayerContext, Op, Payload, TimerKind};
use crate::bsp::{Interest, NetError, SocketHandle};
use crate::coroutine::{Coroutine, ResumePoint};
use crate::data::DataDesc;
use crate::dispatcher::TimerId;
use crate::error::{MqttError, Status};
use crate::{yield_now, yield_until};

/// Descriptors that may wait for the socket at once.
pub const WRITE_QUEUE_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectPoint {
    Start,
    AwaitConnect,
}

impl ResumePoint for ConnectPoint {
    const START: Self = ConnectPoint::Start;
}

pub struct IoLayer {
    socket: Option<SocketHandle>,
    co: Coroutine<ConnectPoint>,
    connect_timer: Option<TimerId>,
    idle_timer: Option<TimerId>,
    connected: bool,
    queue: Deque<DataDesc, WRITE_QUEUE_LEN>,
}

impl Default for IoLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl IoLayer {
    pub const fn new() -> Self {
        Self {
            socket: None,
            co: Coroutine::new(),
            connect_timer: None,
            idle_timer: None,
            connected: false,
            queue: Deque::new(),
        }
    }

    pub fn socket(&self) -> Option<SocketHandle> {
        self.socket
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn fail(err: MqttError) -> Flow {
        Flow::Here(Op::CloseExternally, Payload::None, Status::Failed(err))
    }

    fn connect_step(&mut self, cx: &mut LayerContext<'_>, socket: SocketHandle, status: Status) -> Flow {
        loop {
            match self.co.point() {
                ConnectPoint::Start => {
                    let options = &cx.conn.options;
                    match cx.net.connect(socket, options.host(), options.port()) {
                        Ok(()) => return self.established(cx),
                        Err(NetError::InProgress) => {}
                        Err(err) => {
                            warn!("connect failed: {:?}", err);
                            self.co.reset();
                            return Self::fail(err.into());
                        }
                    }
                    if let Err(err) = cx.watch(socket, Interest::Connect, Op::Connect) {
                        return Self::fail(err);
                    }
                    match cx.timer(cx.conn.options.connect_timeout(), Op::Connect, TimerKind::Connect) {
                        Ok(id) => self.connect_timer = Some(id),
                        Err(err) => return Self::fail(err),
                    }
                    trace!("connect in progress");
                    yield_now!(self.co, ConnectPoint::AwaitConnect, Flow::Done(Status::WantWrite));
                }
                ConnectPoint::AwaitConnect => {
                    if status == Status::Timeout {
                        self.connect_timer = None;
                        self.co.reset();
                        warn!("connect timed out");
                        return Self::fail(MqttError::Timeout);
                    }
                    yield_until!(
                        self.co,
                        ConnectPoint::AwaitConnect,
                        status == Status::Ok,
                        Flow::Done(Status::WantWrite)
                    );
                    cx.cancel(&mut self.connect_timer);
                    return match cx.net.connection_check(socket) {
                        Ok(()) => self.established(cx),
                        Err(err) => {
                            self.co.reset();
                            warn!("connect failed: {:?}", err);
                            Self::fail(err.into())
                        }
                    };
                }
            }
        }
    }

    fn established(&mut self, cx: &mut LayerContext<'_>) -> Flow {
        self.co.reset();
        self.connected = true;
        debug!("socket connected");
        if let Err(err) = self.touch(cx) {
            return Self::fail(err);
        }
        Flow::Prev(Op::Connect, Payload::None, Status::Ok)
    }

    /// Restarts the network timeout after data moved.
    fn touch(&mut self, cx: &mut LayerContext<'_>) -> Result<(), MqttError> {
        let Some(limit) = cx.conn.options.network_timeout() else {
            return Ok(());
        };
        if let Some(id) = self.idle_timer {
            if cx.sched.restart(id, limit).is_ok() {
                return Ok(());
            }
        }
        self.idle_timer = Some(cx.timer(limit, Op::Pull, TimerKind::NetworkIdle)?);
        Ok(())
    }

    /// Writes queued descriptors until the socket pushes back.
    fn flush(&mut self, cx: &mut LayerContext<'_>, socket: SocketHandle) -> Flow {
        let mut written = 0usize;
        let mut moved = false;
        let mut blocked = false;
        while let Some(front) = self.queue.front_mut() {
            match cx.net.write(socket, front.remaining()) {
                Ok(0) | Err(NetError::Busy) => {
                    blocked = true;
                    break;
                }
                Ok(n) => {
                    moved = true;
                    front.advance(n);
                    if front.is_consumed() {
                        self.queue.pop_front();
                        written += 1;
                    }
                }
                Err(err) => {
                    warn!("write failed: {:?}", err);
                    return Self::fail(err.into());
                }
            }
        }
        if moved {
            if let Err(err) = self.touch(cx) {
                return Self::fail(err);
            }
        }
        if blocked {
            trace!("socket busy, {} queued", self.queue.len());
            if let Err(err) = cx.watch(socket, Interest::Write, Op::Push) {
                return Self::fail(err);
            }
        }
        if written == 0 {
            return Flow::Done(Status::WantWrite);
        }
        // One notice per descriptor; the first travels now.
        for _ in 1..written {
            if let Err(err) = cx.post(Op::Push, super::Wake::Written) {
                return Self::fail(err);
            }
        }
        Flow::Prev(Op::Push, Payload::None, Status::Written)
    }
}

impl Layer for IoLayer {
    fn init(&mut self, cx: &mut LayerContext<'_>, _data: Payload, _status: Status) -> Flow {
        cx.cancel(&mut self.idle_timer);
        self.co.reset();
        self.connected = false;
        self.queue.clear();
        let socket = match cx.net.create_socket() {
            Ok(socket) => socket,
            Err(err) => return Self::fail(err.into()),
        };
        let on_read = cx.resume(Op::Pull, super::Wake::Io);
        if let Err(err) = cx.sched.register_socket(socket, on_read) {
            // The chain skips this layer's release when init fails.
            self.socket = None;
            cx.net.close(socket);
            return Self::fail(err);
        }
        self.socket = Some(socket);
        Flow::Here(Op::Connect, Payload::None, Status::Ok)
    }

    fn connect(&mut self, cx: &mut LayerContext<'_>, _data: Payload, status: Status) -> Flow {
        match self.socket {
            Some(socket) => self.connect_step(cx, socket, status),
            None => Self::fail(MqttError::NotConnected),
        }
    }

    fn push(&mut self, cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        if status == Status::Written {
            return Flow::Prev(Op::Push, Payload::None, Status::Written);
        }
        let Some(socket) = self.socket.filter(|_| self.connected) else {
            return Flow::Prev(Op::Push, Payload::None, Status::Failed(MqttError::NotConnected));
        };
        match data {
            Payload::Bytes(desc) => {
                if self.queue.push_back(desc).is_err() {
                    return Self::fail(MqttError::OutOfResources);
                }
            }
            Payload::None => {}
            _ => {
                error!("socket layer can only write bytes");
                return Self::fail(MqttError::InvalidArgument);
            }
        }
        self.flush(cx, socket)
    }

    fn pull(&mut self, cx: &mut LayerContext<'_>, data: Payload, _status: Status) -> Flow {
        if let Payload::Timer(TimerKind::NetworkIdle) = data {
            self.idle_timer = None;
            warn!("no data moved within the network timeout");
            return Self::fail(MqttError::Timeout);
        }
        let Some(socket) = self.socket.filter(|_| self.connected) else {
            return Flow::Done(Status::WantRead);
        };
        let mut desc = DataDesc::new();
        match desc.fill_with(|buf| cx.net.read(socket, buf)) {
            Ok(0) => {
                debug!("peer closed the connection");
                Self::fail(MqttError::ConnectionReset)
            }
            Ok(n) => {
                trace!("read {} bytes", n);
                if let Err(err) = self.touch(cx) {
                    return Self::fail(err);
                }
                Flow::Prev(Op::Pull, Payload::Bytes(desc), Status::Ok)
            }
            Err(NetError::Busy) => Flow::Done(Status::WantRead),
            Err(err) => {
                debug!("read failed: {:?}", err);
                Self::fail(MqttError::ConnectionReset)
            }
        }
    }

    fn close(&mut self, _cx: &mut LayerContext<'_>, _data: Payload, status: Status) -> Flow {
        Flow::Here(Op::CloseExternally, Payload::None, status)
    }

    fn close_externally(&mut self, cx: &mut LayerContext<'_>, _data: Payload, status: Status) -> Flow {
        cx.cancel(&mut self.connect_timer);
        cx.cancel(&mut self.idle_timer);
        if let Some(socket) = self.socket.take() {
            cx.sched.unregister_socket(socket);
            cx.net.close(socket);
        }
        self.queue.clear();
        self.co.reset();
        self.connected = false;
        Flow::Prev(Op::CloseExternally, Payload::None, status)
    }
}
