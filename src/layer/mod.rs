//! # Layer Chain
//!
//! A connection is an ordered chain of protocol layers. Index 0 is the
//! application end (the MQTT logic), the last index is the wire end (the
//! socket). Every layer implements the same six operations through the
//! [`Layer`] trait and answers each call with a [`Flow`] telling the chain
//! where the operation goes next:
//!
//! - `init` travels application to wire; the wire layer then starts `connect`,
//!   which travels back wire to application once the transport is up.
//! - `push` moves data toward the wire. `Written` notices and write failures
//!   come back through `push` toward the application.
//! - `pull` moves inbound data toward the application.
//! - `close` travels toward the wire, where the I/O layer turns it into
//!   `close_externally`. That operation then visits every layer exactly once
//!   on its way back to the application.
//!
//! The chain refuses to run anything but `init` on a layer whose `init` has
//! not run, and discards dispatcher tasks that belong to an earlier
//! connection attempt.

pub mod codec;
pub mod gateway;
pub mod io;
pub mod logic;
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::CodecLayer;
pub use gateway::GatewayLayer;
pub use io::IoLayer;
pub use logic::LogicLayer;
pub use tls::TlsLayer;

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::bsp::{Interest, NetworkBsp, NoTls, SocketHandle, TlsProvider};
use crate::client::MqttOptions;
use crate::data::DataDesc;
use crate::dispatcher::{EventDispatcher, TimerId};
use crate::error::{MqttError, Status};
use crate::event::EventHandler;
use crate::packet::MqttPacket;

/// Most layers a chain can hold.
pub const MAX_LAYERS: usize = 4;

/// The six layer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Op {
    Init,
    Connect,
    Push,
    Pull,
    Close,
    CloseExternally,
}

/// Timers a layer can arm. Handed back to the layer as [`Payload::Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    KeepAlive,
    PingTimeout,
    /// Retransmission timer of the request holding this packet identifier.
    AckTimeout(u16),
    ConnAck,
    Connect,
    /// No data moved on the socket for the network timeout.
    NetworkIdle,
}

/// Why a layer is being resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wake {
    /// Socket readiness or an explicit re-post.
    Io,
    Timer(TimerKind),
    /// A further descriptor finished writing.
    Written,
}

/// A dispatcher task that re-enters one layer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Resume {
    /// Chain epoch the task was created in.
    pub epoch: u16,
    pub layer: u8,
    pub op: Op,
    pub wake: Wake,
}

/// Data handed along with an operation. Ownership moves with the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Bytes(DataDesc),
    Packet(MqttPacket),
    Timer(TimerKind),
}

/// What a layer asks the chain to do after an operation.
#[derive(Debug)]
pub enum Flow {
    /// Handled locally; the chain stops here.
    Done(Status),
    /// Forward to the neighbour toward the wire.
    Next(Op, Payload, Status),
    /// Forward to the neighbour toward the application.
    Prev(Op, Payload, Status),
    /// Run another operation on the same layer.
    Here(Op, Payload, Status),
}

impl Flow {
    pub fn status(&self) -> Status {
        match self {
            Flow::Done(status)
            | Flow::Next(_, _, status)
            | Flow::Prev(_, _, status)
            | Flow::Here(_, _, status) => *status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Uninitialized,
    Opening,
    Opened,
    Closing,
    Closed,
    OpenFailed,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Opening | ConnectionState::Opened | ConnectionState::Closing
        )
    }
}

/// Per-connection context shared by every layer of a chain.
#[derive(Debug, Clone)]
pub struct ConnectionShared {
    pub options: MqttOptions,
    pub state: ConnectionState,
    /// Status the last connection ended with.
    pub last_error: Option<MqttError>,
}

impl ConnectionShared {
    pub fn new(options: MqttOptions) -> Self {
        Self {
            options,
            state: ConnectionState::Uninitialized,
            last_error: None,
        }
    }
}

/// The dispatcher operations a layer may use.
pub trait Scheduler {
    fn now(&self) -> Instant;
    fn post(&mut self, task: Resume) -> Result<(), MqttError>;
    fn execute_in(&mut self, delay: Duration, task: Resume) -> Result<TimerId, MqttError>;
    fn restart(&mut self, id: TimerId, delay: Duration) -> Result<(), MqttError>;
    fn cancel(&mut self, id: TimerId) -> bool;
    fn register_socket(&mut self, socket: SocketHandle, on_read: Resume) -> Result<(), MqttError>;
    fn continue_when(
        &mut self,
        socket: SocketHandle,
        interest: Interest,
        task: Resume,
    ) -> Result<(), MqttError>;
    fn unregister_socket(&mut self, socket: SocketHandle) -> bool;
}

impl<T, const TASKS: usize, const TIMERS: usize, const SOCKETS: usize, const HANDLES: usize>
    Scheduler for EventDispatcher<T, TASKS, TIMERS, SOCKETS, HANDLES>
where
    T: From<Resume> + Clone,
{
    fn now(&self) -> Instant {
        EventDispatcher::now(self)
    }

    fn post(&mut self, task: Resume) -> Result<(), MqttError> {
        EventDispatcher::post(self, T::from(task))
    }

    fn execute_in(&mut self, delay: Duration, task: Resume) -> Result<TimerId, MqttError> {
        EventDispatcher::execute_in(self, delay, T::from(task))
    }

    fn restart(&mut self, id: TimerId, delay: Duration) -> Result<(), MqttError> {
        EventDispatcher::restart(self, id, delay)
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        EventDispatcher::cancel(self, id).is_some()
    }

    fn register_socket(&mut self, socket: SocketHandle, on_read: Resume) -> Result<(), MqttError> {
        EventDispatcher::register_socket(self, socket, T::from(on_read))
    }

    fn continue_when(
        &mut self,
        socket: SocketHandle,
        interest: Interest,
        task: Resume,
    ) -> Result<(), MqttError> {
        EventDispatcher::continue_when(self, socket, interest, T::from(task))
    }

    fn unregister_socket(&mut self, socket: SocketHandle) -> bool {
        EventDispatcher::unregister_socket(self, socket)
    }
}

/// Everything a layer operation may touch besides its own state.
pub struct LayerContext<'a> {
    pub conn: &'a mut ConnectionShared,
    pub sched: &'a mut dyn Scheduler,
    pub net: &'a mut dyn NetworkBsp,
    pub events: &'a mut dyn EventHandler,
    pub now: Instant,
    this: usize,
    epoch: u16,
}

impl<'a> LayerContext<'a> {
    pub fn new(
        conn: &'a mut ConnectionShared,
        sched: &'a mut dyn Scheduler,
        net: &'a mut dyn NetworkBsp,
        events: &'a mut dyn EventHandler,
    ) -> Self {
        let now = sched.now();
        Self {
            conn,
            sched,
            net,
            events,
            now,
            this: 0,
            epoch: 0,
        }
    }

    /// Index of the layer currently running.
    pub fn index(&self) -> usize {
        self.this
    }

    /// A task that re-enters `op` on the running layer.
    pub fn resume(&self, op: Op, wake: Wake) -> Resume {
        Resume {
            epoch: self.epoch,
            layer: self.this as u8,
            op,
            wake,
        }
    }

    pub fn post(&mut self, op: Op, wake: Wake) -> Result<(), MqttError> {
        let task = self.resume(op, wake);
        self.sched.post(task)
    }

    /// Arms a timer that resumes `op` on the running layer with
    /// [`Payload::Timer`] and [`Status::Timeout`].
    pub fn timer(&mut self, delay: Duration, op: Op, kind: TimerKind) -> Result<TimerId, MqttError> {
        let task = self.resume(op, Wake::Timer(kind));
        self.sched.execute_in(delay, task)
    }

    /// Cancels the timer in `slot`, if any.
    pub fn cancel(&mut self, slot: &mut Option<TimerId>) {
        if let Some(id) = slot.take() {
            self.sched.cancel(id);
        }
    }

    /// Replaces the socket watch with a one-shot wait for `interest`.
    pub fn watch(&mut self, socket: SocketHandle, interest: Interest, op: Op) -> Result<(), MqttError> {
        let task = self.resume(op, Wake::Io);
        self.sched.continue_when(socket, interest, task)
    }
}

/// One protocol stage of a chain.
///
/// The provided methods forward every operation in its natural direction, so
/// a layer only overrides what it handles.
pub trait Layer {
    fn init(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        Flow::Next(Op::Init, data, status)
    }

    fn connect(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        Flow::Prev(Op::Connect, data, status)
    }

    fn push(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        if matches!(status, Status::Written | Status::Failed(_)) {
            Flow::Prev(Op::Push, data, status)
        } else {
            Flow::Next(Op::Push, data, status)
        }
    }

    fn pull(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        Flow::Prev(Op::Pull, data, status)
    }

    fn close(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        Flow::Next(Op::Close, data, status)
    }

    fn close_externally(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        Flow::Prev(Op::CloseExternally, data, status)
    }
}

fn apply(layer: &mut dyn Layer, cx: &mut LayerContext<'_>, op: Op, data: Payload, status: Status) -> Flow {
    match op {
        Op::Init => layer.init(cx, data, status),
        Op::Connect => layer.connect(cx, data, status),
        Op::Push => layer.push(cx, data, status),
        Op::Pull => layer.pull(cx, data, status),
        Op::Close => layer.close(cx, data, status),
        Op::CloseExternally => layer.close_externally(cx, data, status),
    }
}

/// Which layers a connection is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChainScheme {
    /// logic, codec, io
    #[default]
    Plain,
    /// logic, codec, tls, io
    Tls,
    /// logic, codec, gateway, io
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum LayerKind {
    Logic,
    Codec,
    Tls,
    Gateway,
    Io,
}

pub struct LayerChain<T: TlsProvider = NoTls> {
    order: Vec<LayerKind, MAX_LAYERS>,
    initialized: [bool; MAX_LAYERS],
    epoch: u16,
    logic: LogicLayer,
    codec: CodecLayer,
    tls: Option<TlsLayer<T>>,
    gateway: GatewayLayer,
    io: IoLayer,
    /// Every layer operation run, in order.
    #[cfg(test)]
    visits: std::vec::Vec<(usize, Op)>,
}

impl<T: TlsProvider> LayerChain<T> {
    /// Builds the chain for `scheme`. A TLS chain requires a provider.
    pub fn new(scheme: ChainScheme, provider: Option<T>) -> Result<Self, MqttError> {
        let middle = match scheme {
            ChainScheme::Plain => None,
            ChainScheme::Tls => Some(LayerKind::Tls),
            ChainScheme::Gateway => Some(LayerKind::Gateway),
        };
        let tls = match (scheme, provider) {
            (ChainScheme::Tls, None) => return Err(MqttError::Tls(crate::bsp::TlsError::Unsupported)),
            (_, provider) => provider.map(TlsLayer::new),
        };
        let mut order = Vec::new();
        for kind in [Some(LayerKind::Logic), Some(LayerKind::Codec), middle, Some(LayerKind::Io)]
            .into_iter()
            .flatten()
        {
            order.push(kind).map_err(|_| MqttError::OutOfResources)?;
        }
        Ok(Self {
            order,
            initialized: [false; MAX_LAYERS],
            epoch: 0,
            logic: LogicLayer::new(),
            codec: CodecLayer::new(),
            tls,
            gateway: GatewayLayer::new(),
            io: IoLayer::new(),
            #[cfg(test)]
            visits: std::vec::Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn is_initialized(&self, at: usize) -> bool {
        self.initialized.get(at).copied().unwrap_or(false)
    }

    pub fn logic(&self) -> &LogicLayer {
        &self.logic
    }

    pub fn logic_mut(&mut self) -> &mut LogicLayer {
        &mut self.logic
    }

    /// A task that kicks the logic layer's writer.
    pub fn kick(&self) -> Resume {
        Resume {
            epoch: self.epoch,
            layer: 0,
            op: Op::Push,
            wake: Wake::Io,
        }
    }

    fn layer_at(&mut self, at: usize) -> Option<&mut dyn Layer> {
        match self.order.get(at)? {
            LayerKind::Logic => Some(&mut self.logic),
            LayerKind::Codec => Some(&mut self.codec),
            LayerKind::Tls => self.tls.as_mut().map(|l| l as &mut dyn Layer),
            LayerKind::Gateway => Some(&mut self.gateway),
            LayerKind::Io => Some(&mut self.io),
        }
    }

    /// Starts a new connection attempt.
    pub fn open(&mut self, cx: &mut LayerContext<'_>) -> Result<(), MqttError> {
        if cx.conn.state.is_active() {
            return Err(MqttError::InvalidArgument);
        }
        self.epoch = self.epoch.wrapping_add(1);
        self.initialized = [false; MAX_LAYERS];
        cx.conn.state = ConnectionState::Opening;
        cx.conn.last_error = None;
        debug!("opening chain, epoch {}", self.epoch);
        self.invoke(cx, 0, Op::Init, Payload::None, Status::Ok)
    }

    /// Application-initiated close. A no-op when nothing is open.
    pub fn close(&mut self, cx: &mut LayerContext<'_>) -> Result<(), MqttError> {
        match cx.conn.state {
            ConnectionState::Opening => {}
            ConnectionState::Opened => cx.conn.state = ConnectionState::Closing,
            _ => return Ok(()),
        }
        self.invoke(cx, 0, Op::Close, Payload::None, Status::Ok)
    }

    /// Runs a dispatcher task. Tasks from an earlier epoch are dropped.
    pub fn resume(&mut self, cx: &mut LayerContext<'_>, task: Resume) -> Result<(), MqttError> {
        if task.epoch != self.epoch {
            trace!("dropping stale {:?} for layer {}", task.op, task.layer);
            return Ok(());
        }
        let (data, status) = match task.wake {
            Wake::Io => (Payload::None, Status::Ok),
            Wake::Timer(kind) => (Payload::Timer(kind), Status::Timeout),
            Wake::Written => (Payload::None, Status::Written),
        };
        self.invoke(cx, task.layer as usize, task.op, data, status)
    }

    /// Runs `op` on layer `at` and follows the returned flows until one ends.
    pub fn invoke(
        &mut self,
        cx: &mut LayerContext<'_>,
        at: usize,
        op: Op,
        data: Payload,
        status: Status,
    ) -> Result<(), MqttError> {
        let (mut at, mut op, mut data, mut status) = (at, op, data, status);
        cx.epoch = self.epoch;
        loop {
            if at >= self.order.len() {
                return Err(MqttError::InvalidArgument);
            }
            match op {
                Op::Init => {}
                // A layer whose init failed has nothing to release.
                Op::CloseExternally if !self.initialized[at] => {
                    trace!("layer {} was never initialized, passing close on", at);
                    if at == 0 {
                        self.surface(cx, op, status);
                        return Ok(());
                    }
                    at -= 1;
                    continue;
                }
                _ if !self.initialized[at] => {
                    error!("{:?} reached layer {} before init", op, at);
                    return Err(MqttError::LayerNotInitialized);
                }
                Op::CloseExternally => self.initialized[at] = false,
                _ => {}
            }
            cx.this = at;
            #[cfg(test)]
            self.visits.push((at, op));
            let Some(layer) = self.layer_at(at) else {
                return Err(MqttError::InvalidArgument);
            };
            let flow = apply(layer, cx, op, data, status);
            if op == Op::Init && !Self::init_failed(&flow) {
                self.initialized[at] = true;
            }
            match flow {
                Flow::Done(done) => {
                    if let Status::Failed(err) = done {
                        debug!("{:?} ended at layer {} with {:?}", op, at, err);
                    }
                    return Ok(());
                }
                Flow::Here(o, d, s) => (op, data, status) = (o, d, s),
                Flow::Next(o, _, _) if at + 1 == self.order.len() => {
                    error!("{:?} ran past the wire end", o);
                    return Err(MqttError::InvalidArgument);
                }
                Flow::Next(o, d, s) => {
                    at += 1;
                    (op, data, status) = (o, d, s);
                }
                Flow::Prev(o, _, s) if at == 0 => {
                    self.surface(cx, o, s);
                    return Ok(());
                }
                Flow::Prev(o, d, s) => {
                    at -= 1;
                    (op, data, status) = (o, d, s);
                }
            }
        }
    }

    fn init_failed(flow: &Flow) -> bool {
        match flow {
            Flow::Done(Status::Failed(_)) => true,
            Flow::Here(Op::CloseExternally, _, _) | Flow::Prev(Op::CloseExternally, _, _) => true,
            _ => false,
        }
    }

    /// An operation left the application end of the chain.
    fn surface(&mut self, cx: &mut LayerContext<'_>, op: Op, status: Status) {
        match op {
            Op::CloseExternally => {
                cx.conn.state = match cx.conn.state {
                    ConnectionState::Opening => ConnectionState::OpenFailed,
                    _ => ConnectionState::Closed,
                };
                cx.conn.last_error = status.error();
                // Tasks still queued for the old connection become stale.
                self.epoch = self.epoch.wrapping_add(1);
                info!("connection closed: {:?}", status);
            }
            Op::Connect => cx.conn.state = ConnectionState::Opened,
            _ => trace!("{:?} surfaced with {:?}", op, status),
        }
    }

    /// Releases every initialized layer, wire end first, without network
    /// traffic.
    pub fn teardown(&mut self, cx: &mut LayerContext<'_>) {
        cx.epoch = self.epoch;
        for at in (0..self.order.len()).rev() {
            if !self.initialized[at] {
                continue;
            }
            self.initialized[at] = false;
            cx.this = at;
            #[cfg(test)]
            self.visits.push((at, Op::CloseExternally));
            if let Some(layer) = self.layer_at(at) {
                if let Status::Failed(err) = layer.close_externally(cx, Payload::None, Status::Ok).status() {
                    warn!("layer {} failed to release: {:?}", at, err);
                }
            }
        }
        if cx.conn.state.is_active() {
            cx.conn.state = ConnectionState::Closed;
        }
        self.epoch = self.epoch.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use crate::bsp::NetError;

    #[test]
    fn schemes_build_in_application_to_wire_order() {
        let plain = LayerChain::<NoTls>::new(ChainScheme::Plain, None).unwrap();
        assert_eq!(plain.order.as_slice(), &[LayerKind::Logic, LayerKind::Codec, LayerKind::Io]);
        let gw = LayerChain::<NoTls>::new(ChainScheme::Gateway, None).unwrap();
        assert_eq!(gw.order[2], LayerKind::Gateway);
        assert!(LayerChain::<NoTls>::new(ChainScheme::Tls, None).is_err());
        let tls = LayerChain::new(ChainScheme::Tls, Some(NoTls)).unwrap();
        assert_eq!(tls.len(), 4);
    }

    #[test]
    fn operations_before_init_are_fatal() {
        let mut h = Harness::plain();
        let res = h.with_cx(|chain, cx| chain.invoke(cx, 1, Op::Push, Payload::None, Status::Ok));
        assert_eq!(res, Err(MqttError::LayerNotInitialized));
    }

    #[test]
    fn open_initializes_every_layer_and_connects() {
        let mut h = Harness::plain();
        h.open();
        assert!((0..3).all(|at| h.chain.is_initialized(at)));
        assert_eq!(h.conn.state, ConnectionState::Opening);
        // CONNECT went out.
        assert_eq!(h.net.written.len(), 1);
        assert_eq!(h.net.written[0][0], 0x10);
    }

    fn releases(chain: &LayerChain) -> std::vec::Vec<usize> {
        chain
            .visits
            .iter()
            .filter(|(_, op)| *op == Op::CloseExternally)
            .map(|(at, _)| *at)
            .collect()
    }

    #[test]
    fn close_externally_visits_each_layer_once_wire_first() {
        let mut h = Harness::plain();
        h.open();
        h.net.reset = true;
        h.run_at(0);
        assert_eq!(releases(&h.chain), [2, 1, 0]);
        assert!((0..3).all(|at| !h.chain.is_initialized(at)));
        assert_eq!(h.conn.state, ConnectionState::OpenFailed);
        assert_eq!(h.conn.last_error, Some(MqttError::ConnectionReset));
        assert!(h.net.closed.contains(&SocketHandle(0)));
        assert_eq!(h.sched.watched_sockets(), 0);

        // Nothing is left to release afterwards.
        h.chain.visits.clear();
        h.with_cx(|chain, cx| chain.teardown(cx));
        h.run_at(1);
        assert!(h.chain.visits.is_empty());
    }

    #[test]
    fn teardown_releases_wire_first_without_traffic() {
        let options = super::testing::options().with_tunnel_topic("gw/tunnel").unwrap();
        let mut h: Harness<crate::bsp::NoTls> = Harness::new(ChainScheme::Gateway, None, options);
        h.open();
        h.net.take_written();
        h.chain.visits.clear();
        h.with_cx(|chain, cx| chain.teardown(cx));
        assert_eq!(
            h.chain.visits,
            [
                (3, Op::CloseExternally),
                (2, Op::CloseExternally),
                (1, Op::CloseExternally),
                (0, Op::CloseExternally),
            ]
        );
        assert!(h.net.written.is_empty());
        assert_eq!(h.conn.state, ConnectionState::Closed);
    }

    #[test]
    fn failed_init_skips_the_release_of_that_layer() {
        let mut h = Harness::plain();
        h.net.create_result = Err(NetError::NoSocket);
        h.open();
        assert_eq!(
            h.chain.visits,
            [
                (0, Op::Init),
                (1, Op::Init),
                (2, Op::Init),
                (1, Op::CloseExternally),
                (0, Op::CloseExternally),
            ]
        );
        assert!(!h.chain.is_initialized(2));
        assert_eq!(h.conn.state, ConnectionState::OpenFailed);
        assert_eq!(h.conn.last_error, Some(MqttError::Transport(NetError::NoSocket)));
        assert!(h.net.closed.is_empty());
    }

    #[test]
    fn flows_past_the_wire_end_are_errors() {
        let mut h = Harness::plain();
        // Without the socket layer, init falls off the codec.
        h.chain.order.pop();
        let res = h.with_cx(|chain, cx| chain.open(cx));
        assert_eq!(res, Err(MqttError::InvalidArgument));
    }

    #[test]
    fn flow_status_is_the_carried_status() {
        assert_eq!(Flow::Done(Status::WantRead).status(), Status::WantRead);
        let failed = Status::Failed(MqttError::Timeout);
        assert_eq!(Flow::Prev(Op::CloseExternally, Payload::None, failed).status(), failed);
    }

    #[test]
    fn stale_tasks_are_dropped_after_close() {
        let mut h = Harness::plain();
        h.open();
        let stale = h.chain.kick();
        h.with_cx(|chain, cx| chain.teardown(cx));
        let res = h.with_cx(|chain, cx| chain.resume(cx, stale));
        assert_eq!(res, Ok(()));
    }

    #[test]
    fn failed_connect_reports_open_failed() {
        let mut h = Harness::plain();
        h.net.connect_result = Err(NetError::InvalidAddress);
        h.open();
        assert_eq!(h.conn.state, ConnectionState::OpenFailed);
        assert_eq!(
            h.conn.last_error,
            Some(MqttError::Transport(NetError::InvalidAddress))
        );
        assert!(h.net.written.is_empty());
    }
}
