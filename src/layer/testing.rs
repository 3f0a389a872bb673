//! Scripted network and a chain harness for layer tests.

use std::collections::VecDeque;
use std::vec::Vec;

use embassy_time::{Duration, Instant};

use super::{ChainScheme, ConnectionShared, LayerChain, LayerContext, Resume};
use crate::bsp::{Interest, NetError, NetworkBsp, NoTls, Readiness, SocketHandle, TlsProvider, Watch};
use crate::client::MqttOptions;
use crate::dispatcher::EventDispatcher;
use crate::event::{EventQueue, MqttEvent};

pub(crate) struct MockNet {
    next_socket: u8,
    pub create_result: Result<(), NetError>,
    pub connect_result: Result<(), NetError>,
    pub check_result: Result<(), NetError>,
    /// Set once an in-progress connect has finished.
    pub connect_ready: bool,
    /// Bytes accepted per write call.
    pub written: Vec<Vec<u8>>,
    /// Chunks handed out one per read call.
    pub inbound: VecDeque<Vec<u8>>,
    /// Remaining bytes the socket accepts; `None` is unlimited.
    pub write_budget: Option<usize>,
    pub reset: bool,
    pub closed: Vec<SocketHandle>,
}

impl MockNet {
    pub fn new() -> Self {
        Self {
            next_socket: 0,
            create_result: Ok(()),
            connect_result: Ok(()),
            check_result: Ok(()),
            connect_ready: false,
            written: Vec::new(),
            inbound: VecDeque::new(),
            write_budget: None,
            reset: false,
            closed: Vec::new(),
        }
    }

    /// Everything written so far, concatenated, and clears the record.
    pub fn take_written(&mut self) -> Vec<u8> {
        self.written.drain(..).flatten().collect()
    }
}

impl NetworkBsp for MockNet {
    fn create_socket(&mut self) -> Result<SocketHandle, NetError> {
        self.create_result?;
        let socket = SocketHandle(self.next_socket);
        self.next_socket += 1;
        Ok(socket)
    }

    fn connect(&mut self, _socket: SocketHandle, _host: &str, _port: u16) -> Result<(), NetError> {
        self.connect_result
    }

    fn connection_check(&mut self, _socket: SocketHandle) -> Result<(), NetError> {
        self.check_result
    }

    fn write(&mut self, _socket: SocketHandle, buf: &[u8]) -> Result<usize, NetError> {
        let n = match self.write_budget {
            Some(0) => return Err(NetError::Busy),
            Some(budget) => {
                let n = budget.min(buf.len());
                self.write_budget = Some(budget - n);
                n
            }
            None => buf.len(),
        };
        self.written.push(buf[..n].to_vec());
        Ok(n)
    }

    fn read(&mut self, _socket: SocketHandle, buf: &mut [u8]) -> Result<usize, NetError> {
        if self.reset {
            return Err(NetError::ConnectionReset);
        }
        let Some(mut chunk) = self.inbound.pop_front() else {
            return Err(NetError::Busy);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.inbound.push_front(chunk);
        }
        Ok(n)
    }

    fn close(&mut self, socket: SocketHandle) {
        self.closed.push(socket);
    }

    fn select(&mut self, watches: &mut [Watch]) -> Result<usize, NetError> {
        let mut ready = 0;
        for watch in watches.iter_mut() {
            let hit = match watch.interest {
                Interest::Read => self.reset || !self.inbound.is_empty(),
                Interest::Write => self.write_budget != Some(0),
                Interest::Connect => self.connect_ready,
            };
            if hit {
                watch.readiness = Readiness::Ready;
                ready += 1;
            }
        }
        Ok(ready)
    }
}

pub(crate) fn options() -> MqttOptions {
    MqttOptions::new("unit", "127.0.0.1", 1883)
        .unwrap()
        .with_keep_alive(Duration::from_secs(30))
}

pub(crate) struct Harness<T: TlsProvider = NoTls> {
    pub chain: LayerChain<T>,
    pub conn: ConnectionShared,
    pub sched: EventDispatcher<Resume, 32, 16, 2, 2>,
    pub net: MockNet,
    pub events: EventQueue<32>,
}

impl Harness<NoTls> {
    pub fn plain() -> Self {
        Self::new(ChainScheme::Plain, None, options())
    }
}

impl<T: TlsProvider> Harness<T> {
    pub fn new(scheme: ChainScheme, provider: Option<T>, options: MqttOptions) -> Self {
        Self {
            chain: LayerChain::new(scheme, provider).unwrap(),
            conn: ConnectionShared::new(options),
            sched: EventDispatcher::new(),
            net: MockNet::new(),
            events: EventQueue::new(),
        }
    }

    pub fn with_cx<R>(&mut self, f: impl FnOnce(&mut LayerChain<T>, &mut LayerContext<'_>) -> R) -> R {
        let mut cx = LayerContext::new(&mut self.conn, &mut self.sched, &mut self.net, &mut self.events);
        f(&mut self.chain, &mut cx)
    }

    pub fn open(&mut self) {
        self.with_cx(|chain, cx| chain.open(cx)).unwrap();
    }

    /// Runs one dispatcher step at `ms` milliseconds.
    pub fn run_at(&mut self, ms: u64) {
        let Self {
            chain,
            conn,
            sched,
            net,
            events,
        } = self;
        sched
            .step(Instant::from_millis(ms), net, |sched, net, task| {
                let mut cx = LayerContext::new(&mut *conn, sched, net, &mut *events);
                let _ = chain.resume(&mut cx, task);
            })
            .unwrap();
    }

    /// Runs steps at `ms` until nothing more is queued for that instant.
    pub fn settle_at(&mut self, ms: u64) {
        for _ in 0..16 {
            self.run_at(ms);
            if self.sched.next_deadline() != Some(Instant::from_millis(ms)) {
                break;
            }
        }
    }

    pub fn inject(&mut self, bytes: &[u8]) {
        self.net.inbound.push_back(bytes.to_vec());
    }

    pub fn drain_events(&mut self) -> Vec<MqttEvent> {
        std::iter::from_fn(|| self.events.pop()).collect()
    }
}
