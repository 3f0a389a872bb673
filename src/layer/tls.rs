//! Record layer between the codec and the socket.
//!
//! Drives a sans-I/O [`TlsProvider`]: handshake flights are pushed toward the
//! wire like any other data and handshake records are collected from `pull`
//! until the provider reports the session established. From then on every
//! push is encrypted and every pull decrypted.

use super::{Flow, Layer, LayerContext, Op, Payload};
use crate::bsp::{Handshake, TlsError, TlsProvider};
use crate::coroutine::{Coroutine, ResumePoint};
use crate::data::DataDesc;
use crate::error::{MqttError, Status};
use crate::yield_until;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakePoint {
    Start,
    Exchange,
    AwaitWritten,
    AwaitRecords,
}

impl ResumePoint for HandshakePoint {
    const START: Self = HandshakePoint::Start;
}

pub struct TlsLayer<T: TlsProvider> {
    provider: T,
    co: Coroutine<HandshakePoint>,
    inbox: DataDesc,
    progress: Handshake,
    flight_written: bool,
    /// Records arrived since the provider last looked at the inbox.
    fresh: bool,
    established: bool,
    started: bool,
}

impl<T: TlsProvider> TlsLayer<T> {
    pub fn new(provider: T) -> Self {
        Self {
            provider,
            co: Coroutine::new(),
            inbox: DataDesc::new(),
            progress: Handshake::InProgress,
            flight_written: false,
            fresh: false,
            established: false,
            started: false,
        }
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn provider(&self) -> &T {
        &self.provider
    }

    fn reset(&mut self) {
        if self.started {
            self.provider.end();
        }
        self.co.reset();
        self.inbox.clear();
        self.progress = Handshake::InProgress;
        self.flight_written = false;
        self.fresh = false;
        self.established = false;
        self.started = false;
    }

    fn fail(err: TlsError) -> Flow {
        warn!("tls failure: {:?}", err);
        Flow::Next(Op::Close, Payload::None, Status::Failed(MqttError::Tls(err)))
    }

    fn handshake(&mut self, cx: &mut LayerContext<'_>) -> Flow {
        loop {
            match self.co.point() {
                HandshakePoint::Start => {
                    if let Err(err) = self.provider.begin(cx.conn.options.host()) {
                        return Self::fail(err);
                    }
                    self.started = true;
                    self.inbox.clear();
                    self.progress = Handshake::InProgress;
                    self.co.jump(HandshakePoint::Exchange);
                }
                HandshakePoint::Exchange => {
                    self.fresh = false;
                    let mut flight = DataDesc::new();
                    match self.provider.handshake(&mut self.inbox, &mut flight) {
                        Ok(progress) => self.progress = progress,
                        Err(err) => return Self::fail(err),
                    }
                    self.inbox.compact();
                    if !flight.is_empty() {
                        trace!("handshake flight of {} bytes", flight.len());
                        self.flight_written = false;
                        self.co.park(HandshakePoint::AwaitWritten);
                        return Flow::Next(Op::Push, Payload::Bytes(flight), Status::Ok);
                    }
                    self.co.jump(HandshakePoint::AwaitWritten);
                    self.flight_written = true;
                }
                HandshakePoint::AwaitWritten => {
                    yield_until!(
                        self.co,
                        HandshakePoint::AwaitWritten,
                        self.flight_written,
                        Flow::Done(Status::WantWrite)
                    );
                    if self.progress == Handshake::Complete {
                        self.co.reset();
                        self.established = true;
                        debug!("tls session established");
                        return Flow::Prev(Op::Connect, Payload::None, Status::Ok);
                    }
                    self.co.jump(HandshakePoint::AwaitRecords);
                }
                HandshakePoint::AwaitRecords => {
                    yield_until!(
                        self.co,
                        HandshakePoint::AwaitRecords,
                        self.fresh,
                        Flow::Done(Status::WantRead)
                    );
                    self.co.jump(HandshakePoint::Exchange);
                }
            }
        }
    }
}

impl<T: TlsProvider> Layer for TlsLayer<T> {
    fn init(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        self.reset();
        Flow::Next(Op::Init, data, status)
    }

    fn connect(&mut self, cx: &mut LayerContext<'_>, _data: Payload, _status: Status) -> Flow {
        self.co.reset();
        self.handshake(cx)
    }

    fn push(&mut self, cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        if !self.established {
            if status == Status::Written {
                self.flight_written = true;
                return self.handshake(cx);
            }
            return match data {
                Payload::None => Flow::Done(Status::WantWrite),
                _ => {
                    warn!("push before the tls session is up");
                    Flow::Prev(Op::Push, Payload::None, Status::Failed(MqttError::NotConnected))
                }
            };
        }
        match (data, status) {
            (data, Status::Written | Status::Failed(_)) => Flow::Prev(Op::Push, data, status),
            (Payload::Bytes(plain), _) => {
                let mut sealed = DataDesc::new();
                match self.provider.encrypt(plain.remaining(), &mut sealed) {
                    Ok(()) => Flow::Next(Op::Push, Payload::Bytes(sealed), status),
                    Err(err) => Self::fail(err),
                }
            }
            (data, status) => Flow::Next(Op::Push, data, status),
        }
    }

    fn pull(&mut self, cx: &mut LayerContext<'_>, data: Payload, _status: Status) -> Flow {
        let Payload::Bytes(records) = data else {
            return Flow::Done(Status::WantRead);
        };
        if self.inbox.append(records.remaining()).is_err() {
            return Self::fail(TlsError::BufferTooSmall);
        }
        if !self.established {
            self.fresh = true;
            return self.handshake(cx);
        }
        let mut plain = DataDesc::new();
        if let Err(err) = self.provider.decrypt(&mut self.inbox, &mut plain) {
            return Self::fail(err);
        }
        self.inbox.compact();
        if plain.is_empty() {
            Flow::Done(Status::WantRead)
        } else {
            Flow::Prev(Op::Pull, Payload::Bytes(plain), Status::Ok)
        }
    }

    fn close_externally(&mut self, _cx: &mut LayerContext<'_>, data: Payload, status: Status) -> Flow {
        self.reset();
        Flow::Prev(Op::CloseExternally, data, status)
    }
}
