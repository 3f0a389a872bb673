//! Mock platform shims shared by the scenario tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_time::Instant;
use mqtt_layers::bsp::{Clock, Interest, NetError, NetworkBsp, Readiness, SocketHandle, Watch};
use mqtt_layers::data::DataDesc;
use mqtt_layers::event::{EventQueue, MqttEvent};
use mqtt_layers::packet::MqttPacket;
use mqtt_layers::parser::{MqttParser, Parsed};
use mqtt_layers::{MqttClient, MqttOptions};
use rand::SeedableRng;
use rand::rngs::SmallRng;

pub const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

/// Records written frames and serves injected inbound chunks, one per read.
#[derive(Default)]
pub struct MockNetwork {
    next_socket: u8,
    pub written: Vec<u8>,
    pub inbound: VecDeque<Vec<u8>>,
    /// Keep connects "in progress" until cleared.
    pub hold_connect: bool,
    /// Every read fails with a reset while set.
    pub reset: bool,
    pub opened: usize,
    pub closed: usize,
}

impl MockNetwork {
    pub fn inject(&mut self, bytes: &[u8]) {
        self.inbound.push_back(bytes.to_vec());
    }

    /// Decodes and clears everything written so far.
    pub fn take_packets(&mut self) -> Vec<MqttPacket> {
        let bytes = std::mem::take(&mut self.written);
        decode_all(&bytes)
    }
}

impl NetworkBsp for MockNetwork {
    fn create_socket(&mut self) -> Result<SocketHandle, NetError> {
        let socket = SocketHandle(self.next_socket);
        self.next_socket = self.next_socket.wrapping_add(1);
        self.opened += 1;
        Ok(socket)
    }

    fn connect(&mut self, _socket: SocketHandle, _host: &str, _port: u16) -> Result<(), NetError> {
        if self.hold_connect {
            return Err(NetError::InProgress);
        }
        Ok(())
    }

    fn connection_check(&mut self, _socket: SocketHandle) -> Result<(), NetError> {
        Ok(())
    }

    fn write(&mut self, _socket: SocketHandle, buf: &[u8]) -> Result<usize, NetError> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&mut self, _socket: SocketHandle, buf: &mut [u8]) -> Result<usize, NetError> {
        if self.reset {
            return Err(NetError::ConnectionReset);
        }
        let Some(chunk) = self.inbound.pop_front() else {
            return Err(NetError::Busy);
        };
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    fn close(&mut self, _socket: SocketHandle) {
        self.closed += 1;
    }

    fn select(&mut self, watches: &mut [Watch]) -> Result<usize, NetError> {
        let mut ready = 0;
        for watch in watches.iter_mut() {
            let hit = match watch.interest {
                Interest::Read => self.reset || !self.inbound.is_empty(),
                Interest::Write => true,
                Interest::Connect => !self.hold_connect,
            };
            if hit {
                watch.readiness = Readiness::Ready;
                ready += 1;
            }
        }
        Ok(ready)
    }
}

/// Clock the test moves by hand. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }

    pub fn ms(&self) -> u64 {
        self.0.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.0.get())
    }
}

pub type TestClient = MqttClient<MockNetwork, ManualClock, SmallRng>;

pub fn options() -> MqttOptions {
    MqttOptions::new("it", "10.0.0.1", 1883)
        .unwrap()
        .with_keep_alive(embassy_time::Duration::from_secs(30))
}

pub fn client(options: MqttOptions) -> (TestClient, ManualClock) {
    let clock = ManualClock::default();
    let client = MqttClient::new(
        options,
        MockNetwork::default(),
        clock.clone(),
        SmallRng::seed_from_u64(7),
    )
    .unwrap();
    (client, clock)
}

/// Steps until the work queued for the current instant has run.
pub fn settle<const N: usize>(client: &mut TestClient, events: &mut EventQueue<N>) {
    for _ in 0..8 {
        client.step(events).unwrap();
    }
}

pub fn settle_at<const N: usize>(client: &mut TestClient, clock: &ManualClock, ms: u64, events: &mut EventQueue<N>) {
    clock.set(ms);
    settle(client, events);
}

/// Connects and completes the CONNACK exchange at the clock's current time.
pub fn connected<const N: usize>(client: &mut TestClient, events: &mut EventQueue<N>) {
    client.connect().unwrap();
    settle(client, events);
    client.network_mut().inject(&CONNACK);
    settle(client, events);
    assert_eq!(drain(events), [MqttEvent::Connected { session_present: false }]);
    client.network_mut().take_packets();
}

pub fn drain<const N: usize>(events: &mut EventQueue<N>) -> Vec<MqttEvent> {
    std::iter::from_fn(|| events.pop()).collect()
}

pub fn decode_all(bytes: &[u8]) -> Vec<MqttPacket> {
    decode_all_chunked(bytes, 1024)
}

/// Decodes a byte stream handed to one parser in chunks of `size` bytes.
pub fn decode_all_chunked(bytes: &[u8], size: usize) -> Vec<MqttPacket> {
    let mut parser = MqttParser::new();
    let mut packets = Vec::new();
    for chunk in bytes.chunks(size) {
        let mut desc = DataDesc::from_slice(chunk).unwrap();
        while !desc.is_consumed() {
            match parser.parse(&mut desc).unwrap() {
                Parsed::Complete(packet) => packets.push(packet),
                Parsed::NeedMore => break,
            }
        }
    }
    packets
}
