//! # Layered MQTT Client for Embedded Systems
//!
//! `mqtt-layers` is a `no_std`, allocation-free MQTT 3.1.1 client. Instead of
//! awaiting inside the protocol code, every connection is a chain of small
//! resumable layers driven by a single-threaded [`EventDispatcher`]. The
//! application decides when the dispatcher steps, which makes the client
//! equally usable from a bare `loop {}`, an RTOS thread or an Embassy task.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** all buffers and queues are `heapless`.
//! - **Layer chain:** application logic, optional gateway tunnelling or TLS,
//!   the incremental packet codec and the socket adapter each live in their
//!   own [`Layer`](layer::Layer). A chain is picked per connection through
//!   [`ChainScheme`].
//! - **Incremental parser:** [`MqttParser`] accepts the byte stream in chunks
//!   of any size and yields whole packets.
//! - **QoS 0, 1 and 2** with retransmission, keep-alive and jittered
//!   reconnect backoff.
//! - **Per-subscription callbacks** through
//!   [`MqttClient::subscribe_with`], and application timers on the same
//!   dispatcher through [`MqttClient::schedule_timed_task`].
//! - **Platform shims:** time, randomness, sockets, TLS and file storage are
//!   reached through the traits in [`bsp`]. [`TcpNetwork`] adapts
//!   `embassy-net` sockets.
//!
//! ## Usage
//!
//! ### 1. Stepping the client yourself
//!
//! ```ignore
//! let options = MqttOptions::new("sensor-7", "192.168.1.10", 1883)?;
//! let mut client = MqttClient::new(options, network, EmbassyClock, rng)?;
//! let mut events = EventQueue::<8>::new();
//! client.connect()?;
//! client.publish("sensor/7/temp", b"21.5", QoS::AtLeastOnce, false)?;
//! loop {
//!     client.step(&mut events)?;
//!     while let Some(event) = events.pop() {
//!         // ...
//!     }
//! }
//! ```
//!
//! ### 2. Async runtime
//!
//! [`runtime::MqttRuntime`] owns the client inside an Embassy task, sleeps
//! between steps and forwards messages other tasks send through a
//! [`runtime::PublisherHandle`].
//!
//! ## Logging
//!
//! Internal logging goes to `log`, `defmt` or `esp-println`, selected by the
//! feature of the same name. With none enabled nothing is emitted.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod backoff;
pub mod bsp;
pub mod client;
pub mod coroutine;
pub mod data;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod layer;
pub mod packet;
pub mod parser;
pub mod router;
pub mod runtime;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use bsp::{Clock, EmbassyClock, NetworkBsp, RngBsp, TlsProvider};
pub use client::{MqttClient, MqttOptions, TimedTaskId};
pub use dispatcher::EventDispatcher;
pub use error::MqttError;
pub use event::{EventHandler, EventQueue, MqttEvent, RequestId};
pub use layer::{ChainScheme, ConnectionState};
pub use packet::{Publish, QoS};
pub use parser::MqttParser;
pub use router::SubscriptionRouter;
pub use transport::TcpNetwork;
