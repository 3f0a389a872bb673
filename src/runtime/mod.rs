//! # Async Runtime
//!
//! Glue between the poll-driven client and an async executor.
//!
//! - [`MqttRuntime`] owns an [`MqttClient`](crate::MqttClient) and sleeps
//!   between steps on an `embedded-hal-async` delay.
//! - Producer tasks publish through a [`PublisherHandle`] without touching the
//!   client; requests travel over a [`PublishRequestChannel`].
//! - A [`Worker`] runs slow, connection-independent work on a dispatcher of
//!   its own, fed by a [`WorkChannel`].

pub(crate) mod event_loop;
pub(crate) mod publisher;
pub(crate) mod worker;

pub use event_loop::MqttRuntime;
pub use publisher::{
    PublishRequest, PublishRequestChannel, PublishRequestReceiver, PublishRequestSender, PublisherHandle,
};
pub use worker::{WorkChannel, WorkDispatcher, WorkReceiver, WorkSender, Worker};
