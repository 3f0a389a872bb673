//! Channel-based publish requests.
//!
//! Application tasks that do not own the [`MqttClient`](crate::MqttClient)
//! hand their messages to the runtime through a bounded channel. The runtime
//! turns each request into a regular publish on its next wake-up.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};

use crate::packet::QoS;

/// A message to publish, sent from a producer task to the runtime.
///
/// Topic and payload are borrowed and must outlive the request. On embedded
/// targets they are usually `'static`.
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

pub type PublishRequestChannel<'a, const OUTBOX_DEPTH: usize> =
    Channel<CriticalSectionRawMutex, PublishRequest<'a>, OUTBOX_DEPTH>;

pub type PublishRequestSender<'a, const OUTBOX_DEPTH: usize> =
    Sender<'a, CriticalSectionRawMutex, PublishRequest<'a>, OUTBOX_DEPTH>;

pub type PublishRequestReceiver<'a, const OUTBOX_DEPTH: usize> =
    Receiver<'a, CriticalSectionRawMutex, PublishRequest<'a>, OUTBOX_DEPTH>;

/// Cloneable producer side of a [`PublishRequestChannel`].
#[derive(Clone, Copy)]
pub struct PublisherHandle<'a, const OUTBOX_DEPTH: usize> {
    tx: PublishRequestSender<'a, OUTBOX_DEPTH>,
}

impl<'a, const OUTBOX_DEPTH: usize> PublisherHandle<'a, OUTBOX_DEPTH> {
    pub fn new(tx: PublishRequestSender<'a, OUTBOX_DEPTH>) -> Self {
        Self { tx }
    }

    /// Queues a message, waiting while the channel is full.
    pub async fn publish(&self, topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) {
        self.tx
            .send(PublishRequest {
                topic,
                payload,
                qos,
                retain,
            })
            .await;
    }

    /// Queues a message without waiting. Returns `false` if the channel is
    /// full.
    pub fn try_publish(&self, topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) -> bool {
        self.tx
            .try_send(PublishRequest {
                topic,
                payload,
                qos,
                retain,
            })
            .is_ok()
    }
}
