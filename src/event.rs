//! # Application Events
//!
//! Everything the client reports back to the application arrives as an
//! [`MqttEvent`] delivered synchronously to an [`EventHandler`] while the
//! dispatcher steps. Each logical request (publish, subscribe, unsubscribe)
//! completes with exactly one event carrying its [`RequestId`].

use embassy_time::Duration;
use heapless::{Deque, Vec};

use crate::error::MqttError;
use crate::packet::{MAX_SUBSCRIBE_TOPICS, Publish, SubAckReturnCode};

/// Identifies one application request until its completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestId(pub u32);

/// Return codes granted by a `SUBACK`, one per requested filter.
pub type GrantedQoS = Vec<SubAckReturnCode, MAX_SUBSCRIBE_TOPICS>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttEvent {
    /// The broker accepted the connection.
    Connected { session_present: bool },
    /// A connection attempt ended before the session was established.
    ConnectFailed(MqttError),
    /// An established session ended. `None` means a requested disconnect.
    Disconnected { reason: Option<MqttError> },
    /// A reconnect attempt is scheduled after the backoff penalty.
    Reconnecting { after: Duration },
    /// An inbound application message.
    Message(Publish),
    Published {
        id: RequestId,
        result: Result<(), MqttError>,
    },
    Subscribed {
        id: RequestId,
        result: Result<GrantedQoS, MqttError>,
    },
    Unsubscribed {
        id: RequestId,
        result: Result<(), MqttError>,
    },
}

impl MqttEvent {
    /// The request this event completes, if any.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            MqttEvent::Published { id, .. }
            | MqttEvent::Subscribed { id, .. }
            | MqttEvent::Unsubscribed { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Receives client events.
///
/// Handlers run inside the dispatcher step and must not block.
pub trait EventHandler {
    fn on_event(&mut self, event: MqttEvent);
}

/// A handler that ignores every event.
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&mut self, _event: MqttEvent) {}
}

/// Fans every event out to two handlers.
///
/// # Example
///
/// ```ignore
/// let mut queue = EventQueue::<8>::new();
/// let mut handler = HandlerPair::new(&mut telemetry, &mut queue);
/// client.step(&mut handler)?;
/// ```
pub struct HandlerPair<H1, H2> {
    pub first: H1,
    pub second: H2,
}

impl<H1, H2> HandlerPair<H1, H2> {
    pub fn new(first: H1, second: H2) -> Self {
        Self { first, second }
    }
}

impl<H1, H2> EventHandler for HandlerPair<H1, H2>
where
    H1: EventHandler,
    H2: EventHandler,
{
    fn on_event(&mut self, event: MqttEvent) {
        self.first.on_event(event.clone());
        self.second.on_event(event);
    }
}

impl<H: EventHandler + ?Sized> EventHandler for &mut H {
    fn on_event(&mut self, event: MqttEvent) {
        (**self).on_event(event)
    }
}

/// Buffers events for polling. When full, the oldest event is dropped.
pub struct EventQueue<const N: usize> {
    events: Deque<MqttEvent, N>,
    dropped: usize,
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventQueue<N> {
    pub const fn new() -> Self {
        Self {
            events: Deque::new(),
            dropped: 0,
        }
    }

    pub fn pop(&mut self) -> Option<MqttEvent> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events discarded because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &MqttEvent> {
        self.events.iter()
    }
}

impl<const N: usize> EventHandler for EventQueue<N> {
    fn on_event(&mut self, event: MqttEvent) {
        if self.events.is_full() {
            self.events.pop_front();
            self.dropped += 1;
        }
        let _ = self.events.push_back(event);
    }
}
