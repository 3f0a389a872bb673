//! # Subscription Routing
//!
//! A [`SubscriptionRouter`] remembers which callback belongs to which
//! subscription filter. While the client steps, every inbound message is
//! handed to the callbacks whose filters match its topic. Messages no filter
//! claims still reach the event handler as [`MqttEvent::Message`].
//!
//! Callbacks are plain function pointers so they can live in the client
//! without allocation. They typically forward into a static channel or
//! signal owned by the task that cares about the topic.

use heapless::Vec;

use crate::error::MqttError;
use crate::event::{EventHandler, MqttEvent};
use crate::packet::{Publish, Topic};

/// Subscriptions that may carry their own callback at once.
pub const MAX_ROUTES: usize = 8;

/// Runs for each inbound message matching its subscription filter.
pub type MessageCallback = fn(&Publish);

/// Whether `topic` matches the subscription `filter`.
///
/// `+` matches exactly one level and `#` matches the remaining levels,
/// including none. Topics starting with `$` are not matched by a wildcard
/// in the first level.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match (part, levels.next()) {
            ("#", _) => return true,
            ("+", Some(_)) => {}
            (part, Some(level)) if part == level => {}
            _ => return false,
        }
    }
    levels.next().is_none()
}

#[derive(Clone)]
struct Route {
    filter: Topic,
    callback: MessageCallback,
}

/// Filters with their message callbacks.
#[derive(Clone, Default)]
pub struct SubscriptionRouter<const N: usize = MAX_ROUTES> {
    routes: Vec<Route, N>,
}

impl<const N: usize> SubscriptionRouter<N> {
    pub const fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Routes messages matching `filter` to `callback`. A filter added again
    /// keeps its slot and takes the new callback.
    pub fn add(&mut self, filter: &str, callback: MessageCallback) -> Result<(), MqttError> {
        if let Some(route) = self.routes.iter_mut().find(|r| r.filter == filter) {
            route.callback = callback;
            return Ok(());
        }
        let mut topic = Topic::new();
        topic.push_str(filter).map_err(|_| MqttError::InvalidArgument)?;
        self.routes
            .push(Route { filter: topic, callback })
            .map_err(|_| MqttError::OutOfResources)
    }

    /// Drops the route of `filter`. Returns false if there was none.
    pub fn remove(&mut self, filter: &str) -> bool {
        match self.routes.iter().position(|r| r.filter == filter) {
            Some(pos) => {
                self.routes.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.routes.iter().any(|r| r.filter == filter)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Runs every callback whose filter matches the message topic and
    /// returns how many ran.
    pub fn dispatch(&self, message: &Publish) -> usize {
        let mut hits = 0;
        for route in self.routes.iter().filter(|r| topic_matches(&r.filter, &message.topic)) {
            (route.callback)(message);
            hits += 1;
        }
        if hits > 0 {
            trace!("message on {} routed to {} callbacks", message.topic.as_str(), hits);
        }
        hits
    }
}

impl<const N: usize> core::fmt::Debug for SubscriptionRouter<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.routes.iter().map(|r| r.filter.as_str())).finish()
    }
}

/// Event handler that offers messages to a router before `inner`.
pub(crate) struct Routed<'a, const N: usize> {
    router: &'a SubscriptionRouter<N>,
    inner: &'a mut dyn EventHandler,
}

impl<'a, const N: usize> Routed<'a, N> {
    pub(crate) fn new(router: &'a SubscriptionRouter<N>, inner: &'a mut dyn EventHandler) -> Self {
        Self { router, inner }
    }
}

impl<const N: usize> EventHandler for Routed<'_, N> {
    fn on_event(&mut self, event: MqttEvent) {
        match event {
            MqttEvent::Message(message) if self.router.dispatch(&message) > 0 => {}
            event => self.inner.on_event(event),
        }
    }
}
