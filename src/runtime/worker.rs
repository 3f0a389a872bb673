//! Secondary dispatcher for slow work.
//!
//! Work that must not stall the connection (flash writes, image hashing)
//! runs on a [`Worker`] with its own [`EventDispatcher`]. Nothing is shared
//! with the client's dispatcher: other tasks reach the worker only through
//! its channel, and the worker's handler may schedule follow-up timers on its
//! own dispatcher.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embedded_hal_async::delay::DelayNs;

use crate::bsp::Clock;
use crate::dispatcher::{EventDispatcher, NoSockets};
use crate::error::MqttError;

pub type WorkChannel<T, const DEPTH: usize> = Channel<CriticalSectionRawMutex, T, DEPTH>;
pub type WorkSender<'a, T, const DEPTH: usize> = Sender<'a, CriticalSectionRawMutex, T, DEPTH>;
pub type WorkReceiver<'a, T, const DEPTH: usize> = Receiver<'a, CriticalSectionRawMutex, T, DEPTH>;

/// Dispatcher owned by a worker. It watches no sockets.
pub type WorkDispatcher<T, const TASKS: usize, const TIMERS: usize> = EventDispatcher<T, TASKS, TIMERS, 1, 1>;

pub struct Worker<'a, T, const DEPTH: usize, const TASKS: usize = 8, const TIMERS: usize = 8>
where
    T: Clone,
{
    dispatcher: WorkDispatcher<T, TASKS, TIMERS>,
    inbox: WorkReceiver<'a, T, DEPTH>,
}

impl<'a, T, const DEPTH: usize, const TASKS: usize, const TIMERS: usize> Worker<'a, T, DEPTH, TASKS, TIMERS>
where
    T: Clone,
{
    pub fn new(inbox: WorkReceiver<'a, T, DEPTH>) -> Self {
        Self {
            dispatcher: EventDispatcher::new(),
            inbox,
        }
    }

    pub fn dispatcher(&self) -> &WorkDispatcher<T, TASKS, TIMERS> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut WorkDispatcher<T, TASKS, TIMERS> {
        &mut self.dispatcher
    }

    /// Moves handed-off work into the dispatcher, as much as it has room
    /// for, and runs one pass. Returns how many tasks ran.
    pub fn step<F>(&mut self, now: embassy_time::Instant, mut handler: F) -> Result<usize, MqttError>
    where
        F: FnMut(&mut WorkDispatcher<T, TASKS, TIMERS>, T),
    {
        while self.dispatcher.queued() < TASKS {
            let Ok(task) = self.inbox.try_receive() else {
                break;
            };
            self.dispatcher.post(task)?;
        }
        self.dispatcher
            .step(now, &mut NoSockets, |sched, _, task| handler(sched, task))
    }

    /// Runs until a handler calls [`EventDispatcher::stop`]. Sleeps on
    /// `delay` until the next timer, or until new work arrives.
    ///
    /// The worker holds a dispatcher handle for as long as it runs.
    pub async fn run<C, D, F>(&mut self, clock: &C, delay: &mut D, mut handler: F) -> Result<(), MqttError>
    where
        C: Clock,
        D: DelayNs,
        F: FnMut(&mut WorkDispatcher<T, TASKS, TIMERS>, T),
    {
        let handle = self.dispatcher.register_handle()?;
        let result = self.drive(clock, delay, &mut handler).await;
        self.dispatcher.unregister_handle(handle);
        debug!("worker stopped");
        result
    }

    async fn drive<C, D, F>(&mut self, clock: &C, delay: &mut D, handler: &mut F) -> Result<(), MqttError>
    where
        C: Clock,
        D: DelayNs,
        F: FnMut(&mut WorkDispatcher<T, TASKS, TIMERS>, T),
    {
        while self.dispatcher.should_continue() {
            self.step(clock.now(), &mut *handler)?;
            if self.dispatcher.queued() > 0 || !self.dispatcher.should_continue() {
                continue;
            }
            let now = clock.now();
            let woken = match self.dispatcher.next_deadline() {
                None => Some(self.inbox.receive().await),
                Some(at) if at <= now => None,
                Some(at) => {
                    let ms = (at - now).as_millis().min(u64::from(u32::MAX)) as u32;
                    match select(delay.delay_ms(ms), self.inbox.receive()).await {
                        Either::First(()) => None,
                        Either::Second(task) => Some(task),
                    }
                }
            };
            if let Some(task) = woken {
                self.dispatcher.post(task)?;
            }
        }
        Ok(())
    }
}
