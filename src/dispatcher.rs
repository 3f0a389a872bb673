//! # Event Dispatcher
//!
//! Single-threaded scheduler multiplexing three sources of work:
//!
//! - an immediate FIFO of deferred tasks,
//! - timed tasks ordered by trigger time (ties in registration order),
//! - one-shot socket watches resolved through the network shim's `select`.
//!
//! The dispatcher never calls into the layers itself; every task is a plain
//! value of type `T` handed to the closure passed to [`EventDispatcher::step`].
//! This keeps ownership of the connection state with the caller.

use embassy_time::{Duration, Instant};
use heapless::{Deque, Vec};

use crate::bsp::{Interest, NetError, NetworkBsp, Readiness, SocketHandle, Watch};
use crate::error::MqttError;

/// Anything that can resolve socket watches.
pub trait ReadinessPoll {
    fn select(&mut self, watches: &mut [Watch]) -> Result<usize, NetError>;
}

impl<N: NetworkBsp + ?Sized> ReadinessPoll for N {
    fn select(&mut self, watches: &mut [Watch]) -> Result<usize, NetError> {
        NetworkBsp::select(self, watches)
    }
}

/// Poller for dispatchers that never watch sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSockets;

impl ReadinessPoll for NoSockets {
    fn select(&mut self, _watches: &mut [Watch]) -> Result<usize, NetError> {
        Ok(0)
    }
}

/// Handle of a timed task, valid until the task fires or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId(u32);

/// Generation-checked slot of a registered owner (usually a connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleId {
    index: u8,
    generation: u16,
}

#[derive(Debug, Clone, Copy)]
struct HandleSlot {
    generation: u16,
    live: bool,
}

impl HandleSlot {
    const EMPTY: Self = Self {
        generation: 0,
        live: false,
    };
}

struct TimedTask<T> {
    at: Instant,
    id: TimerId,
    task: T,
}

struct SocketEntry<T> {
    socket: SocketHandle,
    interest: Interest,
    task: T,
    on_read: T,
}

pub struct EventDispatcher<
    T,
    const TASKS: usize = 16,
    const TIMERS: usize = 16,
    const SOCKETS: usize = 4,
    const HANDLES: usize = 4,
> {
    now: Instant,
    queue: Deque<T, TASKS>,
    timers: Vec<TimedTask<T>, TIMERS>,
    sockets: Vec<SocketEntry<T>, SOCKETS>,
    handles: [HandleSlot; HANDLES],
    next_timer: u32,
    stopped: bool,
}

impl<T, const TASKS: usize, const TIMERS: usize, const SOCKETS: usize, const HANDLES: usize>
    Default for EventDispatcher<T, TASKS, TIMERS, SOCKETS, HANDLES>
where
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const TASKS: usize, const TIMERS: usize, const SOCKETS: usize, const HANDLES: usize>
    EventDispatcher<T, TASKS, TIMERS, SOCKETS, HANDLES>
where
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            now: Instant::from_ticks(0),
            queue: Deque::new(),
            timers: Vec::new(),
            sockets: Vec::new(),
            handles: [HandleSlot::EMPTY; HANDLES],
            next_timer: 0,
            stopped: false,
        }
    }

    /// Time of the current (or last) step.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Moves the dispatcher clock forward. It never goes back.
    pub fn advance(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Queues a task to run at the start of the next step.
    pub fn post(&mut self, task: T) -> Result<(), MqttError> {
        self.queue
            .push_back(task)
            .map_err(|_| MqttError::OutOfResources)
    }

    pub fn execute_in(&mut self, delay: Duration, task: T) -> Result<TimerId, MqttError> {
        self.execute_at(self.now + delay, task)
    }

    pub fn execute_at(&mut self, at: Instant, task: T) -> Result<TimerId, MqttError> {
        let id = TimerId(self.next_timer);
        self.next_timer = self.next_timer.wrapping_add(1);
        self.insert_timer(TimedTask { at, id, task })?;
        Ok(id)
    }

    fn insert_timer(&mut self, entry: TimedTask<T>) -> Result<(), MqttError> {
        // Later than every entry with the same trigger time.
        let pos = self
            .timers
            .iter()
            .position(|t| t.at > entry.at)
            .unwrap_or(self.timers.len());
        self.timers
            .insert(pos, entry)
            .map_err(|_| MqttError::OutOfResources)
    }

    /// Removes a pending timed task; its task is returned and never runs.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let pos = self.timers.iter().position(|t| t.id == id)?;
        Some(self.timers.remove(pos).task)
    }

    /// Moves a pending timed task to `delay` from now, keeping its handle.
    pub fn restart(&mut self, id: TimerId, delay: Duration) -> Result<(), MqttError> {
        let pos = self
            .timers
            .iter()
            .position(|t| t.id == id)
            .ok_or(MqttError::InvalidArgument)?;
        let mut entry = self.timers.remove(pos);
        entry.at = self.now + delay;
        self.insert_timer(entry)
    }

    pub fn is_scheduled(&self, id: TimerId) -> bool {
        self.timers.iter().any(|t| t.id == id)
    }

    /// Starts watching `socket` for readability, running `on_read` when it fires.
    ///
    /// Watches are one-shot: after firing they fall back to this read watch.
    pub fn register_socket(&mut self, socket: SocketHandle, on_read: T) -> Result<(), MqttError> {
        if self.sockets.iter().any(|s| s.socket == socket) {
            return Err(MqttError::InvalidArgument);
        }
        self.sockets
            .push(SocketEntry {
                socket,
                interest: Interest::Read,
                task: on_read.clone(),
                on_read,
            })
            .map_err(|_| MqttError::OutOfResources)
    }

    /// Replaces the current watch of a registered socket.
    pub fn continue_when(
        &mut self,
        socket: SocketHandle,
        interest: Interest,
        task: T,
    ) -> Result<(), MqttError> {
        let entry = self
            .sockets
            .iter_mut()
            .find(|s| s.socket == socket)
            .ok_or(MqttError::InvalidArgument)?;
        entry.interest = interest;
        entry.task = task;
        Ok(())
    }

    /// Drops the watch of `socket` together with the tasks it held.
    pub fn unregister_socket(&mut self, socket: SocketHandle) -> bool {
        match self.sockets.iter().position(|s| s.socket == socket) {
            Some(pos) => {
                self.sockets.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn watched_sockets(&self) -> usize {
        self.sockets.len()
    }

    /// Claims a free handle slot. Only the first 256 slots are addressable.
    pub fn register_handle(&mut self) -> Result<HandleId, MqttError> {
        let index = self
            .handles
            .iter()
            .position(|slot| !slot.live)
            .ok_or(MqttError::OutOfResources)?;
        let index = u8::try_from(index).map_err(|_| MqttError::OutOfResources)?;
        let slot = &mut self.handles[usize::from(index)];
        slot.live = true;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(HandleId {
            index,
            generation: slot.generation,
        })
    }

    /// Releases a handle. Stale handles from an earlier generation are ignored.
    pub fn unregister_handle(&mut self, id: HandleId) -> bool {
        match self.handles.get_mut(id.index as usize) {
            Some(slot) if slot.live && slot.generation == id.generation => {
                slot.live = false;
                true
            }
            _ => false,
        }
    }

    pub fn live_handles(&self) -> usize {
        self.handles.iter().filter(|slot| slot.live).count()
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// False once stopped or when no handle is registered any more.
    pub fn should_continue(&self) -> bool {
        !self.stopped && self.live_handles() > 0
    }

    /// Earliest instant at which [`step`](Self::step) has timed work to do.
    /// Queued immediate tasks make that "now".
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.queue.is_empty() {
            return Some(self.now);
        }
        self.timers.first().map(|t| t.at)
    }

    /// Immediate tasks waiting for the next step.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.timers.is_empty() && self.sockets.is_empty()
    }

    /// Runs one dispatcher pass and returns how many tasks ran.
    ///
    /// In order: the immediate tasks queued before the step, the timed tasks
    /// due at `now`, then every socket watch the poll reports as ready, in
    /// registration order. Tasks queued while the step runs wait for the next
    /// step, which runs them before its poll.
    pub fn step<P, F>(&mut self, now: Instant, io: &mut P, mut handler: F) -> Result<usize, MqttError>
    where
        P: ReadinessPoll + ?Sized,
        F: FnMut(&mut Self, &mut P, T),
    {
        self.advance(now);
        let mut ran = 0;

        let queued = self.queue.len();
        for _ in 0..queued {
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            handler(self, io, task);
            ran += 1;
        }

        let mut due: Vec<TimerId, TIMERS> = Vec::new();
        for timer in self.timers.iter().take_while(|t| t.at <= self.now) {
            let _ = due.push(timer.id);
        }
        for id in due {
            // An earlier handler may have cancelled it.
            if let Some(task) = self.cancel(id) {
                handler(self, io, task);
                ran += 1;
            }
        }

        if self.sockets.is_empty() {
            return Ok(ran);
        }
        let mut watches: Vec<Watch, SOCKETS> = Vec::new();
        for entry in &self.sockets {
            let _ = watches.push(Watch::new(entry.socket, entry.interest));
        }
        io.select(&mut watches)?;
        for watch in watches {
            if watch.readiness == Readiness::Pending {
                continue;
            }
            // The watch may have been replaced or dropped by an earlier handler.
            let Some(entry) = self
                .sockets
                .iter_mut()
                .find(|s| s.socket == watch.socket && s.interest == watch.interest)
            else {
                continue;
            };
            let task = core::mem::replace(&mut entry.task, entry.on_read.clone());
            entry.interest = Interest::Read;
            handler(self, io, task);
            ran += 1;
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec as StdVec;

    #[derive(Default)]
    struct FakePoll {
        ready: StdVec<(SocketHandle, Interest)>,
        polls: usize,
    }

    impl ReadinessPoll for FakePoll {
        fn select(&mut self, watches: &mut [Watch]) -> Result<usize, NetError> {
            self.polls += 1;
            let mut n = 0;
            for w in watches.iter_mut() {
                if self.ready.contains(&(w.socket, w.interest)) {
                    w.readiness = Readiness::Ready;
                    n += 1;
                }
            }
            Ok(n)
        }
    }

    type Dispatcher = EventDispatcher<&'static str, 8, 8, 2, 2>;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn run(d: &mut Dispatcher, now: Instant, poll: &mut FakePoll) -> StdVec<&'static str> {
        let mut seen = StdVec::new();
        d.step(now, poll, |_, _, task| seen.push(task)).unwrap();
        seen
    }

    #[test]
    fn immediate_tasks_run_in_fifo_order() {
        let mut d = Dispatcher::new();
        d.post("a").unwrap();
        d.post("b").unwrap();
        d.post("c").unwrap();
        assert_eq!(run(&mut d, at(0), &mut FakePoll::default()), ["a", "b", "c"]);
    }

    #[test]
    fn tasks_posted_during_a_step_run_next_step_before_the_poll() {
        let mut d = Dispatcher::new();
        let sock = SocketHandle(1);
        d.register_socket(sock, "read").unwrap();
        d.post("first").unwrap();
        let mut poll = FakePoll {
            ready: vec![(sock, Interest::Read)],
            polls: 0,
        };
        let mut seen = StdVec::new();
        d.step(at(0), &mut poll, |d, _, task| {
            seen.push(task);
            if task == "first" || task == "read" {
                d.post("deferred").unwrap();
            }
        })
        .unwrap();
        assert_eq!(seen, ["first", "read"]);
        assert_eq!(poll.polls, 1);

        seen.clear();
        poll.ready.clear();
        d.step(at(0), &mut poll, |_, _, task| seen.push(task)).unwrap();
        assert_eq!(seen, ["deferred", "deferred"]);
    }

    #[test]
    fn timers_fire_in_time_order_with_ties_by_registration() {
        let mut d = Dispatcher::new();
        d.execute_in(Duration::from_millis(20), "late").unwrap();
        d.execute_in(Duration::from_millis(10), "tie-1").unwrap();
        d.execute_in(Duration::from_millis(10), "tie-2").unwrap();
        d.execute_in(Duration::from_millis(5), "early").unwrap();
        let mut poll = FakePoll::default();

        assert!(run(&mut d, at(4), &mut poll).is_empty());
        assert_eq!(d.next_deadline(), Some(at(5)));
        assert_eq!(run(&mut d, at(15), &mut poll), ["early", "tie-1", "tie-2"]);
        assert_eq!(run(&mut d, at(30), &mut poll), ["late"]);
        assert_eq!(d.next_deadline(), None);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut d = Dispatcher::new();
        let a = d.execute_in(Duration::from_millis(10), "a").unwrap();
        d.execute_in(Duration::from_millis(10), "b").unwrap();
        assert_eq!(d.cancel(a), Some("a"));
        assert_eq!(d.cancel(a), None);
        assert_eq!(run(&mut d, at(10), &mut FakePoll::default()), ["b"]);
    }

    #[test]
    fn handler_can_cancel_a_later_due_timer() {
        let mut d = Dispatcher::new();
        d.execute_in(Duration::from_millis(1), "first").unwrap();
        let second = d.execute_in(Duration::from_millis(2), "second").unwrap();
        let mut seen = StdVec::new();
        d.step(at(5), &mut FakePoll::default(), |d, _, task| {
            seen.push(task);
            d.cancel(second);
        })
        .unwrap();
        assert_eq!(seen, ["first"]);
    }

    #[test]
    fn restart_moves_the_deadline_and_keeps_the_handle() {
        let mut d = Dispatcher::new();
        let id = d.execute_in(Duration::from_millis(10), "t").unwrap();
        let mut poll = FakePoll::default();
        run(&mut d, at(8), &mut poll);
        d.restart(id, Duration::from_millis(10)).unwrap();
        assert!(run(&mut d, at(12), &mut poll).is_empty());
        assert!(d.is_scheduled(id));
        assert_eq!(run(&mut d, at(18), &mut poll), ["t"]);
        assert!(!d.is_scheduled(id));
        assert_eq!(d.restart(id, Duration::from_millis(1)), Err(MqttError::InvalidArgument));
    }

    #[test]
    fn socket_watches_are_one_shot_and_rearm_to_read() {
        let mut d = Dispatcher::new();
        let sock = SocketHandle(3);
        d.register_socket(sock, "read").unwrap();
        d.continue_when(sock, Interest::Write, "write").unwrap();
        let mut poll = FakePoll {
            ready: vec![(sock, Interest::Read), (sock, Interest::Write)],
            polls: 0,
        };
        assert_eq!(run(&mut d, at(0), &mut poll), ["write"]);
        assert_eq!(run(&mut d, at(0), &mut poll), ["read"]);
        assert_eq!(run(&mut d, at(0), &mut poll), ["read"]);

        assert!(d.unregister_socket(sock));
        assert!(run(&mut d, at(0), &mut poll).is_empty());
        assert_eq!(
            d.continue_when(sock, Interest::Read, "x"),
            Err(MqttError::InvalidArgument)
        );
    }

    #[test]
    fn ready_sockets_run_in_registration_order() {
        let mut d = Dispatcher::new();
        d.register_socket(SocketHandle(9), "nine").unwrap();
        d.register_socket(SocketHandle(2), "two").unwrap();
        let mut poll = FakePoll {
            ready: vec![(SocketHandle(2), Interest::Read), (SocketHandle(9), Interest::Read)],
            polls: 0,
        };
        assert_eq!(run(&mut d, at(0), &mut poll), ["nine", "two"]);
    }

    #[test]
    fn continues_while_a_handle_is_live() {
        let mut d = Dispatcher::new();
        assert!(!d.should_continue());
        let a = d.register_handle().unwrap();
        let b = d.register_handle().unwrap();
        assert_eq!(d.register_handle(), Err(MqttError::OutOfResources));
        assert!(d.unregister_handle(a));
        assert!(!d.unregister_handle(a));
        assert!(d.should_continue());

        let c = d.register_handle().unwrap();
        // Same slot, newer generation.
        assert!(!d.unregister_handle(a));
        assert!(d.unregister_handle(c));
        assert!(d.unregister_handle(b));
        assert!(!d.should_continue());

        let _ = d.register_handle().unwrap();
        d.stop();
        assert!(!d.should_continue());
    }

    #[test]
    fn handle_slots_beyond_u8_are_never_handed_out() {
        let mut d = EventDispatcher::<u8, 1, 1, 1, 300>::new();
        let handles: StdVec<HandleId> = (0..256).map(|_| d.register_handle().unwrap()).collect();
        assert_eq!(d.register_handle(), Err(MqttError::OutOfResources));
        assert_eq!(d.live_handles(), 256);
        assert!(d.unregister_handle(handles[255]));
        assert!(d.register_handle().is_ok());
    }

    #[test]
    fn full_queues_report_out_of_resources() {
        let mut d = EventDispatcher::<u8, 1, 1, 1, 1>::new();
        d.post(1).unwrap();
        assert_eq!(d.post(2), Err(MqttError::OutOfResources));
        d.execute_in(Duration::from_millis(1), 1).unwrap();
        assert_eq!(
            d.execute_in(Duration::from_millis(1), 2),
            Err(MqttError::OutOfResources)
        );
    }
}
