//! # Resumable Functions
//!
//! Protocol steps over non-blocking I/O are written as ordinary functions that
//! dispatch on a saved continuation point, run forward until they either finish
//! or must wait, record where to pick up again, and return to the dispatcher.
//!
//! A body looks like this:
//!
//! ```ignore
//! fn step(&mut self, readable: bool) -> Step<Wait, usize> {
//!     loop {
//!         match self.co.point() {
//!             Point::Start => {
//!                 self.attempts = 0;
//!                 self.co.jump(Point::Read);
//!             }
//!             Point::Read => {
//!                 self.attempts += 1;
//!                 yield_until!(self.co, Point::Read, readable, Step::Suspend(Wait::Readable));
//!                 return self.co.complete(self.attempts);
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! Anything that must survive a suspension lives in the struct that owns the
//! [`Coroutine`], never in a stack local. A body must finish any cleanup before
//! it yields.

use core::fmt::Debug;

/// Continuation points of one coroutine body.
///
/// Each body declares its own enum, so a point can never be resumed by a
/// different body.
pub trait ResumePoint: Copy + PartialEq + Debug {
    /// The point a fresh or restarted body begins at.
    const START: Self;
}

/// Outcome of one invocation of a coroutine body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<W, T> {
    /// The body suspended and asks to be resumed once `W` holds.
    Suspend(W),
    /// The body ran to completion.
    Complete(T),
}

impl<W, T> Step<W, T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Step::Complete(_))
    }
}

/// Saved continuation state of one coroutine body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coroutine<P> {
    point: P,
    suspensions: u32,
}

impl<P: ResumePoint> Default for Coroutine<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ResumePoint> Coroutine<P> {
    pub const fn new() -> Self {
        Self {
            point: P::START,
            suspensions: 0,
        }
    }

    /// The point the body must dispatch to on this invocation.
    pub fn point(&self) -> P {
        self.point
    }

    /// True between the first suspension and completion.
    pub fn is_running(&self) -> bool {
        self.point != P::START
    }

    /// Number of times the body suspended since it last started.
    pub fn suspensions(&self) -> u32 {
        self.suspensions
    }

    /// Moves to `to` without returning to the caller.
    pub fn jump(&mut self, to: P) {
        self.point = to;
    }

    /// Records `at` as the continuation point of a suspension.
    pub fn park(&mut self, at: P) {
        self.point = at;
        self.suspensions = self.suspensions.saturating_add(1);
    }

    /// Records `at` and hands back the wait condition.
    pub fn suspend<W, T>(&mut self, at: P, wait: W) -> Step<W, T> {
        self.park(at);
        Step::Suspend(wait)
    }

    /// Finishes the body; the next invocation starts over.
    pub fn complete<W, T>(&mut self, value: T) -> Step<W, T> {
        self.reset();
        Step::Complete(value)
    }

    pub fn reset(&mut self) {
        self.point = P::START;
        self.suspensions = 0;
    }
}

/// Suspends at `$at`, returning `$ret`, unless `$ready` already holds.
///
/// When the body is resumed at `$at` the same guard is evaluated again, so a
/// satisfied guard falls through without another round trip.
#[macro_export]
macro_rules! yield_until {
    ($co:expr, $at:expr, $ready:expr, $ret:expr) => {
        if !$ready {
            $co.park($at);
            return $ret;
        }
    };
}

/// Unconditionally suspends, resuming at `$at` on the next invocation.
#[macro_export]
macro_rules! yield_now {
    ($co:expr, $at:expr, $ret:expr) => {{
        $co.park($at);
        return $ret;
    }};
}
