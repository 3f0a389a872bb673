//! # Reconnect Backoff
//!
//! Every failed connection raises the backoff level by one. The delay before
//! the next attempt is the level's base penalty plus random jitter drawn from
//! the previous level's range, so devices that lost the broker together do not
//! come back together.
//!
//! The level only drops while connections succeed: after each raise a
//! cooldown timer is armed with the level's decay interval, and each time it
//! fires with the last outcome successful the level goes down one step.

use embassy_time::Duration;

use crate::bsp::RngBsp;
use crate::error::{ConnectReasonCode, MqttError};

/// Base penalty per level, in seconds.
pub const PENALTY_LUT: [u32; 10] = [0, 2, 4, 8, 16, 32, 64, 128, 256, 512];

/// Time a level must go without failures before it decays, in seconds.
pub const DECAY_LUT: [u32; 10] = [4, 4, 8, 16, 30, 30, 30, 30, 30, 30];

/// How the last connection outcome affects reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackoffClass {
    /// Clean close or success; no penalty applies.
    None,
    /// Worth retrying after the penalty.
    Recoverable,
    /// Retrying cannot help.
    Terminal,
}

/// Classifies how a connection ended. `None` is a clean close.
pub fn classify(outcome: Option<&MqttError>) -> BackoffClass {
    match outcome {
        None => BackoffClass::None,
        Some(MqttError::ConnectionRefused(
            ConnectReasonCode::UnacceptableProtocolVersion
            | ConnectReasonCode::IdentifierRejected
            | ConnectReasonCode::BadUserNameOrPassword
            | ConnectReasonCode::NotAuthorized,
        )) => BackoffClass::Terminal,
        Some(MqttError::InvalidArgument | MqttError::LayerNotInitialized) => BackoffClass::Terminal,
        Some(_) => BackoffClass::Recoverable,
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    level: usize,
    class: BackoffClass,
    attempts: u32,
    max_interval: Duration,
    max_attempts: Option<u32>,
}

impl Backoff {
    pub const fn new(max_interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            level: 0,
            class: BackoffClass::None,
            attempts: 0,
            max_interval,
            max_attempts,
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn class(&self) -> BackoffClass {
        self.class
    }

    /// Failed attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failed or closed connection.
    ///
    /// Returns the delay before the next attempt, or `None` when no attempt
    /// should follow.
    pub fn fail(&mut self, outcome: Option<&MqttError>, rng: &mut dyn RngBsp) -> Option<Duration> {
        self.class = classify(outcome);
        if self.class == BackoffClass::None {
            return None;
        }
        self.level = (self.level + 1).min(PENALTY_LUT.len() - 1);
        if self.class == BackoffClass::Terminal {
            debug!("terminal failure, backoff level {}", self.level);
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        if self.max_attempts.is_some_and(|max| self.attempts >= max) {
            warn!("giving up after {} attempts", self.attempts);
            self.class = BackoffClass::Terminal;
            return None;
        }
        Some(self.penalty(rng))
    }

    /// Records an established session.
    pub fn succeed(&mut self) {
        self.class = BackoffClass::None;
        self.attempts = 0;
    }

    /// Delay of the cooldown timer for the current level, if one is needed.
    pub fn cooldown(&self) -> Option<Duration> {
        (self.level > 0).then(|| Duration::from_secs(u64::from(DECAY_LUT[self.level])))
    }

    /// The cooldown timer fired. Returns the delay to re-arm it with.
    pub fn decay(&mut self) -> Option<Duration> {
        if self.class == BackoffClass::None && self.level > 0 {
            self.level -= 1;
            trace!("backoff decayed to level {}", self.level);
        }
        self.cooldown()
    }

    /// Jittered penalty of the current level.
    pub fn penalty(&self, rng: &mut dyn RngBsp) -> Duration {
        let base = PENALTY_LUT[self.level];
        let range = match self.level {
            0 => 0,
            level => PENALTY_LUT[level - 1],
        };
        let jitter = rng.next_u32() % (range + 1);
        let secs = (base + jitter)
            .saturating_sub(core::cmp::max(range / 2, 1))
            .max(PENALTY_LUT[0]);
        Duration::from_secs(u64::from(secs)).min(self.max_interval)
    }

    pub fn reset(&mut self) {
        self.level = 0;
        self.class = BackoffClass::None;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::NetError;

    /// Returns the same value on every draw.
    struct Fixed(u32);

    impl RngBsp for Fixed {
        fn next_u32(&mut self) -> u32 {
            self.0
        }
    }

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(600), None)
    }

    #[test]
    fn refusals_that_retrying_cannot_fix_are_terminal() {
        for code in [
            ConnectReasonCode::UnacceptableProtocolVersion,
            ConnectReasonCode::IdentifierRejected,
            ConnectReasonCode::BadUserNameOrPassword,
            ConnectReasonCode::NotAuthorized,
        ] {
            assert_eq!(
                classify(Some(&MqttError::ConnectionRefused(code))),
                BackoffClass::Terminal
            );
        }
        assert_eq!(
            classify(Some(&MqttError::ConnectionRefused(ConnectReasonCode::ServerUnavailable))),
            BackoffClass::Recoverable
        );
        assert_eq!(classify(Some(&MqttError::ConnectionReset)), BackoffClass::Recoverable);
        assert_eq!(
            classify(Some(&MqttError::Transport(NetError::Failed))),
            BackoffClass::Recoverable
        );
        assert_eq!(classify(None), BackoffClass::None);
    }

    #[test]
    fn penalties_grow_with_level_and_stay_in_range() {
        let mut b = backoff();
        let mut rng = Fixed(0);
        // Level 1: 2 - max(0 / 2, 1)
        assert_eq!(b.fail(Some(&MqttError::Timeout), &mut rng), Some(Duration::from_secs(1)));
        // Level 2: 4 + 0 - 1
        assert_eq!(b.fail(Some(&MqttError::Timeout), &mut rng), Some(Duration::from_secs(3)));
        let mut high = Fixed(u32::MAX);
        for _ in 0..20 {
            let delay = b.fail(Some(&MqttError::Timeout), &mut high).unwrap();
            let level = b.level();
            let base = u64::from(PENALTY_LUT[level]);
            let range = u64::from(PENALTY_LUT[level - 1]);
            assert!(delay.as_secs() + (range / 2).max(1) >= base);
            assert!(delay.as_secs() <= base + range);
        }
        assert_eq!(b.level(), PENALTY_LUT.len() - 1);
    }

    #[test]
    fn max_interval_caps_the_penalty() {
        let mut b = Backoff::new(Duration::from_secs(5), None);
        let mut rng = Fixed(7);
        for _ in 0..6 {
            let delay = b.fail(Some(&MqttError::ConnectionReset), &mut rng).unwrap();
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn decay_lowers_the_level_only_after_success() {
        let mut b = backoff();
        let mut rng = Fixed(0);
        b.fail(Some(&MqttError::Timeout), &mut rng);
        b.fail(Some(&MqttError::Timeout), &mut rng);
        assert_eq!(b.cooldown(), Some(Duration::from_secs(8)));
        // Still failing: the timer re-arms but the level holds.
        assert_eq!(b.decay(), Some(Duration::from_secs(8)));
        assert_eq!(b.level(), 2);

        b.succeed();
        assert_eq!(b.decay(), Some(Duration::from_secs(4)));
        assert_eq!(b.level(), 1);
        assert_eq!(b.decay(), None);
        assert_eq!(b.level(), 0);
    }

    #[test]
    fn clean_close_and_terminal_failures_do_not_reconnect() {
        let mut b = backoff();
        let mut rng = Fixed(0);
        assert_eq!(b.fail(None, &mut rng), None);
        assert_eq!(b.level(), 0);
        let refused = MqttError::ConnectionRefused(ConnectReasonCode::NotAuthorized);
        assert_eq!(b.fail(Some(&refused), &mut rng), None);
        assert_eq!(b.class(), BackoffClass::Terminal);
        assert_eq!(b.level(), 1);
    }

    #[test]
    fn attempt_limit_turns_terminal() {
        let mut b = Backoff::new(Duration::from_secs(600), Some(3));
        let mut rng = Fixed(0);
        assert!(b.fail(Some(&MqttError::Timeout), &mut rng).is_some());
        assert!(b.fail(Some(&MqttError::Timeout), &mut rng).is_some());
        assert_eq!(b.fail(Some(&MqttError::Timeout), &mut rng), None);
        assert_eq!(b.class(), BackoffClass::Terminal);

        b.succeed();
        assert_eq!(b.attempts(), 0);
    }
}
