//! Agent connection lifecycle
//!
//! `disconnected -> connecting -> connected`, `connected -> reconnect-pending
//! -> connecting` on loss, and `* -> fatal` when the relay sends `error`.
//! Reconnects use a fixed two second delay and give up after five
//! consecutive failures without an intervening `welcome`.

use std::time::Duration;
use tracing::debug;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Fixed wait before every reconnect
    pub delay: Duration,
    /// Maximum consecutive failures before giving up (None = unlimited)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            max_attempts: Some(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectPending,
    Fatal,
}

/// What to do after a connection was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then reconnect
    Retry { attempt: usize, delay: Duration },
    /// Failure budget exhausted
    GiveUp { attempts: usize },
    /// A reconnect is already scheduled; this loss is the same event
    AlreadyPending,
    /// The relay rejected us; never reconnect
    Fatal,
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    config: ReconnectConfig,
    state: ConnectionState,
    consecutive_failures: usize,
}

impl ConnectionLifecycle {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures
    }

    pub fn max_attempts(&self) -> Option<usize> {
        self.config.max_attempts
    }

    /// Enter `connecting`. Returns false once fatal.
    pub fn begin_connect(&mut self) -> bool {
        if self.state == ConnectionState::Fatal {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Registration accepted: reset the failure budget
    pub fn on_welcome(&mut self) {
        if self.state == ConnectionState::Fatal {
            return;
        }
        debug!("Resetting reconnection failure counter");
        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;
    }

    /// The relay sent an `error` message
    pub fn on_server_error(&mut self) {
        self.state = ConnectionState::Fatal;
    }

    /// The socket closed or errored
    pub fn on_connection_lost(&mut self) -> ReconnectDecision {
        match self.state {
            ConnectionState::Fatal => return ReconnectDecision::Fatal,
            ConnectionState::ReconnectPending => return ReconnectDecision::AlreadyPending,
            _ => {}
        }

        self.consecutive_failures += 1;

        if let Some(max_attempts) = self.config.max_attempts {
            if self.consecutive_failures > max_attempts {
                self.state = ConnectionState::Disconnected;
                return ReconnectDecision::GiveUp {
                    attempts: self.consecutive_failures,
                };
            }
        }

        self.state = ConnectionState::ReconnectPending;
        ReconnectDecision::Retry {
            attempt: self.consecutive_failures,
            delay: self.config.delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry(lifecycle: &mut ConnectionLifecycle) -> (usize, Duration) {
        match lifecycle.on_connection_lost() {
            ReconnectDecision::Retry { attempt, delay } => (attempt, delay),
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_happy_path_states() {
        let mut lifecycle = ConnectionLifecycle::new(ReconnectConfig::default());
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);

        assert!(lifecycle.begin_connect());
        assert_eq!(lifecycle.state(), ConnectionState::Connecting);

        lifecycle.on_welcome();
        assert_eq!(lifecycle.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_fixed_two_second_retries_then_give_up() {
        let mut lifecycle = ConnectionLifecycle::new(ReconnectConfig::default());

        for expected in 1..=5 {
            lifecycle.begin_connect();
            let (attempt, delay) = retry(&mut lifecycle);
            assert_eq!(attempt, expected);
            assert_eq!(delay, Duration::from_secs(2));
            assert_eq!(lifecycle.state(), ConnectionState::ReconnectPending);
        }

        lifecycle.begin_connect();
        assert_eq!(
            lifecycle.on_connection_lost(),
            ReconnectDecision::GiveUp { attempts: 6 }
        );
    }

    #[test]
    fn test_welcome_resets_failure_counter() {
        let mut lifecycle = ConnectionLifecycle::new(ReconnectConfig::default());

        for _ in 0..4 {
            lifecycle.begin_connect();
            retry(&mut lifecycle);
        }
        assert_eq!(lifecycle.consecutive_failures(), 4);

        lifecycle.begin_connect();
        lifecycle.on_welcome();
        assert_eq!(lifecycle.consecutive_failures(), 0);

        lifecycle.begin_connect();
        assert_eq!(retry(&mut lifecycle).0, 1);
    }

    #[test]
    fn test_losses_coalesce_while_pending() {
        let mut lifecycle = ConnectionLifecycle::new(ReconnectConfig::default());
        lifecycle.begin_connect();

        retry(&mut lifecycle);
        assert_eq!(
            lifecycle.on_connection_lost(),
            ReconnectDecision::AlreadyPending
        );
        assert_eq!(lifecycle.consecutive_failures(), 1);
    }

    #[test]
    fn test_server_error_is_fatal() {
        let mut lifecycle = ConnectionLifecycle::new(ReconnectConfig::default());
        lifecycle.begin_connect();
        lifecycle.on_server_error();

        assert_eq!(lifecycle.state(), ConnectionState::Fatal);
        assert_eq!(lifecycle.on_connection_lost(), ReconnectDecision::Fatal);
        assert!(!lifecycle.begin_connect());

        lifecycle.on_welcome();
        assert_eq!(lifecycle.state(), ConnectionState::Fatal);
    }

    #[test]
    fn test_configured_delay_is_used_for_every_retry() {
        let mut lifecycle = ConnectionLifecycle::new(ReconnectConfig {
            delay: Duration::from_millis(250),
            max_attempts: None,
        });

        let delays: Vec<Duration> = (0..8)
            .map(|_| {
                lifecycle.begin_connect();
                retry(&mut lifecycle).1
            })
            .collect();

        assert_eq!(delays, vec![Duration::from_millis(250); 8]);
        assert_eq!(lifecycle.consecutive_failures(), 8);
    }
}
