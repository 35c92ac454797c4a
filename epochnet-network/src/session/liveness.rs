use std::time::{Duration, Instant};

use tracing::debug;

use crate::protocol::{Command, Error, Nonce, TimeoutKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle { next_ping: Instant },
    Awaiting { nonce: Nonce, deadline: Instant },
}

/// Pings the peer on an interval and expects the nonce echoed back in time
#[derive(Debug)]
pub struct LivenessMonitor {
    interval: Duration,
    timeout: Duration,
    state: State,
}

impl LivenessMonitor {
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            state: State::Idle {
                next_ping: now + interval,
            },
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Emits a `Ping` when one is due
    pub fn poll(&mut self, now: Instant, nonce: impl FnOnce() -> Nonce) -> Option<Command> {
        match self.state {
            State::Idle { next_ping } if now >= next_ping => {
                let nonce = nonce();

                self.state = State::Awaiting {
                    nonce,
                    deadline: now + self.timeout,
                };

                Some(Command::Ping(nonce))
            }
            _ => None,
        }
    }

    /// Applies a `Pong`; one that doesn't match the outstanding ping is
    /// ignored. Returns whether it was accepted.
    pub fn on_pong(&mut self, nonce: Nonce, now: Instant) -> bool {
        match self.state {
            State::Awaiting { nonce: expected, .. } if expected == nonce => {
                self.state = State::Idle {
                    next_ping: now + self.interval,
                };

                true
            }
            _ => {
                debug!(nonce, "ignoring unexpected pong");
                false
            }
        }
    }

    pub fn check(&self, now: Instant) -> Result<(), Error> {
        match self.state {
            State::Awaiting { deadline, .. } if now >= deadline => {
                Err(Error::Timeout(TimeoutKind::Liveness))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);
    const TIMEOUT: Duration = Duration::from_secs(10);

    #[test]
    fn matching_pong_keeps_peer_alive() {
        let t0 = Instant::now();
        let mut m = LivenessMonitor::new(INTERVAL, TIMEOUT, t0);

        assert_eq!(m.poll(t0, || 42), None);

        let t1 = t0 + INTERVAL;
        assert_eq!(m.poll(t1, || 42), Some(Command::Ping(42)));
        assert_eq!(m.poll(t1, || 43), None);

        assert!(m.on_pong(42, t1 + Duration::from_secs(1)));
        assert!(m.check(t1 + TIMEOUT).is_ok());
        assert!(matches!(m.state(), State::Idle { .. }));
    }

    #[test]
    fn mismatched_pong_is_ignored() {
        let t0 = Instant::now();
        let mut m = LivenessMonitor::new(INTERVAL, TIMEOUT, t0);

        m.poll(t0 + INTERVAL, || 42);

        assert!(!m.on_pong(7, t0 + INTERVAL));
        assert!(matches!(m.state(), State::Awaiting { nonce: 42, .. }));
    }

    #[test]
    fn missing_pong_times_out() {
        let t0 = Instant::now();
        let mut m = LivenessMonitor::new(INTERVAL, TIMEOUT, t0);

        let t1 = t0 + INTERVAL;
        m.poll(t1, || 42);

        assert!(m.check(t1 + TIMEOUT - Duration::from_millis(1)).is_ok());
        assert_eq!(
            m.check(t1 + TIMEOUT),
            Err(Error::Timeout(TimeoutKind::Liveness))
        );
    }

    #[test]
    fn unsolicited_pong_is_ignored_when_idle() {
        let mut m = LivenessMonitor::new(INTERVAL, TIMEOUT, Instant::now());
        assert!(!m.on_pong(42, Instant::now()));
    }
}
