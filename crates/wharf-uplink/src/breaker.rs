//! Per-uplink circuit breaker.
//!
//! After `max_fails` consecutive failures inside the failure window the
//! breaker opens and calls fail fast until the window elapses, at which
//! point one probe is let through.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub(crate) struct CircuitBreaker {
    max_fails: u32,
    window: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    consecutive_fails: u32,
    last_fail: Option<Instant>,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(max_fails: u32, window: Duration) -> Self {
        CircuitBreaker {
            max_fails,
            window,
            state: Mutex::new(State::default()),
        }
    }

    /// Whether a call may proceed. `false` means fail fast.
    pub fn allows(&self) -> bool {
        let mut state = self.state.lock().expect("breaker state poisoned");
        match state.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                // cool-down over: half-open, admit one probe
                state.open_until = None;
                state.consecutive_fails = 0;
                true
            }
            None => true,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker state poisoned");
        state.consecutive_fails = 0;
        state.last_fail = None;
        state.open_until = None;
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().expect("breaker state poisoned");

        let within_window = state
            .last_fail
            .is_some_and(|last| now.duration_since(last) <= self.window);
        state.consecutive_fails = if within_window {
            state.consecutive_fails + 1
        } else {
            1
        };
        state.last_fail = Some(now);

        if state.consecutive_fails >= self.max_fails {
            state.open_until = Some(now + self.window);
        }
    }
}
