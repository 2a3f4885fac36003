use std::time::{Duration, Instant};

use crate::config::ChatConfig;

/// Outcome of asking the governor for permission to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Too close to the previous accepted send; wait this many whole seconds.
    TooSoon { wait_secs: u64 },
    /// The rolling-window send cap is exhausted.
    WindowExhausted,
}

/// Local send-rate limiter: a minimum inter-request interval plus a
/// sliding-window cap on accepted sends.
///
/// Advisory only — the backend enforces the real quota. This exists to cut
/// wasted round trips and user-visible spam, not to guarantee fairness.
#[derive(Debug)]
pub struct RateGovernor {
    min_interval: Duration,
    window: Duration,
    window_limit: u32,
    window_count: u32,
    window_reset_at: Option<Instant>,
    last_accepted: Option<Instant>,
}

impl RateGovernor {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            min_interval: config.min_send_interval,
            window: config.window,
            window_limit: config.window_limit,
            window_count: 0,
            window_reset_at: None,
            last_accepted: None,
        }
    }

    /// Check whether a send may go out at `now`, recording it if allowed.
    /// Rejected attempts are never recorded.
    pub fn check_and_record(&mut self, now: Instant) -> RateDecision {
        if let Some(last) = self.last_accepted {
            let elapsed = now.duration_since(last);
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                // Round up so the caller never retries early.
                let wait_secs = remaining.as_secs_f64().ceil() as u64;
                return RateDecision::TooSoon { wait_secs };
            }
        }

        // Reset the window before evaluating the cap.
        match self.window_reset_at {
            Some(reset) if now.duration_since(reset) > self.window => {
                self.window_reset_at = Some(now);
                self.window_count = 0;
            }
            None => self.window_reset_at = Some(now),
            _ => {}
        }

        if self.window_count >= self.window_limit {
            return RateDecision::WindowExhausted;
        }

        self.window_count += 1;
        self.last_accepted = Some(now);
        RateDecision::Allowed
    }

    /// Forget all recorded sends (session reset).
    pub fn reset(&mut self) {
        self.window_count = 0;
        self.window_reset_at = None;
        self.last_accepted = None;
    }
}
