//! Fixed-window rate limiting for the guard
//!
//! The window rolls over lazily: a call issued 60 seconds or more after the
//! last accepted request starts a fresh window. There is no background timer.

use crate::config::SecurityConfig;
use governor::clock::{Clock, DefaultClock, Reference};
use std::time::Duration;
use tokio::sync::Mutex;

/// Length of one rate-limit window
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct WindowState<I> {
    request_count: u32,
    /// `None` until the first accepted request
    window_start: Option<I>,
}

/// Request counter guarding the external call
pub struct RateLimiter<C: Clock = DefaultClock> {
    enabled: bool,
    max_requests_per_minute: u32,
    clock: C,
    state: Mutex<WindowState<C::Instant>>,
}

impl RateLimiter<DefaultClock> {
    /// Create a rate limiter on the monotonic system clock
    pub fn new(config: &SecurityConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter reading time from `clock`
    pub fn with_clock(config: &SecurityConfig, clock: C) -> Self {
        Self {
            enabled: config.enable_rate_limiting,
            max_requests_per_minute: config.max_requests_per_minute,
            clock,
            state: Mutex::new(WindowState {
                request_count: 0,
                window_start: None,
            }),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn limit(&self) -> u32 {
        self.max_requests_per_minute
    }

    /// Check whether a request may proceed, counting it if so
    pub async fn check_rate_limit(&self) -> bool {
        if !self.enabled {
            return true;
        }

        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if self.in_window(&state, now) {
            if state.request_count >= self.max_requests_per_minute {
                return false;
            }
        } else {
            state.request_count = 0;
        }

        state.request_count += 1;
        state.window_start = Some(now);
        true
    }

    /// Current limit status, without counting a request
    pub async fn status(&self) -> RateLimitStatus {
        if !self.enabled {
            return RateLimitStatus {
                allowed: true,
                remaining: self.max_requests_per_minute,
                reset_in: None,
            };
        }

        let now = self.clock.now();
        let state = self.state.lock().await;

        match state.window_start {
            Some(start) if self.in_window(&state, now) => {
                let elapsed = Duration::from(now.duration_since(start));
                let remaining = self
                    .max_requests_per_minute
                    .saturating_sub(state.request_count);
                RateLimitStatus {
                    allowed: remaining > 0,
                    remaining,
                    reset_in: Some(WINDOW.saturating_sub(elapsed)),
                }
            }
            _ => RateLimitStatus {
                allowed: true,
                remaining: self.max_requests_per_minute,
                reset_in: None,
            },
        }
    }

    /// Requests counted in the current window
    pub async fn request_count(&self) -> u32 {
        self.state.lock().await.request_count
    }

    fn in_window(&self, state: &WindowState<C::Instant>, now: C::Instant) -> bool {
        match state.window_start {
            Some(start) => Duration::from(now.duration_since(start)) < WINDOW,
            None => false,
        }
    }
}

/// Rate limit status
#[derive(Debug, Clone)]
pub struct RateLimitStatus {
    /// Whether the next request would be allowed
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Time until the window rolls over
    pub reset_in: Option<Duration>,
}
