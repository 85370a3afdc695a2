// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sliding-window limiter for outbound Race Monitor calls.
//!
//! The budget is global: it counts calls across all credentials. A call is
//! recorded when it is dispatched, not when it completes, which bounds the
//! worst-case burst even if calls are slow or fail.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window rate limiter shared by every scheduler in the process.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    /// Dispatch times inside the current window, oldest first.
    ///
    /// The lock is held across the wait so prune, check and record happen as
    /// one step relative to other callers.
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `max_calls` is clamped to at least one.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a call is permitted, then record it.
    ///
    /// Returns how long the caller was held back.
    pub async fn reserve(&self) -> Duration {
        let mut calls = self.calls.lock().await;
        let mut waited = Duration::ZERO;

        loop {
            let now = Instant::now();
            self.prune(&mut calls, now);

            let oldest = match calls.front() {
                Some(&oldest) if calls.len() >= self.max_calls => oldest,
                _ => {
                    calls.push_back(now);
                    return waited;
                }
            };

            let wait = self.window.saturating_sub(now.duration_since(oldest));
            tracing::info!(
                wait_ms = wait.as_millis() as u64,
                max_calls = self.max_calls,
                window_secs = self.window.as_secs(),
                "Rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }

    /// Number of calls recorded in the current window.
    pub async fn recorded(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.prune(&mut calls, Instant::now());
        calls.len()
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = calls.front() {
            if now.duration_since(oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}
