//! Per-provider call budget over a rolling one-minute window.
//!
//! Each provider client owns one [`RateLimiter`]; every caller sharing that
//! client funnels through it. The check, wait and record steps run inside a
//! single async mutex, so concurrent callers can never observe a free slot
//! twice. The lock is released when a waiting caller is dropped, so an
//! abandoned request never stalls the callers queued behind it.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ProviderId;

const WINDOW: Duration = Duration::from_secs(60);

/// Point-in-time view of a limiter's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterState {
    /// Grants inside the current rolling window.
    pub call_count: u32,
    /// Time of the oldest grant still inside the window.
    pub window_start: Option<Instant>,
}

#[derive(Debug, Default)]
struct GrantLog {
    grants: VecDeque<Instant>,
}

impl GrantLog {
    fn evict_expired(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.grants.front() {
            if now.duration_since(*oldest) >= window {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Blocks callers once `max_calls_per_minute` grants fall inside the last 60s.
#[derive(Debug)]
pub struct RateLimiter {
    provider: ProviderId,
    max_calls: u32,
    window: Duration,
    log: Mutex<GrantLog>,
}

impl RateLimiter {
    pub fn new(provider: ProviderId, max_calls_per_minute: u32) -> Self {
        Self::with_window(provider, max_calls_per_minute, WINDOW)
    }

    pub fn with_window(provider: ProviderId, max_calls: u32, window: Duration) -> Self {
        Self {
            provider,
            max_calls: max_calls.max(1),
            window,
            log: Mutex::new(GrantLog::default()),
        }
    }

    pub const fn provider(&self) -> ProviderId {
        self.provider
    }

    pub const fn max_calls_per_minute(&self) -> u32 {
        self.max_calls
    }

    /// Wait until a call slot is free, then claim it.
    pub async fn acquire(&self) {
        let mut log = self.log.lock().await;
        loop {
            let now = Instant::now();
            log.evict_expired(now, self.window);

            if log.grants.len() < self.max_calls as usize {
                log.grants.push_back(now);
                return;
            }

            let Some(oldest) = log.grants.front().copied() else {
                continue;
            };
            let resume_at = oldest + self.window;
            tracing::info!(
                provider = %self.provider,
                max_calls = self.max_calls,
                wait_ms = resume_at.saturating_duration_since(now).as_millis() as u64,
                "rate limit reached, waiting for window"
            );
            tokio::time::sleep_until(resume_at).await;
        }
    }

    pub async fn state(&self) -> RateLimiterState {
        let mut log = self.log.lock().await;
        log.evict_expired(Instant::now(), self.window);
        RateLimiterState {
            call_count: log.grants.len() as u32,
            window_start: log.grants.front().copied(),
        }
    }
}
