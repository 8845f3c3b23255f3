//! Sliding-window admission control for outbound provider calls.
//!
//! One limiter is shared by every concurrently-running job. Admission needs
//! both budgets at once: fewer than `max_requests_per_window` requests in the
//! trailing window, and room for the request's token cost under
//! `max_tokens_per_window`. The check and the registration happen in a single
//! critical section, so the aggregate admitted rate stays within budget no
//! matter how many tasks race on `schedule`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::types::FailureKind;
use crate::SpeechError;

/// Budgets for one sliding window.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub max_requests_per_window: usize,
    pub max_tokens_per_window: u32,
    pub window: Duration,
    /// Lower bound on every computed wait. Keeps retry storms away and
    /// bounds starvation: a suspended caller always retries eventually.
    pub min_backoff: Duration,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            max_requests_per_window: 50,
            max_tokens_per_window: 50_000,
            window: Duration::from_secs(60),
            min_backoff: Duration::from_millis(250),
        }
    }
}

/// Observability hook invoked before each wait with the computed wait
/// duration and the attempt count for this `schedule` call.
pub type ThrottleHook = Arc<dyn Fn(Duration, u32) + Send + Sync>;

/// Why a `schedule` call gave up without running its task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// `cost` can never fit the window, so waiting is pointless.
    #[error("request cost {cost} exceeds the total token budget {budget}")]
    BudgetExceeded { cost: u32, budget: u32 },
    #[error("cancelled while waiting for admission")]
    Cancelled,
}

impl From<ScheduleError> for SpeechError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::BudgetExceeded { cost, budget } => SpeechError::new(
                FailureKind::BudgetExceeded { cost, budget },
                format!("cost {cost} over budget {budget}"),
            ),
            ScheduleError::Cancelled => {
                SpeechError::new(FailureKind::Cancelled, "cancelled during limiter wait")
            }
        }
    }
}

struct WindowState {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u32)>,
    token_total: u64,
}

impl WindowState {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            tokens: VecDeque::new(),
            token_total: 0,
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&stamp) = self.requests.front() {
            if now.duration_since(stamp) < window {
                break;
            }
            self.requests.pop_front();
        }
        while let Some(&(stamp, amount)) = self.tokens.front() {
            if now.duration_since(stamp) < window {
                break;
            }
            self.token_total -= u64::from(amount);
            self.tokens.pop_front();
        }
    }

    fn admit(&mut self, now: Instant, cost: u32) {
        self.requests.push_back(now);
        self.tokens.push_back((now, cost));
        self.token_total += u64::from(cost);
    }
}

/// Shared sliding-window rate limiter over request count and token cost.
pub struct SlidingWindowLimiter {
    settings: LimiterSettings,
    window: Mutex<WindowState>,
    throttle_hook: Option<ThrottleHook>,
}

impl SlidingWindowLimiter {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            settings,
            window: Mutex::new(WindowState::new()),
            throttle_hook: None,
        }
    }

    pub fn with_throttle_hook(mut self, hook: ThrottleHook) -> Self {
        self.throttle_hook = Some(hook);
        self
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    /// Suspends until both window budgets admit a request of `cost` tokens,
    /// registers it, then runs `task` and propagates its output unchanged.
    ///
    /// A `cost` larger than the whole token budget fails immediately with
    /// [`ScheduleError::BudgetExceeded`]; it is never retried. Cancelling
    /// `cancel` abandons a pending wait with [`ScheduleError::Cancelled`].
    /// Ordering between concurrent callers is FIFO-ish, not guaranteed.
    pub async fn schedule<T, F, Fut>(
        &self,
        cost: u32,
        cancel: &CancellationToken,
        task: F,
    ) -> Result<T, ScheduleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if cost > self.settings.max_tokens_per_window {
            return Err(ScheduleError::BudgetExceeded {
                cost,
                budget: self.settings.max_tokens_per_window,
            });
        }

        let mut attempt: u32 = 0;
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now, self.settings.window);
                let admitted = window.requests.len() < self.settings.max_requests_per_window
                    && window.token_total + u64::from(cost)
                        <= u64::from(self.settings.max_tokens_per_window);
                if admitted {
                    window.admit(now, cost);
                    None
                } else {
                    Some(self.wait_duration(&window, now, cost))
                }
            };

            let Some(wait) = wait else {
                return Ok(task().await);
            };

            attempt += 1;
            if let Some(hook) = &self.throttle_hook {
                hook(wait, attempt);
            }
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(ScheduleError::Cancelled),
            }
        }
    }

    /// Wait until the blocking budget frees up: time to the oldest request's
    /// expiry if the request cap blocks, time until enough token records
    /// expire if the token cap blocks, floored at `min_backoff`.
    fn wait_duration(&self, window: &WindowState, now: Instant, cost: u32) -> Duration {
        let mut wait = self.settings.min_backoff;

        if window.requests.len() >= self.settings.max_requests_per_window {
            if let Some(&oldest) = window.requests.front() {
                let until_expiry = (oldest + self.settings.window).saturating_duration_since(now);
                wait = wait.max(until_expiry);
            }
        }

        if window.token_total + u64::from(cost) > u64::from(self.settings.max_tokens_per_window) {
            let mut freed: u64 = 0;
            for &(stamp, amount) in &window.tokens {
                freed += u64::from(amount);
                let remaining = window.token_total - freed + u64::from(cost);
                if remaining <= u64::from(self.settings.max_tokens_per_window) {
                    let until_expiry =
                        (stamp + self.settings.window).saturating_duration_since(now);
                    wait = wait.max(until_expiry);
                    break;
                }
            }
        }

        wait
    }
}
