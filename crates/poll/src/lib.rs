//! Settle poll: bounded wait until a refreshed state reaches a target.
//!
//! A [`Convergence`] repeatedly calls a refresh function that reports the
//! current value and a state label. Ticks never overlap: the next refresh
//! starts only after the previous one returned and the backoff elapsed.

#![forbid(unsafe_code)]

use std::future::Future;
use std::time::Duration;

use metrics::{counter, histogram};
use settle_core::{Result, SettleError};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// First backoff step; doubled every tick.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Backoff never grows past this (unless `min_interval` is larger).
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// One wait: labels, timing, and how many consecutive target hits count as done.
#[derive(Debug, Clone)]
pub struct Convergence {
    subject: String,
    pending: Vec<String>,
    target: Vec<String>,
    timeout: Duration,
    delay: Duration,
    min_interval: Duration,
    poll_interval: Option<Duration>,
    continuous_target_occurrence: u32,
    not_found_state: Option<String>,
}

impl Convergence {
    pub fn new(subject: impl Into<String>, pending: &[&str], target: &[&str]) -> Self {
        Self {
            subject: subject.into(),
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(20 * 60),
            delay: Duration::ZERO,
            min_interval: Duration::ZERO,
            poll_interval: None,
            continuous_target_occurrence: 1,
            not_found_state: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }
    /// Sleep before the first refresh.
    pub fn delay(mut self, delay: Duration) -> Self { self.delay = delay; self }
    pub fn min_interval(mut self, d: Duration) -> Self { self.min_interval = d; self }
    /// Fixed spacing between ticks instead of exponential backoff.
    pub fn poll_interval(mut self, d: Option<Duration>) -> Self { self.poll_interval = d; self }
    pub fn continuous_target_occurrence(mut self, n: u32) -> Self { self.continuous_target_occurrence = n.max(1); self }
    /// Map a not-found refresh error to `state` instead of failing.
    pub fn treat_not_found_as(mut self, state: &str) -> Self { self.not_found_state = Some(state.to_string()); self }

    pub fn subject(&self) -> &str { &self.subject }

    /// Drive `refresh` until a target label is observed often enough.
    ///
    /// Returns the value from the final refresh (`None` when the final state
    /// came from a not-found error). Fails with `ConvergenceTimeout` once
    /// `timeout` elapses, the initial delay included.
    pub async fn wait<T, F, Fut>(&self, refresh: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(Option<T>, String)>>,
    {
        let t0 = Instant::now();
        let mut last_state: Option<String> = None;
        let res = tokio::time::timeout(self.timeout, self.run(refresh, &mut last_state)).await;
        histogram!("convergence_wait_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(out) => out,
            Err(_) => {
                counter!("convergence_timeouts_total", 1u64);
                warn!(subject = %self.subject, timeout = ?self.timeout, last_state = ?last_state, "gave up waiting");
                Err(SettleError::ConvergenceTimeout { subject: self.subject.clone(), timeout: self.timeout, last_state })
            }
        }
    }

    async fn run<T, F, Fut>(&self, mut refresh: F, last_state: &mut Option<String>) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(Option<T>, String)>>,
    {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let mut backoff = Duration::ZERO;
        let mut target_hits = 0u32;
        let mut tick = 0u64;
        loop {
            tick += 1;
            counter!("convergence_ticks_total", 1u64);
            let (value, state) = match refresh().await {
                Ok(observed) => observed,
                Err(e) if e.is_not_found() && self.not_found_state.is_some() => {
                    (None, self.not_found_state.clone().unwrap_or_default())
                }
                Err(e) => {
                    return Err(SettleError::Convergence { subject: self.subject.clone(), source: Box::new(e) });
                }
            };
            debug!(subject = %self.subject, tick, state = %state, "refreshed");
            *last_state = Some(state.clone());

            if self.target.contains(&state) {
                target_hits += 1;
                if target_hits >= self.continuous_target_occurrence {
                    return Ok(value);
                }
            } else if self.pending.contains(&state) {
                target_hits = 0;
            } else {
                return Err(SettleError::UnexpectedState { subject: self.subject.clone(), state, target: self.target.clone() });
            }

            backoff = self.next_wait(backoff);
            sleep(backoff).await;
        }
    }

    fn next_wait(&self, prev: Duration) -> Duration {
        if let Some(fixed) = self.poll_interval {
            return fixed.max(self.min_interval);
        }
        let grown = if prev.is_zero() { INITIAL_BACKOFF } else { prev.saturating_mul(2) };
        grown.min(MAX_BACKOFF).max(self.min_interval)
    }
}
