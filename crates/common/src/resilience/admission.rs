//! Per-resource admission gate
//!
//! A gate evaluates a threshold rule on every call. The rule is passed in per
//! call rather than stored, so the gate only keeps the counters that the
//! threshold is checked against.
//!
//! - `Qps` grade counts admissions in one-second windows.
//! - `Concurrency` grade counts calls currently holding a ticket.
//!
//! Control behaviors (QPS grade only; concurrency always acts as `Direct`):
//! - `Direct` rejects over-limit calls immediately.
//! - `WarmUp` starts at `threshold / cold_factor` after a cold start and
//!   ramps linearly to `threshold` over `period`.
//! - `RateLimiter` paces calls one every `1s / threshold` and makes a caller
//!   wait for its slot, rejecting when the slot is more than
//!   `max_queue_wait` away.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use super::clock::{Clock, SystemClock};

const WINDOW: Duration = Duration::from_secs(1);

/// What the threshold counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionGrade {
    Qps,
    Concurrency,
}

/// How over-limit traffic is handled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlBehavior {
    Direct,
    WarmUp { period: Duration, cold_factor: u32 },
    RateLimiter { max_queue_wait: Duration },
}

/// Threshold rule evaluated by [`AdmissionGate`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionRule {
    pub grade: AdmissionGrade,
    pub threshold: f64,
    pub behavior: ControlBehavior,
}

/// Held for the duration of an admitted call. Releases a concurrency slot on
/// drop when the rule was concurrency-graded.
#[derive(Debug)]
pub struct AdmissionTicket {
    in_flight: Option<Arc<AtomicUsize>>,
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Result of one admission check
#[derive(Debug)]
pub enum AdmissionDecision {
    Admitted(AdmissionTicket),
    /// Admitted once the caller has waited for its paced slot
    AdmittedAfter(Duration, AdmissionTicket),
    Rejected,
}

#[derive(Debug)]
struct QpsState {
    window_start: Option<Instant>,
    passed_in_window: u64,
    cold_start: Option<Instant>,
    last_pass: Option<Instant>,
    latest_slot: Option<Instant>,
}

/// Admission gate for one resource key
pub struct AdmissionGate<C: Clock = SystemClock> {
    clock: Arc<C>,
    qps: Mutex<QpsState>,
    in_flight: Arc<AtomicUsize>,
}

impl Default for AdmissionGate<SystemClock> {
    fn default() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl AdmissionGate<SystemClock> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> AdmissionGate<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock: Arc::new(clock),
            qps: Mutex::new(QpsState {
                window_start: None,
                passed_in_window: 0,
                cold_start: None,
                last_pass: None,
                latest_slot: None,
            }),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Evaluate `rule` for one call without waiting.
    pub fn try_enter(&self, rule: &AdmissionRule) -> AdmissionDecision {
        if !(rule.threshold > 0.0) {
            return AdmissionDecision::Rejected;
        }
        match rule.grade {
            AdmissionGrade::Concurrency => self.enter_concurrency(rule.threshold),
            AdmissionGrade::Qps => match rule.behavior {
                ControlBehavior::Direct => self.enter_window(rule.threshold),
                ControlBehavior::WarmUp { period, cold_factor } => {
                    let allowed = self.warm_up_threshold(rule.threshold, period, cold_factor);
                    self.enter_window(allowed)
                }
                ControlBehavior::RateLimiter { max_queue_wait } => {
                    self.enter_paced(rule.threshold, max_queue_wait)
                }
            },
        }
    }

    /// Evaluate `rule`, sleeping for a paced slot when the rule asks for it.
    pub async fn enter(&self, rule: &AdmissionRule) -> Option<AdmissionTicket> {
        match self.try_enter(rule) {
            AdmissionDecision::Admitted(ticket) => Some(ticket),
            AdmissionDecision::AdmittedAfter(wait, ticket) => {
                tokio::time::sleep(wait).await;
                Some(ticket)
            }
            AdmissionDecision::Rejected => None,
        }
    }

    /// Calls currently holding a concurrency ticket
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn enter_concurrency(&self, threshold: f64) -> AdmissionDecision {
        let limit = threshold.floor() as usize;
        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .is_ok();
        if admitted {
            AdmissionDecision::Admitted(AdmissionTicket { in_flight: Some(Arc::clone(&self.in_flight)) })
        } else {
            trace!(limit, "Concurrency admission rejected");
            AdmissionDecision::Rejected
        }
    }

    fn enter_window(&self, allowed: f64) -> AdmissionDecision {
        let now = self.clock.now();
        let mut state = self.qps.lock();

        let expired = state.window_start.map_or(true, |start| now.duration_since(start) >= WINDOW);
        if expired {
            state.window_start = Some(now);
            state.passed_in_window = 0;
        }

        if (state.passed_in_window as f64) < allowed.floor().max(1.0) {
            state.passed_in_window += 1;
            state.last_pass = Some(now);
            AdmissionDecision::Admitted(AdmissionTicket { in_flight: None })
        } else {
            trace!(allowed, "QPS admission rejected");
            AdmissionDecision::Rejected
        }
    }

    fn warm_up_threshold(&self, threshold: f64, period: Duration, cold_factor: u32) -> f64 {
        let now = self.clock.now();
        let mut state = self.qps.lock();

        let idle = state.last_pass.map_or(true, |last| now.duration_since(last) >= period);
        if idle {
            state.cold_start = Some(now);
        }
        let since_cold = state.cold_start.map_or(Duration::ZERO, |start| now.duration_since(start));

        let cold = threshold / f64::from(cold_factor.max(1));
        if period.is_zero() {
            return threshold;
        }
        let progress = (since_cold.as_secs_f64() / period.as_secs_f64()).min(1.0);
        cold + (threshold - cold) * progress
    }

    fn enter_paced(&self, threshold: f64, max_queue_wait: Duration) -> AdmissionDecision {
        let now = self.clock.now();
        let Ok(interval) = Duration::try_from_secs_f64(1.0 / threshold) else {
            trace!(threshold, "Paced admission interval out of range");
            return AdmissionDecision::Rejected;
        };
        let mut state = self.qps.lock();

        let slot = match state.latest_slot.map(|latest| latest.checked_add(interval)) {
            Some(None) => return AdmissionDecision::Rejected,
            Some(Some(next)) if next > now => next,
            _ => now,
        };
        let wait = slot.saturating_duration_since(now);
        if wait > max_queue_wait {
            trace!(?wait, "Paced admission rejected");
            return AdmissionDecision::Rejected;
        }

        state.latest_slot = Some(slot);
        state.last_pass = Some(now);
        let ticket = AdmissionTicket { in_flight: None };
        if wait.is_zero() {
            AdmissionDecision::Admitted(ticket)
        } else {
            AdmissionDecision::AdmittedAfter(wait, ticket)
        }
    }
}
