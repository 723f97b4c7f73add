use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Breaker state for one rail: CLOSED takes traffic, OPEN is ejected,
/// HALF_OPEN lets a probe through after the ejection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RailState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub consecutive_errors: u32,
    pub window: Duration,
    pub base_ejection: Duration,
    pub max_ejection: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            consecutive_errors: 5,
            window: Duration::seconds(120),
            base_ejection: Duration::seconds(30),
            max_ejection: Duration::seconds(1800),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    success: bool,
    latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RailHealth {
    pub state: RailState,
    pub consecutive_errors: u32,
    pub ejection_count: u32,
    pub ejected_until: Option<DateTime<Utc>>,
    samples: VecDeque<Sample>,
}

impl RailHealth {
    pub fn new() -> Self {
        Self {
            state: RailState::Closed,
            consecutive_errors: 0,
            ejection_count: 0,
            ejected_until: None,
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, success: bool, latency_ms: u64, thresholds: &HealthThresholds, now: DateTime<Utc>) {
        self.samples.push_back(Sample { at: now, success, latency_ms });
        self.prune(thresholds.window, now);

        if success {
            self.consecutive_errors = 0;
            if self.state == RailState::HalfOpen {
                // Probe succeeded; the rail earns its way back in.
                self.state = RailState::Closed;
                self.ejected_until = None;
            }
        } else {
            self.consecutive_errors += 1;
            match self.state {
                RailState::Closed => {
                    if self.consecutive_errors >= thresholds.consecutive_errors {
                        self.eject(thresholds, now);
                    }
                }
                RailState::HalfOpen => self.eject(thresholds, now),
                RailState::Open => {}
            }
        }
    }

    /// Ejection duration doubles on each repeated ejection, capped.
    fn eject(&mut self, thresholds: &HealthThresholds, now: DateTime<Utc>) {
        let factor = 1i64 << self.ejection_count.min(16);
        let duration = std::cmp::min(thresholds.base_ejection * factor as i32, thresholds.max_ejection);
        self.state = RailState::Open;
        self.ejected_until = Some(now + duration);
        self.ejection_count += 1;
        self.consecutive_errors = 0;
    }

    /// Re-admits the rail as a half-open probe once its window expired.
    pub fn sweep(&mut self, now: DateTime<Utc>) {
        if self.state == RailState::Open && self.ejected_until.is_some_and(|t| now >= t) {
            self.state = RailState::HalfOpen;
        }
    }

    /// Forced re-admission used by the min-healthy cap.
    pub fn readmit(&mut self) {
        self.state = RailState::HalfOpen;
    }

    pub fn eligible(&self) -> bool {
        matches!(self.state, RailState::Closed | RailState::HalfOpen)
    }

    pub fn failure_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let failures = self.samples.iter().filter(|s| !s.success).count();
        failures as f64 / self.samples.len() as f64
    }

    pub fn mean_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: u64 = self.samples.iter().map(|s| s.latency_ms).sum();
        total as f64 / self.samples.len() as f64
    }

    fn prune(&mut self, window: Duration, now: DateTime<Utc>) {
        let cutoff = now - window;
        while self.samples.front().is_some_and(|s| s.at < cutoff) {
            self.samples.pop_front();
        }
    }
}

impl Default for RailHealth {
    fn default() -> Self {
        Self::new()
    }
}
