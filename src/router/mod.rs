pub mod health;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::CoreError;
use crate::router::health::{HealthThresholds, RailHealth, RailState};

#[derive(Debug, Clone)]
pub struct RailConfig {
    pub id: String,
    pub priority: i32,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    Priority,
    Weighted,
    LeastFailure,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub policy: SelectionPolicy,
    pub thresholds: HealthThresholds,
    pub max_ejection_percent: u32,
    pub min_healthy_rails: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::Priority,
            thresholds: HealthThresholds::default(),
            max_ejection_percent: 50,
            min_healthy_rails: 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RailSnapshot {
    pub rail: String,
    pub state: RailState,
    pub failure_rate: f64,
    pub mean_latency_ms: f64,
    pub ejected_until: Option<DateTime<Utc>>,
}

/// Health-aware rail selection. The health map is a per-process cache of
/// recent behavior; correctness lives in the ledger and idempotency store,
/// so instances are free to disagree.
pub struct RailRouter {
    rails: Vec<RailConfig>,
    config: RouterConfig,
    state: RwLock<HashMap<String, RailHealth>>,
}

impl RailRouter {
    pub fn new(mut rails: Vec<RailConfig>, config: RouterConfig) -> Self {
        rails.sort_by(|a, b| (a.priority, a.id.as_str()).cmp(&(b.priority, b.id.as_str())));
        let state = rails
            .iter()
            .map(|r| (r.id.clone(), RailHealth::new()))
            .collect();
        Self {
            rails,
            config,
            state: RwLock::new(state),
        }
    }

    pub fn select_rail(&self) -> Result<String, CoreError> {
        let now = Utc::now();
        let mut state = self.state.write().expect("router state poisoned");
        self.enforce_caps(&mut state, now);

        let eligible: Vec<&RailConfig> = self
            .rails
            .iter()
            .filter(|r| state.get(&r.id).map(RailHealth::eligible).unwrap_or(false))
            .collect();

        if eligible.is_empty() {
            return Err(CoreError::NoHealthyRail);
        }

        let chosen = match self.config.policy {
            SelectionPolicy::Priority => eligible[0],
            SelectionPolicy::Weighted => weighted_pick(&eligible),
            SelectionPolicy::LeastFailure => eligible
                .iter()
                .copied()
                .min_by(|a, b| {
                    let fa = state.get(&a.id).map(RailHealth::failure_rate).unwrap_or(0.0);
                    let fb = state.get(&b.id).map(RailHealth::failure_rate).unwrap_or(0.0);
                    fa.partial_cmp(&fb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| (a.priority, a.id.as_str()).cmp(&(b.priority, b.id.as_str())))
                })
                .unwrap_or(eligible[0]),
        };

        Ok(chosen.id.clone())
    }

    pub fn record_outcome(&self, rail: &str, success: bool, latency_ms: u64) {
        let now = Utc::now();
        let mut state = self.state.write().expect("router state poisoned");
        if let Some(health) = state.get_mut(rail) {
            health.record(success, latency_ms, &self.config.thresholds, now);
        }
        self.enforce_caps(&mut state, now);
    }

    /// Periodic pass moving expired ejections back to half-open probes.
    pub fn sweep(&self) {
        let now = Utc::now();
        let mut state = self.state.write().expect("router state poisoned");
        for health in state.values_mut() {
            health.sweep(now);
        }
    }

    pub fn snapshot(&self) -> Vec<RailSnapshot> {
        let state = self.state.read().expect("router state poisoned");
        self.rails
            .iter()
            .map(|r| {
                let health = state.get(&r.id);
                RailSnapshot {
                    rail: r.id.clone(),
                    state: health.map(|h| h.state).unwrap_or(RailState::Closed),
                    failure_rate: health.map(RailHealth::failure_rate).unwrap_or(0.0),
                    mean_latency_ms: health.map(RailHealth::mean_latency_ms).unwrap_or(0.0),
                    ejected_until: health.and_then(|h| h.ejected_until),
                }
            })
            .collect()
    }

    /// Two ejection caps: never eject more than `max_ejection_percent` of
    /// rails, and never leave fewer than `min_healthy_rails` eligible. When
    /// a cap is breached, rails with the earliest ejection expiry come back
    /// as half-open probes.
    fn enforce_caps(&self, state: &mut HashMap<String, RailHealth>, now: DateTime<Utc>) {
        for health in state.values_mut() {
            health.sweep(now);
        }

        let total = self.rails.len();
        if total == 0 {
            return;
        }
        let max_ejected = (total * self.config.max_ejection_percent as usize) / 100;
        let min_healthy = self.config.min_healthy_rails.min(total);

        loop {
            let mut ejected: Vec<(&str, DateTime<Utc>)> = state
                .iter()
                .filter(|(_, h)| h.state == RailState::Open)
                .map(|(id, h)| (id.as_str(), h.ejected_until.unwrap_or(now)))
                .collect();
            let healthy = total - ejected.len();

            if ejected.len() <= max_ejected && healthy >= min_healthy {
                break;
            }
            ejected.sort_by_key(|(id, until)| (*until, id.to_string()));
            let Some((id, _)) = ejected.first() else { break };
            let id = id.to_string();
            if let Some(health) = state.get_mut(&id) {
                health.readmit();
            }
        }
    }
}

/// Deterministic weighted pick: highest weight wins, ties fall back to the
/// priority order the rail list is already sorted by.
fn weighted_pick<'a>(eligible: &[&'a RailConfig]) -> &'a RailConfig {
    eligible
        .iter()
        .copied()
        .max_by(|a, b| {
            a.weight
                .cmp(&b.weight)
                .then_with(|| (b.priority, b.id.as_str()).cmp(&(a.priority, a.id.as_str())))
        })
        .expect("eligible is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rail(id: &str, priority: i32, weight: u32) -> RailConfig {
        RailConfig {
            id: id.to_string(),
            priority,
            weight,
        }
    }

    #[test]
    fn weighted_pick_takes_heaviest() {
        let a = rail("a", 1, 10);
        let b = rail("b", 2, 90);
        assert_eq!(weighted_pick(&[&a, &b]).id, "b");
    }

    #[test]
    fn weighted_tie_falls_back_to_priority() {
        let a = rail("a", 2, 50);
        let b = rail("b", 1, 50);
        assert_eq!(weighted_pick(&[&a, &b]).id, "b");
    }

    #[test]
    fn rails_sort_by_priority_then_id() {
        let router = RailRouter::new(
            vec![rail("z", 1, 1), rail("a", 1, 1), rail("m", 0, 1)],
            RouterConfig::default(),
        );
        let order: Vec<String> = router.snapshot().into_iter().map(|s| s.rail).collect();
        assert_eq!(order, vec!["m", "a", "z"]);
    }
}
