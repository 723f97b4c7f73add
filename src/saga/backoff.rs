use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff. `delay` is the deterministic curve;
/// `jittered` scales it by a random factor in [0.5, 1.0] so retry herds
/// spread out.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub factor: f64,
    pub cap_ms: u64,
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.base_ms as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(raw.min(self.cap_ms as f64) as u64)
    }

    pub fn jittered(&self, attempt: u32) -> Duration {
        let base = self.delay(attempt);
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        base.mul_f64(factor)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 50,
            factor: 2.0,
            cap_ms: 30_000,
        }
    }
}

/// Webhook retry schedule: 1, 2, 4, 8, 16 minutes for attempts 1..=5.
pub fn webhook_delay_minutes(attempt_count: i32) -> i64 {
    1i64 << (attempt_count.clamp(1, 16) - 1)
}
