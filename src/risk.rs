use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskDecision {
    Pass,
    Challenge,
    Block,
}

impl RiskDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskDecision::Pass => "PASS",
            RiskDecision::Challenge => "CHALLENGE",
            RiskDecision::Block => "BLOCK",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub decision: RiskDecision,
    pub score: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RiskContext {
    pub intent_id: Uuid,
    pub merchant_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
}

/// Scoring capability consumed by the saga orchestrator. The model itself
/// lives elsewhere; the core only needs a decision back.
#[async_trait::async_trait]
pub trait RiskEngine: Send + Sync {
    async fn assess(&self, ctx: &RiskContext) -> anyhow::Result<RiskAssessment>;
}

/// Amount-band scorer used when no external scorer is wired in.
pub struct RuleBasedRisk {
    pub challenge_threshold: f64,
    pub block_threshold: f64,
}

impl Default for RuleBasedRisk {
    fn default() -> Self {
        Self {
            challenge_threshold: 0.5,
            block_threshold: 0.8,
        }
    }
}

impl RuleBasedRisk {
    pub fn score(&self, amount_minor: i64) -> (f64, Vec<String>) {
        let mut score: f64 = 0.0;
        let mut reasons = Vec::new();

        if amount_minor > 10_000_000 {
            score += 0.6;
            reasons.push("amount above 100k major units".to_string());
        } else if amount_minor > 1_000_000 {
            score += 0.3;
            reasons.push("amount above 10k major units".to_string());
        } else if amount_minor > 100_000 {
            score += 0.1;
            reasons.push("amount above 1k major units".to_string());
        }

        (score.min(1.0), reasons)
    }
}

#[async_trait::async_trait]
impl RiskEngine for RuleBasedRisk {
    async fn assess(&self, ctx: &RiskContext) -> anyhow::Result<RiskAssessment> {
        let (score, reasons) = self.score(ctx.amount_minor);
        let decision = if score >= self.block_threshold {
            RiskDecision::Block
        } else if score >= self.challenge_threshold {
            RiskDecision::Challenge
        } else {
            RiskDecision::Pass
        };
        Ok(RiskAssessment {
            decision,
            score,
            reasons,
        })
    }
}
