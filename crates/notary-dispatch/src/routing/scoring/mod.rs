mod config;
mod rules;

pub use config::{ScoreWeights, TierPoints};
pub use rules::WeightedSum;

use std::cmp::Ordering;
use std::sync::Arc;

use super::domain::{SigningOrder, Vendor, VendorId};
use serde::{Deserialize, Serialize};

/// Scores closer than this are treated as tied.
pub const SCORE_TIE_EPSILON: f64 = 1e-6;

/// Pluggable combination function turning vendor, order, and weights into score components.
pub trait ScoreStrategy: Send + Sync {
    fn score(&self, vendor: &Vendor, order: &SigningOrder, weights: &ScoreWeights)
        -> Vec<ScoreComponent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreFactor {
    Tier,
    Performance,
    Specialization,
    Proximity,
    Load,
}

/// Discrete contribution to a match score, kept for audit replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub factor: ScoreFactor,
    pub value: f64,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub vendor_id: VendorId,
    pub total: f64,
    pub components: Vec<ScoreComponent>,
}

/// One entry of a ranking, best first.
#[derive(Debug, Clone)]
pub struct RankedVendor<'a> {
    pub vendor: &'a Vendor,
    pub score: MatchScore,
}

/// Stateless scorer: the same snapshot and order always yield the same ranking.
#[derive(Clone)]
pub struct ScoringEngine {
    weights: ScoreWeights,
    strategy: Arc<dyn ScoreStrategy>,
}

impl ScoringEngine {
    pub fn new(weights: ScoreWeights) -> Self {
        Self::with_strategy(weights, Arc::new(WeightedSum))
    }

    pub fn with_strategy(weights: ScoreWeights, strategy: Arc<dyn ScoreStrategy>) -> Self {
        Self { weights, strategy }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn score(&self, vendor: &Vendor, order: &SigningOrder) -> MatchScore {
        let components = self.strategy.score(vendor, order, &self.weights);
        let total = components.iter().map(|component| component.value).sum();
        MatchScore {
            vendor_id: vendor.id.clone(),
            total,
            components,
        }
    }

    /// Score every vendor and sort best first with the deterministic tie-break.
    pub fn rank<'a>(&self, order: &SigningOrder, vendors: &[&'a Vendor]) -> Vec<RankedVendor<'a>> {
        let mut ranked: Vec<RankedVendor<'a>> = vendors
            .iter()
            .copied()
            .map(|vendor| RankedVendor {
                vendor,
                score: self.score(vendor, order),
            })
            .collect();

        ranked.sort_by(|a, b| {
            sort_key(b.score.total)
                .total_cmp(&sort_key(a.score.total))
                .then_with(|| tie_break(a, b))
        });

        let mut start = 0;
        while start < ranked.len() {
            let lead = sort_key(ranked[start].score.total);
            let end = ranked[start..]
                .iter()
                .position(|entry| lead - sort_key(entry.score.total) > SCORE_TIE_EPSILON)
                .map_or(ranked.len(), |offset| start + offset);
            ranked[start..end].sort_by(tie_break);
            start = end;
        }
        ranked
    }
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("weights", &self.weights)
            .finish_non_exhaustive()
    }
}

// Non-finite totals sink to the bottom of the ranking.
fn sort_key(total: f64) -> f64 {
    if total.is_finite() {
        total
    } else {
        f64::NEG_INFINITY
    }
}

/// Order among vendors whose scores are within `SCORE_TIE_EPSILON` of the run leader.
fn tie_break(a: &RankedVendor<'_>, b: &RankedVendor<'_>) -> Ordering {
    b.vendor
        .tier
        .cmp(&a.vendor.tier)
        .then_with(|| {
            a.vendor
                .mean_response_latency_secs
                .total_cmp(&b.vendor.mean_response_latency_secs)
        })
        .then_with(|| a.vendor.id.cmp(&b.vendor.id))
}
