use serde::{Deserialize, Serialize};

use super::dispatch::DispatchSettings;
use super::eligibility::EligibilityPolicy;
use super::scoring::ScoreWeights;
use super::sla::SlaConfig;
use super::tiering::{PerformancePolicy, VendorTierThresholds};

/// Every policy table the engine consults, injected at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub eligibility: EligibilityPolicy,
    pub weights: ScoreWeights,
    #[serde(default)]
    pub sla: SlaConfig,
    pub tiers: VendorTierThresholds,
    pub performance: PerformancePolicy,
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

impl RoutingPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        validate_weights(&self.weights)?;
        self.sla.validate()?;
        self.tiers.validate()?;
        self.performance.validate()?;
        if self.dispatch.rescue_fanout == 0 {
            return Err(PolicyError::ZeroFanout);
        }
        Ok(())
    }
}

fn validate_weights(weights: &ScoreWeights) -> Result<(), PolicyError> {
    let fields = [
        ("performance", weights.performance),
        ("specialization_match", weights.specialization_match),
        ("proximity", weights.proximity),
        ("proximity_scale_km", weights.proximity_scale_km),
        ("load_penalty", weights.load_penalty),
        ("tier_points.bronze", weights.tier_points.bronze),
        ("tier_points.silver", weights.tier_points.silver),
        ("tier_points.gold", weights.tier_points.gold),
        ("tier_points.elite", weights.tier_points.elite),
    ];
    for (field, value) in fields {
        if !value.is_finite() || value < 0.0 {
            return Err(PolicyError::InvalidWeight { field });
        }
    }
    if weights.proximity_scale_km == 0.0 {
        return Err(PolicyError::InvalidWeight {
            field: "proximity_scale_km",
        });
    }
    if !weights.tier_points.is_monotonic() {
        return Err(PolicyError::NonMonotonicTierPoints);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("weight `{field}` must be a finite non-negative number")]
    InvalidWeight { field: &'static str },
    #[error("tier points must strictly increase from bronze to elite")]
    NonMonotonicTierPoints,
    #[error("{tier} confirmation deadline must be greater than zero")]
    ZeroDeadline { tier: &'static str },
    #[error("escalation from {from} loops back through {to}")]
    EscalationCycle {
        from: &'static str,
        to: &'static str,
    },
    #[error("invalid tier thresholds: {0}")]
    Thresholds(String),
    #[error("performance weights must be non-negative with a positive sum")]
    PerformanceWeights,
    #[error("rescue fan-out must be at least one vendor")]
    ZeroFanout,
    #[error("performance window must hold at least one completion")]
    ZeroWindow,
}
