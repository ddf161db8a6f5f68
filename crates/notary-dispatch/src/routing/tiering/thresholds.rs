use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::super::domain::VendorTier;
use super::super::policy::PolicyError;

/// Requirements and perks of a single vendor tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub tier: VendorTier,
    pub min_score: f64,
    /// Inclusive top of the tier's score band. A score above the band still satisfies the tier.
    pub max_score: f64,
    pub min_completed_orders: u32,
    #[serde(default)]
    pub benefits: BTreeSet<String>,
}

impl TierThreshold {
    pub fn is_satisfied_by(&self, score: f64, completed_orders: u32) -> bool {
        score >= self.min_score && completed_orders >= self.min_completed_orders
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorTierThresholds {
    pub tiers: Vec<TierThreshold>,
}

impl VendorTierThresholds {
    pub fn new(tiers: Vec<TierThreshold>) -> Self {
        Self { tiers }
    }

    pub fn threshold(&self, tier: VendorTier) -> Option<&TierThreshold> {
        self.tiers.iter().find(|threshold| threshold.tier == tier)
    }

    /// Highest tier whose requirements hold; bronze when none do.
    pub fn tier_for(&self, score: f64, completed_orders: u32) -> VendorTier {
        self.tiers
            .iter()
            .filter(|threshold| threshold.is_satisfied_by(score, completed_orders))
            .map(|threshold| threshold.tier)
            .max()
            .unwrap_or(VendorTier::Bronze)
    }

    pub fn benefits(&self, tier: VendorTier) -> BTreeSet<String> {
        self.threshold(tier)
            .map(|threshold| threshold.benefits.clone())
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for tier in VendorTier::ALL {
            let count = self.tiers.iter().filter(|t| t.tier == tier).count();
            if count > 1 {
                return Err(PolicyError::Thresholds(format!(
                    "{} listed {count} times",
                    tier.label()
                )));
            }
        }

        for threshold in &self.tiers {
            let in_range = |value: f64| value.is_finite() && (0.0..=100.0).contains(&value);
            if !in_range(threshold.min_score)
                || !in_range(threshold.max_score)
                || threshold.min_score > threshold.max_score
            {
                return Err(PolicyError::Thresholds(format!(
                    "{} band {}..={} is not within 0..=100",
                    threshold.tier.label(),
                    threshold.min_score,
                    threshold.max_score
                )));
            }
        }

        let mut ordered: Vec<&TierThreshold> = self.tiers.iter().collect();
        ordered.sort_by_key(|threshold| threshold.tier);
        for pair in ordered.windows(2) {
            let (lower, higher) = (pair[0], pair[1]);
            if higher.min_score < lower.min_score
                || higher.min_completed_orders < lower.min_completed_orders
            {
                return Err(PolicyError::Thresholds(format!(
                    "{} requirements are weaker than {}",
                    higher.tier.label(),
                    lower.tier.label()
                )));
            }
        }

        Ok(())
    }
}
