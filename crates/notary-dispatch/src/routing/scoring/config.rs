use serde::{Deserialize, Serialize};

use super::super::domain::VendorTier;

/// Weights consumed by the scoring strategy. Values are policy inputs, loaded with the routing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub tier_points: TierPoints,
    /// Points awarded for a perfect (100) performance score; scaled linearly.
    pub performance: f64,
    pub specialization_match: f64,
    /// Points awarded for a vendor located at the signing address.
    pub proximity: f64,
    /// Distance at which the proximity contribution has halved.
    pub proximity_scale_km: f64,
    /// Points subtracted per offer or assignment the vendor currently holds.
    pub load_penalty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPoints {
    pub bronze: f64,
    pub silver: f64,
    pub gold: f64,
    pub elite: f64,
}

impl TierPoints {
    pub fn points(&self, tier: VendorTier) -> f64 {
        match tier {
            VendorTier::Bronze => self.bronze,
            VendorTier::Silver => self.silver,
            VendorTier::Gold => self.gold,
            VendorTier::Elite => self.elite,
        }
    }

    /// Tier points must strictly increase with seniority.
    pub fn is_monotonic(&self) -> bool {
        self.bronze < self.silver && self.silver < self.gold && self.gold < self.elite
    }
}
