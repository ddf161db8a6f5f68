//! Vendor tier recalculation from rolling completed-order statistics.
//!
//! The recalculator is the only writer of vendor score and tier. Dispatch reads the standings
//! through [`TierRecalculator::apply_standing`] and may observe a value that is one pass stale.

mod thresholds;

pub use thresholds::{TierThreshold, VendorTierThresholds};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::domain::{OrderId, Vendor, VendorId, VendorTier};
use super::policy::PolicyError;

/// Weights of the performance score blend and the size of the rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformancePolicy {
    pub on_time_weight: f64,
    pub qa_pass_weight: f64,
    pub cancellation_weight: f64,
    pub window_size: usize,
}

impl PerformancePolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        let weights = [
            self.on_time_weight,
            self.qa_pass_weight,
            self.cancellation_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0
        {
            return Err(PolicyError::PerformanceWeights);
        }
        if self.window_size == 0 {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(())
    }

    /// Blend of on-time, QA-pass and non-cancellation rates, scaled to 0..=100.
    pub fn score(&self, records: &[CompletionRecord]) -> Option<f64> {
        if records.is_empty() {
            return None;
        }

        let total = records.len() as f64;
        let rate = |hits: usize| hits as f64 / total;
        let on_time = rate(records.iter().filter(|r| r.on_time).count());
        let qa_pass = rate(records.iter().filter(|r| r.qa_passed).count());
        let kept = 1.0 - rate(records.iter().filter(|r| r.cancelled_by_vendor).count());

        let weight_sum = self.on_time_weight + self.qa_pass_weight + self.cancellation_weight;
        let blended = (self.on_time_weight * on_time
            + self.qa_pass_weight * qa_pass
            + self.cancellation_weight * kept)
            / weight_sum;
        Some((blended * 100.0).clamp(0.0, 100.0))
    }
}

/// Outcome of a finished assignment, reported by the booking collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub on_time: bool,
    pub qa_passed: bool,
    #[serde(default)]
    pub cancelled_by_vendor: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub order_id: OrderId,
    pub vendor_id: VendorId,
    pub completed_at: DateTime<Utc>,
    pub on_time: bool,
    pub qa_passed: bool,
    pub cancelled_by_vendor: bool,
}

/// Completed-order history store.
pub trait CompletionHistory: Send + Sync {
    fn record(&self, record: CompletionRecord) -> Result<(), HistoryError>;
    /// Most recent first, at most `limit` records.
    fn recent(&self, vendor_id: &VendorId, limit: usize)
        -> Result<Vec<CompletionRecord>, HistoryError>;
    fn completed_count(&self, vendor_id: &VendorId) -> Result<u32, HistoryError>;
    fn vendors(&self) -> Result<Vec<VendorId>, HistoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("completion for order {0} already recorded")]
    Duplicate(OrderId),
    #[error("completion history unavailable: {0}")]
    Unavailable(String),
}

/// Recomputed score and tier for a vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorStanding {
    pub vendor_id: VendorId,
    pub performance_score: f64,
    pub tier: VendorTier,
    pub completed_orders: u32,
    pub assessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierChange {
    pub vendor_id: VendorId,
    pub previous: Option<VendorTier>,
    pub current: VendorTier,
    pub performance_score: f64,
}

impl TierChange {
    pub fn changed(&self) -> bool {
        self.previous != Some(self.current)
    }

    pub fn is_promotion(&self) -> bool {
        self.previous.map(|tier| self.current > tier).unwrap_or(false)
    }
}

/// Shared standings table. Writes are short so dispatch reads never wait long.
#[derive(Debug, Default)]
pub struct VendorStandings {
    standings: RwLock<HashMap<VendorId, VendorStanding>>,
}

impl VendorStandings {
    pub fn get(&self, vendor_id: &VendorId) -> Option<VendorStanding> {
        self.standings
            .read()
            .expect("standings lock poisoned")
            .get(vendor_id)
            .cloned()
    }

    pub fn upsert(&self, standing: VendorStanding) -> Option<VendorStanding> {
        self.standings
            .write()
            .expect("standings lock poisoned")
            .insert(standing.vendor_id.clone(), standing)
    }

    pub fn all(&self) -> Vec<VendorStanding> {
        let mut standings: Vec<VendorStanding> = self
            .standings
            .read()
            .expect("standings lock poisoned")
            .values()
            .cloned()
            .collect();
        standings.sort_by(|a, b| a.vendor_id.cmp(&b.vendor_id));
        standings
    }
}

pub struct TierRecalculator {
    thresholds: VendorTierThresholds,
    performance: PerformancePolicy,
    history: Arc<dyn CompletionHistory>,
    standings: VendorStandings,
}

impl TierRecalculator {
    pub fn new(
        thresholds: VendorTierThresholds,
        performance: PerformancePolicy,
        history: Arc<dyn CompletionHistory>,
    ) -> Self {
        Self {
            thresholds,
            performance,
            history,
            standings: VendorStandings::default(),
        }
    }

    pub fn thresholds(&self) -> &VendorTierThresholds {
        &self.thresholds
    }

    pub fn standings(&self) -> &VendorStandings {
        &self.standings
    }

    /// Pure assessment over a rolling window; `None` when the vendor has no history yet.
    pub fn assess(
        &self,
        vendor_id: &VendorId,
        recent: &[CompletionRecord],
        completed_orders: u32,
        assessed_at: DateTime<Utc>,
    ) -> Option<VendorStanding> {
        let window = &recent[..recent.len().min(self.performance.window_size)];
        let performance_score = self.performance.score(window)?;
        Some(VendorStanding {
            vendor_id: vendor_id.clone(),
            performance_score,
            tier: self.thresholds.tier_for(performance_score, completed_orders),
            completed_orders,
            assessed_at,
        })
    }

    pub fn record_completion(&self, record: CompletionRecord) -> Result<(), HistoryError> {
        self.history.record(record)
    }

    pub fn recalculate_vendor(&self, vendor_id: &VendorId) -> Result<Option<TierChange>, HistoryError> {
        let recent = self
            .history
            .recent(vendor_id, self.performance.window_size)?;
        let completed = self.history.completed_count(vendor_id)?;
        let Some(standing) = self.assess(vendor_id, &recent, completed, Utc::now()) else {
            return Ok(None);
        };

        let change = TierChange {
            vendor_id: vendor_id.clone(),
            previous: None,
            current: standing.tier,
            performance_score: standing.performance_score,
        };
        let previous = self.standings.upsert(standing).map(|prior| prior.tier);
        let change = TierChange { previous, ..change };

        if change.changed() {
            info!(
                vendor_id = %change.vendor_id,
                previous = change.previous.map(VendorTier::label).unwrap_or("unassessed"),
                current = change.current.label(),
                score = change.performance_score,
                "vendor tier updated"
            );
        }
        Ok(Some(change))
    }

    /// Reassess every vendor with history; returns only the tiers that moved.
    pub fn recalculate_all(&self) -> Result<Vec<TierChange>, HistoryError> {
        let mut vendors = self.history.vendors()?;
        vendors.sort();

        let mut changes = Vec::new();
        for vendor_id in vendors {
            if let Some(change) = self.recalculate_vendor(&vendor_id)? {
                if change.changed() {
                    changes.push(change);
                }
            }
        }
        Ok(changes)
    }

    /// Overlay the latest standing on a directory record and re-derive its tier. Once a vendor
    /// has been assessed, the completion history is authoritative over directory figures.
    pub fn apply_standing(&self, vendor: &mut Vendor) {
        if let Some(standing) = self.standings.get(&vendor.id) {
            vendor.performance_score = standing.performance_score;
            vendor.completed_orders = standing.completed_orders;
        }
        vendor.tier = self
            .thresholds
            .tier_for(vendor.performance_score, vendor.completed_orders);
    }

    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.recalculate_all() {
                    Ok(changes) => info!(changed = changes.len(), "tier recalculation pass"),
                    Err(err) => warn!(error = %err, "tier recalculation skipped"),
                }
            }
        })
    }
}

impl std::fmt::Debug for TierRecalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierRecalculator")
            .field("thresholds", &self.thresholds)
            .field("performance", &self.performance)
            .finish_non_exhaustive()
    }
}
