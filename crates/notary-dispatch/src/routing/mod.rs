//! Vendor routing and dispatch for notary signing orders.
//!
//! An order is filtered down to vendors who can legally and technically serve it, ranked by the
//! configured scoring strategy, and offered one vendor at a time until its SLA deadline. Orders
//! still unfilled at the deadline escalate to a concurrent rescue broadcast where the first
//! acceptance wins. Every terminal outcome lands in the routing decision log.

pub mod collaborators;
pub mod decision_log;
pub mod dispatch;
pub mod domain;
pub mod eligibility;
pub mod policy;
pub mod router;
pub mod scoring;
pub mod sla;
pub mod tiering;

#[cfg(test)]
mod tests;

pub use collaborators::{
    AlertError, DirectoryError, NotifyError, OfferNotifier, OperatorAlert, OperatorAlertPublisher,
    VendorDirectory,
};
pub use decision_log::{
    AnomalyKind, DecisionLog, DecisionLogError, DecisionOutcome, EscalationReason, FailureReason,
    InMemoryDecisionLog, JsonLinesDecisionLog, RaceAnomaly, RoutingDecision,
};
pub use dispatch::{
    CapacityLedger, CompletionAck, DispatchCollaborators, DispatchEngine, DispatchError,
    DispatchSettings, OrderStatusView, ReserveRejection, VendorLoad,
};
pub use domain::{
    CommissionStatus, GeoPoint, OfferAttempt, OfferNotice, OfferOutcome, OfferResponse, OrderId,
    OrderRequest, OrderStatus, ResponseOutcome, ServiceTier, SigningOrder, SigningType, StateCode,
    TimeWindow, Vendor, VendorDecision, VendorId, VendorTier,
};
pub use eligibility::{EligibilityFilter, EligibilityPolicy, IneligibilityRule, NoEligibleVendors};
pub use policy::{PolicyError, RoutingPolicy};
pub use router::dispatch_router;
pub use scoring::{
    MatchScore, RankedVendor, ScoreComponent, ScoreFactor, ScoreStrategy, ScoreWeights,
    ScoringEngine, TierPoints, WeightedSum, SCORE_TIE_EPSILON,
};
pub use sla::{SlaConfig, SlaPolicy, SlaTerms};
pub use tiering::{
    CompletionHistory, CompletionRecord, CompletionReport, HistoryError, PerformancePolicy,
    TierChange, TierRecalculator, TierThreshold, VendorStanding, VendorStandings,
    VendorTierThresholds,
};
