//! Append-only record of every routing decision, kept for audit and analytics export.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    OfferAttempt, OfferOutcome, OrderId, OrderStatus, ServiceTier, SigningOrder, VendorId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No vendor could serve the order in the last round it reached.
    NoCoverage,
    /// The rescue broadcast ran out its deadline without an acceptance.
    NoCoverageRescue,
}

impl FailureReason {
    pub const fn label(self) -> &'static str {
        match self {
            FailureReason::NoCoverage => "no_coverage",
            FailureReason::NoCoverageRescue => "no_coverage_rescue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    NoCoverage,
    SlaBreach,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Confirmed { vendor_id: VendorId },
    Failed { reason: FailureReason },
    Cancelled,
}

impl DecisionOutcome {
    pub const fn label(&self) -> &'static str {
        match self {
            DecisionOutcome::Confirmed { .. } => "confirmed",
            DecisionOutcome::Failed { .. } => "failed",
            DecisionOutcome::Cancelled => "cancelled",
        }
    }

    pub const fn status(&self) -> OrderStatus {
        match self {
            DecisionOutcome::Confirmed { .. } => OrderStatus::Confirmed,
            DecisionOutcome::Failed { .. } => OrderStatus::Failed,
            DecisionOutcome::Cancelled => OrderStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub order_id: OrderId,
    pub order: SigningOrder,
    pub requested_tier: ServiceTier,
    pub final_tier: ServiceTier,
    pub attempts: Vec<OfferAttempt>,
    #[serde(flatten)]
    pub outcome: DecisionOutcome,
    pub escalated: bool,
    pub escalation_reason: Option<EscalationReason>,
    pub started_at: DateTime<Utc>,
    pub decided_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RoutingDecision {
    pub fn accepted_vendor(&self) -> Option<&VendorId> {
        match &self.outcome {
            DecisionOutcome::Confirmed { vendor_id } => Some(vendor_id),
            _ => None,
        }
    }

    pub fn offers_sent(&self) -> usize {
        self.attempts
            .iter()
            .filter(|attempt| attempt.outcome != OfferOutcome::Undeliverable)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Acceptance arrived after a sibling offer already won the order.
    LateAcceptance,
    AcceptanceAfterCancel,
}

/// Audit-only trace of a race the sequencer resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceAnomaly {
    pub order_id: OrderId,
    pub vendor_id: VendorId,
    pub kind: AnomalyKind,
    pub observed_at: DateTime<Utc>,
}

pub trait DecisionLog: Send + Sync {
    fn append(&self, decision: RoutingDecision) -> Result<(), DecisionLogError>;
    fn record_anomaly(&self, anomaly: RaceAnomaly) -> Result<(), DecisionLogError>;

    /// Look up an archived decision. Write-only sinks keep the default and answer `None`.
    fn find(&self, _order_id: &OrderId) -> Option<RoutingDecision> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecisionLogError {
    #[error("decision for order {0} already recorded")]
    Duplicate(OrderId),
    #[error("failed to write decision log: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode decision log entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct InMemoryDecisionLog {
    decisions: Mutex<Vec<RoutingDecision>>,
    anomalies: Mutex<Vec<RaceAnomaly>>,
}

impl InMemoryDecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<RoutingDecision> {
        self.decisions
            .lock()
            .expect("decision log mutex poisoned")
            .clone()
    }

    pub fn for_order(&self, order_id: &OrderId) -> Option<RoutingDecision> {
        self.decisions
            .lock()
            .expect("decision log mutex poisoned")
            .iter()
            .find(|decision| &decision.order_id == order_id)
            .cloned()
    }

    pub fn anomalies(&self) -> Vec<RaceAnomaly> {
        self.anomalies
            .lock()
            .expect("anomaly log mutex poisoned")
            .clone()
    }
}

impl DecisionLog for InMemoryDecisionLog {
    fn append(&self, decision: RoutingDecision) -> Result<(), DecisionLogError> {
        let mut guard = self.decisions.lock().expect("decision log mutex poisoned");
        if guard.iter().any(|existing| existing.order_id == decision.order_id) {
            return Err(DecisionLogError::Duplicate(decision.order_id));
        }
        guard.push(decision);
        Ok(())
    }

    fn record_anomaly(&self, anomaly: RaceAnomaly) -> Result<(), DecisionLogError> {
        self.anomalies
            .lock()
            .expect("anomaly log mutex poisoned")
            .push(anomaly);
        Ok(())
    }

    fn find(&self, order_id: &OrderId) -> Option<RoutingDecision> {
        self.for_order(order_id)
    }
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum LogLine<'a> {
    Decision(&'a RoutingDecision),
    Anomaly(&'a RaceAnomaly),
}

/// Writes one JSON object per line, tagged `decision` or `anomaly`.
pub struct JsonLinesDecisionLog<W: Write + Send> {
    inner: Mutex<JsonLinesState<W>>,
}

struct JsonLinesState<W> {
    writer: W,
    seen: HashSet<OrderId>,
}

impl<W: Write + Send> JsonLinesDecisionLog<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(JsonLinesState {
                writer,
                seen: HashSet::new(),
            }),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
            .into_inner()
            .expect("decision log mutex poisoned")
            .writer
    }

    fn write_line(writer: &mut W, line: &LogLine<'_>) -> Result<(), DecisionLogError> {
        serde_json::to_writer(&mut *writer, line)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> DecisionLog for JsonLinesDecisionLog<W> {
    fn append(&self, decision: RoutingDecision) -> Result<(), DecisionLogError> {
        let mut state = self.inner.lock().expect("decision log mutex poisoned");
        if state.seen.contains(&decision.order_id) {
            return Err(DecisionLogError::Duplicate(decision.order_id));
        }
        Self::write_line(&mut state.writer, &LogLine::Decision(&decision))?;
        state.seen.insert(decision.order_id);
        Ok(())
    }

    fn record_anomaly(&self, anomaly: RaceAnomaly) -> Result<(), DecisionLogError> {
        let mut state = self.inner.lock().expect("decision log mutex poisoned");
        Self::write_line(&mut state.writer, &LogLine::Anomaly(&anomaly))
    }
}
