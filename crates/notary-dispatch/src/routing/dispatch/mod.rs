//! Order dispatch: sequential offers, rescue broadcast, and first-accept-wins confirmation.

mod book;
mod engine;
mod ledger;

pub(crate) use book::OrderBook;
#[cfg(test)]
pub(crate) use book::StatusCell;
pub use engine::{CompletionAck, DispatchEngine};
pub use ledger::{CapacityLedger, ReserveRejection, VendorLoad};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::collaborators::{DirectoryError, OfferNotifier, OperatorAlertPublisher, VendorDirectory};
use super::decision_log::{DecisionLog, EscalationReason};
use super::domain::{OfferAttempt, OrderId, OrderStatus, ServiceTier, SigningOrder, VendorId};
use super::tiering::{CompletionHistory, HistoryError};

/// Sequencer knobs that sit next to the SLA tables in the routing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Cap on a single sequential offer. `None` lets each offer run to the SLA deadline.
    #[serde(default)]
    pub offer_timeout_secs: Option<u64>,
    #[serde(default = "default_rescue_fanout")]
    pub rescue_fanout: usize,
    /// Escalate as soon as every candidate has refused instead of holding until the deadline.
    #[serde(default)]
    pub escalate_on_exhaustion: bool,
    #[serde(default = "default_true")]
    pub recalculate_on_completion: bool,
}

fn default_rescue_fanout() -> usize {
    3
}

fn default_true() -> bool {
    true
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            offer_timeout_secs: None,
            rescue_fanout: default_rescue_fanout(),
            escalate_on_exhaustion: false,
            recalculate_on_completion: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("order {0} not found")]
    UnknownOrder(OrderId),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("order {order_id} is {}: {detail}", .status.label())]
    InvalidTransition {
        order_id: OrderId,
        status: OrderStatus,
        detail: String,
    },
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Point-in-time view of an order for callers and the HTTP surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusView {
    pub order: SigningOrder,
    pub current_tier: ServiceTier,
    pub escalated: bool,
    pub escalation_reason: Option<EscalationReason>,
    pub accepted_vendor: Option<VendorId>,
    pub attempts: Vec<OfferAttempt>,
}

/// External systems the engine talks to.
#[derive(Clone)]
pub struct DispatchCollaborators {
    pub directory: Arc<dyn VendorDirectory>,
    pub notifier: Arc<dyn OfferNotifier>,
    pub decision_log: Arc<dyn DecisionLog>,
    pub alerts: Arc<dyn OperatorAlertPublisher>,
    pub history: Arc<dyn CompletionHistory>,
}
