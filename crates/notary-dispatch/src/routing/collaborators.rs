use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{OfferNotice, OrderId, StateCode, Vendor};

/// Read-only feed of vendor records, refreshed out of band.
pub trait VendorDirectory: Send + Sync {
    fn vendors_in_state(&self, state: &StateCode) -> Result<Vec<Vendor>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("vendor directory unavailable: {0}")]
    Unavailable(String),
}

/// Delivers offers to vendors. `Ok` acknowledges the send, not the vendor's answer.
pub trait OfferNotifier: Send + Sync {
    fn send_offer(&self, notice: &OfferNotice) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("vendor endpoint rejected offer: {0}")]
    Rejected(String),
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Operator-facing escalation channel for orders nobody picked up.
pub trait OperatorAlertPublisher: Send + Sync {
    fn publish(&self, alert: OperatorAlert) -> Result<(), AlertError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub template: String,
    pub order_id: OrderId,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("alert transport unavailable: {0}")]
    Transport(String),
}
