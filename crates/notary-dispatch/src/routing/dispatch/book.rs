use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::super::decision_log::{AnomalyKind, EscalationReason};
use super::super::domain::{
    OfferAttempt, OfferOutcome, OrderId, OrderStatus, ResponseOutcome, ServiceTier,
    VendorDecision, VendorId,
};

/// Order status packed into an atomic so first-accept-wins is a single compare-and-swap.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new(status: OrderStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub(crate) fn load(&self) -> OrderStatus {
        OrderStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `to` if the current status is one of `from`. Returns the replaced status, or the
    /// status that blocked the move.
    pub(crate) fn transition(
        &self,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<OrderStatus, OrderStatus> {
        let mut current = self.load();
        loop {
            if !from.contains(&current) || !current.can_transition_to(to) {
                return Err(current);
            }
            match self
                .0
                .compare_exchange(current as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(current),
                Err(actual) => current = OrderStatus::from_u8(actual),
            }
        }
    }
}

/// What the responding vendor is told, plus any race worth auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResponseResolution {
    pub outcome: ResponseOutcome,
    pub anomaly: Option<AnomalyKind>,
}

/// Rejected response: the order status at the time and why it was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Refusal {
    pub status: OrderStatus,
    pub detail: String,
}

/// Answer for a vendor whose offer is no longer pending, given its last recorded outcome.
pub(crate) fn settled_response(
    status: OrderStatus,
    latest: Option<OfferOutcome>,
    vendor_id: &VendorId,
    decision: VendorDecision,
) -> Result<ResponseResolution, Refusal> {
    match (decision, latest) {
        (VendorDecision::Accept, Some(OfferOutcome::Superseded)) => {
            let anomaly = if status == OrderStatus::Cancelled {
                AnomalyKind::AcceptanceAfterCancel
            } else {
                AnomalyKind::LateAcceptance
            };
            Ok(ResponseResolution {
                outcome: ResponseOutcome::Superseded,
                anomaly: Some(anomaly),
            })
        }
        (VendorDecision::Decline, Some(OfferOutcome::Superseded)) => Ok(ResponseResolution {
            outcome: ResponseOutcome::Superseded,
            anomaly: None,
        }),
        (_, Some(outcome)) => Err(Refusal {
            status,
            detail: format!("offer to {vendor_id} already {}", outcome.label()),
        }),
        (_, None) => Err(Refusal {
            status,
            detail: format!("no offer was made to {vendor_id}"),
        }),
    }
}

#[derive(Debug)]
struct BookState {
    attempts: Vec<OfferAttempt>,
    waiters: HashMap<usize, oneshot::Sender<VendorDecision>>,
    current_tier: ServiceTier,
    escalated: bool,
    escalation_reason: Option<EscalationReason>,
    accepted: Option<VendorId>,
}

impl BookState {
    fn pending_index(&self, vendor_id: &VendorId) -> Option<usize> {
        self.attempts
            .iter()
            .rposition(|attempt| &attempt.vendor_id == vendor_id && attempt.outcome.is_pending())
    }

    fn latest_outcome(&self, vendor_id: &VendorId) -> Option<OfferOutcome> {
        self.attempts
            .iter()
            .rev()
            .find(|attempt| &attempt.vendor_id == vendor_id)
            .map(|attempt| attempt.outcome)
    }

    fn resolve(&mut self, index: usize, outcome: OfferOutcome, at: Option<DateTime<Utc>>) {
        let attempt = &mut self.attempts[index];
        attempt.outcome = outcome;
        attempt.responded_at = at;
    }

    // Dropping the senders wakes every waiting offer task.
    fn supersede_pending(&mut self) {
        for attempt in &mut self.attempts {
            if attempt.outcome.is_pending() {
                attempt.outcome = OfferOutcome::Superseded;
            }
        }
        self.waiters.clear();
    }
}

/// Per-order offer book. Every status change that touches attempts happens under its lock.
#[derive(Debug)]
pub(crate) struct OrderBook {
    order_id: OrderId,
    status: StatusCell,
    state: Mutex<BookState>,
}

impl OrderBook {
    pub(crate) fn new(order_id: OrderId, tier: ServiceTier) -> Self {
        Self {
            order_id,
            status: StatusCell::new(OrderStatus::Pending),
            state: Mutex::new(BookState {
                attempts: Vec::new(),
                waiters: HashMap::new(),
                current_tier: tier,
                escalated: false,
                escalation_reason: None,
                accepted: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BookState> {
        self.state.lock().expect("offer book mutex poisoned")
    }

    pub(crate) fn status(&self) -> OrderStatus {
        self.status.load()
    }

    pub(crate) fn current_tier(&self) -> ServiceTier {
        self.lock().current_tier
    }

    pub(crate) fn escalation(&self) -> (bool, Option<EscalationReason>) {
        let state = self.lock();
        (state.escalated, state.escalation_reason)
    }

    pub(crate) fn attempts(&self) -> Vec<OfferAttempt> {
        self.lock().attempts.clone()
    }

    pub(crate) fn accepted_vendor(&self) -> Option<VendorId> {
        self.lock().accepted.clone()
    }

    pub(crate) fn mark_offered(&self) {
        let _ = self
            .status
            .transition(&[OrderStatus::Pending], OrderStatus::Offered);
    }

    /// Record a new pending attempt. `None` once the order is terminal.
    pub(crate) fn open(
        &self,
        vendor_id: VendorId,
        sent_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
        rescue: bool,
    ) -> Option<(usize, oneshot::Receiver<VendorDecision>)> {
        let mut state = self.lock();
        if self.status.load().is_terminal() || state.pending_index(&vendor_id).is_some() {
            return None;
        }

        let index = state.attempts.len();
        state.attempts.push(OfferAttempt {
            order_id: self.order_id.clone(),
            vendor_id,
            sent_at,
            deadline,
            responded_at: None,
            outcome: OfferOutcome::Pending,
            rescue,
        });
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(index, tx);
        Some((index, rx))
    }

    pub(crate) fn outcome(&self, index: usize) -> OfferOutcome {
        self.lock().attempts[index].outcome
    }

    /// Close a still-pending attempt as timed out and return the attempt's final outcome.
    pub(crate) fn expire(&self, index: usize, at: DateTime<Utc>) -> OfferOutcome {
        self.close_pending(index, OfferOutcome::TimedOut, at)
    }

    pub(crate) fn mark_undeliverable(&self, index: usize, at: DateTime<Utc>) -> OfferOutcome {
        self.close_pending(index, OfferOutcome::Undeliverable, at)
    }

    fn close_pending(&self, index: usize, outcome: OfferOutcome, at: DateTime<Utc>) -> OfferOutcome {
        let mut state = self.lock();
        if state.attempts[index].outcome.is_pending() {
            state.resolve(index, outcome, Some(at));
            state.waiters.remove(&index);
        }
        state.attempts[index].outcome
    }

    pub(crate) fn respond(
        &self,
        vendor_id: &VendorId,
        decision: VendorDecision,
        at: DateTime<Utc>,
    ) -> Result<ResponseResolution, Refusal> {
        let mut state = self.lock();
        let status = self.status.load();

        let Some(index) = state.pending_index(vendor_id) else {
            return settled_response(status, state.latest_outcome(vendor_id), vendor_id, decision);
        };

        match decision {
            VendorDecision::Decline => {
                state.resolve(index, OfferOutcome::Declined, Some(at));
                if let Some(waiter) = state.waiters.remove(&index) {
                    let _ = waiter.send(VendorDecision::Decline);
                }
                Ok(ResponseResolution {
                    outcome: ResponseOutcome::Declined,
                    anomaly: None,
                })
            }
            VendorDecision::Accept => {
                if let Err(status) = self.status.transition(
                    &[OrderStatus::Offered, OrderStatus::Escalated],
                    OrderStatus::Confirmed,
                ) {
                    return Err(Refusal {
                        status,
                        detail: "order no longer accepts vendors".to_string(),
                    });
                }

                state.resolve(index, OfferOutcome::Accepted, Some(at));
                state.accepted = Some(vendor_id.clone());
                let waiter = state.waiters.remove(&index);
                state.supersede_pending();
                if let Some(waiter) = waiter {
                    let _ = waiter.send(VendorDecision::Accept);
                }
                Ok(ResponseResolution {
                    outcome: ResponseOutcome::Confirmed,
                    anomaly: None,
                })
            }
        }
    }

    pub(crate) fn cancel(&self) -> Result<usize, OrderStatus> {
        let mut state = self.lock();
        self.status.transition(
            &[
                OrderStatus::Pending,
                OrderStatus::Offered,
                OrderStatus::Escalated,
            ],
            OrderStatus::Cancelled,
        )?;
        let outstanding = state
            .attempts
            .iter()
            .filter(|attempt| attempt.outcome.is_pending())
            .count();
        state.supersede_pending();
        Ok(outstanding)
    }

    /// Enter (or stay in) the escalated state at `tier`. The first escalation reason sticks.
    pub(crate) fn escalate(
        &self,
        tier: ServiceTier,
        reason: EscalationReason,
    ) -> Result<(), OrderStatus> {
        let mut state = self.lock();
        if self.status.load() != OrderStatus::Escalated {
            self.status.transition(
                &[OrderStatus::Pending, OrderStatus::Offered],
                OrderStatus::Escalated,
            )?;
        }
        state.current_tier = tier;
        state.escalated = true;
        state.escalation_reason.get_or_insert(reason);
        Ok(())
    }

    pub(crate) fn fail(&self) -> Result<(), OrderStatus> {
        let mut state = self.lock();
        self.status.transition(
            &[
                OrderStatus::Pending,
                OrderStatus::Offered,
                OrderStatus::Escalated,
            ],
            OrderStatus::Failed,
        )?;
        state.supersede_pending();
        Ok(())
    }
}
