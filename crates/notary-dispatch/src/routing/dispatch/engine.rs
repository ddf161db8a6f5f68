use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::super::collaborators::OperatorAlert;
use super::super::decision_log::{
    DecisionOutcome, EscalationReason, FailureReason, RaceAnomaly, RoutingDecision,
};
use super::super::domain::{
    OfferNotice, OfferOutcome, OfferResponse, OrderId, OrderRequest, OrderStatus,
    ResponseOutcome, ServiceTier, SigningOrder, Vendor, VendorId,
};
use super::super::eligibility::{EligibilityFilter, NoEligibleVendors};
use super::super::policy::{PolicyError, RoutingPolicy};
use super::super::scoring::{ScoreStrategy, ScoringEngine, WeightedSum};
use super::super::sla::SlaPolicy;
use super::super::tiering::{CompletionRecord, CompletionReport, TierChange, TierRecalculator};
use super::book::{settled_response, Refusal};
use super::ledger::CapacityLedger;
use super::{DispatchCollaborators, DispatchError, OrderBook, OrderStatusView};

/// Result of reporting a finished assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionAck {
    pub record: CompletionRecord,
    pub tier_change: Option<TierChange>,
}

/// Maps the tokio clock onto wall time so paused-clock runs stamp consistent timestamps.
#[derive(Debug, Clone, Copy)]
struct DispatchClock {
    origin: Instant,
    wall: DateTime<Utc>,
}

impl DispatchClock {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
            wall: Utc::now(),
        }
    }

    fn wall_at(&self, instant: Instant) -> DateTime<Utc> {
        let offset = instant.saturating_duration_since(self.origin);
        self.wall + chrono::Duration::from_std(offset).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn now(&self) -> DateTime<Utc> {
        self.wall_at(Instant::now())
    }
}

struct OrderEntry {
    order: SigningOrder,
    book: OrderBook,
    started: Instant,
    cancelled: watch::Sender<bool>,
    decision: watch::Sender<Option<RoutingDecision>>,
}

impl OrderEntry {
    fn new(order: SigningOrder) -> Self {
        let book = OrderBook::new(order.id.clone(), order.service_tier);
        Self {
            order,
            book,
            started: Instant::now(),
            cancelled: watch::channel(false).0,
            decision: watch::channel(None).0,
        }
    }
}

/// Where an order currently lives: in the dispatch table, or only in the decision log.
enum Tracked {
    Live(Arc<OrderEntry>),
    Archived(RoutingDecision),
}

enum RoundOutcome {
    Confirmed(VendorId),
    Cancelled,
    Unfilled { had_candidates: bool },
}

struct EngineShared {
    policy: RoutingPolicy,
    eligibility: EligibilityFilter,
    scoring: ScoringEngine,
    sla: SlaPolicy,
    recalculator: Arc<TierRecalculator>,
    ledger: CapacityLedger,
    collaborators: DispatchCollaborators,
    orders: RwLock<HashMap<OrderId, Arc<OrderEntry>>>,
    sequence: AtomicU64,
    clock: DispatchClock,
}

/// Drives every order from intake to a terminal routing decision, one tokio task per order.
#[derive(Clone)]
pub struct DispatchEngine {
    shared: Arc<EngineShared>,
}

impl DispatchEngine {
    pub fn new(
        policy: RoutingPolicy,
        collaborators: DispatchCollaborators,
    ) -> Result<Self, PolicyError> {
        Self::with_strategy(policy, collaborators, Arc::new(WeightedSum))
    }

    pub fn with_strategy(
        policy: RoutingPolicy,
        collaborators: DispatchCollaborators,
        strategy: Arc<dyn ScoreStrategy>,
    ) -> Result<Self, PolicyError> {
        policy.validate()?;

        let recalculator = Arc::new(TierRecalculator::new(
            policy.tiers.clone(),
            policy.performance.clone(),
            Arc::clone(&collaborators.history),
        ));

        Ok(Self {
            shared: Arc::new(EngineShared {
                eligibility: EligibilityFilter::new(policy.eligibility.clone()),
                scoring: ScoringEngine::with_strategy(policy.weights.clone(), strategy),
                sla: SlaPolicy::new(policy.sla),
                recalculator,
                ledger: CapacityLedger::new(),
                collaborators,
                orders: RwLock::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                clock: DispatchClock::start(),
                policy,
            }),
        })
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.shared.policy
    }

    pub fn ledger(&self) -> &CapacityLedger {
        &self.shared.ledger
    }

    pub fn recalculator(&self) -> Arc<TierRecalculator> {
        Arc::clone(&self.shared.recalculator)
    }

    /// Register the order and start its dispatch task. Returns as soon as the id is assigned.
    pub fn create_order(&self, request: OrderRequest) -> Result<OrderId, DispatchError> {
        validate_request(&request)?;
        let vendors = self
            .shared
            .collaborators
            .directory
            .vendors_in_state(&request.state)?;

        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let order_id = OrderId(format!("ord-{sequence:06}"));
        let order = SigningOrder::from_request(order_id.clone(), request, self.shared.clock.now());

        info!(
            order_id = %order_id,
            state = %order.state,
            signing_type = order.signing_type.label(),
            service_tier = order.service_tier.label(),
            directory_vendors = vendors.len(),
            "order accepted for dispatch"
        );

        let entry = Arc::new(OrderEntry::new(order));
        self.shared
            .orders
            .write()
            .expect("order table lock poisoned")
            .insert(order_id.clone(), Arc::clone(&entry));

        tokio::spawn(self.clone().drive(entry, vendors));
        Ok(order_id)
    }

    pub fn respond_offer(
        &self,
        order_id: &OrderId,
        response: OfferResponse,
    ) -> Result<ResponseOutcome, DispatchError> {
        let responded_at = response
            .responded_at
            .unwrap_or_else(|| self.shared.clock.now());
        let resolution = match self.lookup(order_id)? {
            Tracked::Live(entry) => {
                entry
                    .book
                    .respond(&response.vendor_id, response.decision, responded_at)
            }
            Tracked::Archived(decision) => {
                let latest = decision
                    .attempts
                    .iter()
                    .rev()
                    .find(|attempt| attempt.vendor_id == response.vendor_id)
                    .map(|attempt| attempt.outcome);
                settled_response(
                    decision.outcome.status(),
                    latest,
                    &response.vendor_id,
                    response.decision,
                )
            }
        };

        match resolution {
            Ok(resolution) => {
                if let Some(kind) = resolution.anomaly {
                    warn!(
                        order_id = %order_id,
                        vendor_id = %response.vendor_id,
                        kind = ?kind,
                        "acceptance lost the race"
                    );
                    let anomaly = RaceAnomaly {
                        order_id: order_id.clone(),
                        vendor_id: response.vendor_id.clone(),
                        kind,
                        observed_at: self.shared.clock.now(),
                    };
                    if let Err(err) = self.shared.collaborators.decision_log.record_anomaly(anomaly)
                    {
                        error!(order_id = %order_id, error = %err, "failed to record race anomaly");
                    }
                }
                info!(
                    order_id = %order_id,
                    vendor_id = %response.vendor_id,
                    outcome = resolution.outcome.label(),
                    "offer response handled"
                );
                Ok(resolution.outcome)
            }
            Err(Refusal { status, detail }) => {
                warn!(
                    order_id = %order_id,
                    vendor_id = %response.vendor_id,
                    status = status.label(),
                    detail = %detail,
                    "offer response rejected"
                );
                Err(DispatchError::InvalidTransition {
                    order_id: order_id.clone(),
                    status,
                    detail,
                })
            }
        }
    }

    pub fn cancel_order(&self, order_id: &OrderId) -> Result<(), DispatchError> {
        let settled = match self.lookup(order_id)? {
            Tracked::Live(entry) => entry.book.cancel().map(|outstanding| (entry, outstanding)),
            Tracked::Archived(decision) => Err(decision.outcome.status()),
        };
        match settled {
            Ok((entry, outstanding)) => {
                entry.cancelled.send_replace(true);
                info!(order_id = %order_id, outstanding, "order cancelled");
                Ok(())
            }
            Err(status) => Err(DispatchError::InvalidTransition {
                order_id: order_id.clone(),
                status,
                detail: "order already settled".to_string(),
            }),
        }
    }

    /// Close out a confirmed assignment: free the vendor's slot and feed the tier recalculator.
    pub fn complete_order(
        &self,
        order_id: &OrderId,
        report: CompletionReport,
    ) -> Result<CompletionAck, DispatchError> {
        let entry = match self.lookup(order_id)? {
            Tracked::Live(entry) => entry,
            Tracked::Archived(decision) => {
                let status = decision.outcome.status();
                let detail = if status == OrderStatus::Confirmed {
                    "assignment already completed"
                } else {
                    "only confirmed orders can be completed"
                };
                return Err(DispatchError::InvalidTransition {
                    order_id: order_id.clone(),
                    status,
                    detail: detail.to_string(),
                });
            }
        };
        let status = entry.book.status();
        let refuse = |detail: &str| DispatchError::InvalidTransition {
            order_id: order_id.clone(),
            status,
            detail: detail.to_string(),
        };

        let Some(vendor_id) = entry
            .book
            .accepted_vendor()
            .filter(|_| status == OrderStatus::Confirmed)
        else {
            return Err(refuse("only confirmed orders can be completed"));
        };
        if entry.decision.borrow().is_none() {
            return Err(refuse("assignment is still being confirmed"));
        }
        if !self.shared.ledger.complete(&vendor_id, order_id) {
            return Err(refuse("assignment already completed"));
        }
        self.archive(order_id);

        let record = CompletionRecord {
            order_id: order_id.clone(),
            vendor_id: vendor_id.clone(),
            completed_at: report
                .completed_at
                .unwrap_or_else(|| self.shared.clock.now()),
            on_time: report.on_time,
            qa_passed: report.qa_passed,
            cancelled_by_vendor: report.cancelled_by_vendor,
        };
        self.shared.recalculator.record_completion(record.clone())?;

        let tier_change = if self.shared.policy.dispatch.recalculate_on_completion {
            self.shared.recalculator.recalculate_vendor(&vendor_id)?
        } else {
            None
        };

        info!(
            order_id = %order_id,
            vendor_id = %vendor_id,
            on_time = record.on_time,
            qa_passed = record.qa_passed,
            "assignment completed"
        );
        Ok(CompletionAck {
            record,
            tier_change,
        })
    }

    pub fn order_status(&self, order_id: &OrderId) -> Result<OrderStatusView, DispatchError> {
        let entry = match self.lookup(order_id)? {
            Tracked::Live(entry) => entry,
            Tracked::Archived(decision) => {
                return Ok(OrderStatusView {
                    accepted_vendor: decision.accepted_vendor().cloned(),
                    order: decision.order,
                    current_tier: decision.final_tier,
                    escalated: decision.escalated,
                    escalation_reason: decision.escalation_reason,
                    attempts: decision.attempts,
                })
            }
        };
        let mut order = entry.order.clone();
        order.status = entry.book.status();
        let (escalated, escalation_reason) = entry.book.escalation();
        Ok(OrderStatusView {
            order,
            current_tier: entry.book.current_tier(),
            escalated,
            escalation_reason,
            accepted_vendor: entry.book.accepted_vendor(),
            attempts: entry.book.attempts(),
        })
    }

    /// Terminal decision, or `None` while the order is still in flight.
    pub fn decision(&self, order_id: &OrderId) -> Result<Option<RoutingDecision>, DispatchError> {
        match self.lookup(order_id)? {
            Tracked::Live(entry) => {
                let decision = entry.decision.borrow().clone();
                Ok(decision)
            }
            Tracked::Archived(decision) => Ok(Some(decision)),
        }
    }

    pub async fn wait_for_decision(
        &self,
        order_id: &OrderId,
    ) -> Result<RoutingDecision, DispatchError> {
        let entry = match self.lookup(order_id)? {
            Tracked::Live(entry) => entry,
            Tracked::Archived(decision) => return Ok(decision),
        };
        let mut decisions = entry.decision.subscribe();
        loop {
            let current = decisions.borrow_and_update().clone();
            if let Some(decision) = current {
                return Ok(decision);
            }
            if decisions.changed().await.is_err() {
                return Err(DispatchError::UnknownOrder(order_id.clone()));
            }
        }
    }

    pub fn recalculate_tiers(&self) -> Result<Vec<TierChange>, DispatchError> {
        Ok(self.shared.recalculator.recalculate_all()?)
    }

    /// Orders still held in memory: in flight, or confirmed and awaiting completion.
    pub fn live_orders(&self) -> usize {
        self.shared
            .orders
            .read()
            .expect("order table lock poisoned")
            .len()
    }

    // Terminal orders leave the table only after their decision is appended, so a miss here
    // falls through to the log.
    fn lookup(&self, order_id: &OrderId) -> Result<Tracked, DispatchError> {
        let live = self
            .shared
            .orders
            .read()
            .expect("order table lock poisoned")
            .get(order_id)
            .cloned();
        if let Some(entry) = live {
            return Ok(Tracked::Live(entry));
        }
        self.shared
            .collaborators
            .decision_log
            .find(order_id)
            .map(Tracked::Archived)
            .ok_or_else(|| DispatchError::UnknownOrder(order_id.clone()))
    }

    fn archive(&self, order_id: &OrderId) {
        let removed = self
            .shared
            .orders
            .write()
            .expect("order table lock poisoned")
            .remove(order_id)
            .is_some();
        if removed {
            debug!(order_id = %order_id, "order archived");
        }
    }

    async fn drive(self, entry: Arc<OrderEntry>, initial: Vec<Vendor>) {
        let mut tier = entry.order.service_tier;
        let mut broadcast = tier == ServiceTier::Rescue;
        let mut snapshot = Some(initial);

        let outcome = loop {
            let deadline = Instant::now() + self.shared.sla.terms(tier).confirmation_deadline();
            let vendors = match snapshot.take() {
                Some(vendors) => vendors,
                None => self.fetch_vendors(&entry.order),
            };

            let round = if broadcast {
                self.broadcast_round(&entry, vendors, tier, deadline).await
            } else {
                self.sequential_round(&entry, vendors, deadline).await
            };

            let had_candidates = match round {
                RoundOutcome::Confirmed(vendor_id) => break DecisionOutcome::Confirmed { vendor_id },
                RoundOutcome::Cancelled => break DecisionOutcome::Cancelled,
                RoundOutcome::Unfilled { had_candidates } => had_candidates,
            };

            match self.shared.sla.escalation_target(tier) {
                Some(next) => {
                    let reason = if had_candidates {
                        EscalationReason::SlaBreach
                    } else {
                        EscalationReason::NoCoverage
                    };
                    if entry.book.escalate(next, reason).is_err() {
                        break settled_outcome(&entry);
                    }
                    info!(
                        order_id = %entry.order.id,
                        from = tier.label(),
                        to = next.label(),
                        reason = ?reason,
                        "order escalated"
                    );
                    tier = next;
                    broadcast = true;
                }
                None => {
                    let reason = if had_candidates {
                        FailureReason::NoCoverageRescue
                    } else {
                        FailureReason::NoCoverage
                    };
                    if entry.book.fail().is_err() {
                        break settled_outcome(&entry);
                    }
                    warn!(
                        order_id = %entry.order.id,
                        reason = reason.label(),
                        "order could not be covered"
                    );
                    break DecisionOutcome::Failed { reason };
                }
            }
        };

        self.finalize(&entry, outcome);
    }

    async fn sequential_round(
        &self,
        entry: &Arc<OrderEntry>,
        vendors: Vec<Vendor>,
        deadline: Instant,
    ) -> RoundOutcome {
        let candidates = match self.candidates(&entry.order, vendors, false) {
            Ok(candidates) => candidates,
            Err(empty) => {
                log_no_coverage(&empty, false);
                return RoundOutcome::Unfilled {
                    had_candidates: false,
                };
            }
        };
        entry.book.mark_offered();

        for vendor in candidates {
            if entry.book.status() == OrderStatus::Cancelled {
                return RoundOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let offer_deadline = match self.shared.policy.dispatch.offer_timeout_secs {
                Some(secs) => (now + Duration::from_secs(secs)).min(deadline),
                None => deadline,
            };

            let vendor_id = vendor.id.clone();
            let outcome = self
                .clone()
                .offer(Arc::clone(entry), vendor, offer_deadline, false)
                .await;
            if outcome == Some(OfferOutcome::Accepted) {
                return RoundOutcome::Confirmed(vendor_id);
            }
        }

        self.close_round(entry, deadline).await
    }

    async fn broadcast_round(
        &self,
        entry: &Arc<OrderEntry>,
        vendors: Vec<Vendor>,
        tier: ServiceTier,
        deadline: Instant,
    ) -> RoundOutcome {
        let candidates = match self.candidates(&entry.order, vendors, true) {
            Ok(candidates) => candidates,
            Err(empty) => {
                log_no_coverage(&empty, true);
                return RoundOutcome::Unfilled {
                    had_candidates: false,
                };
            }
        };
        entry.book.mark_offered();

        let fanout = self.shared.policy.dispatch.rescue_fanout.max(1);
        let (results_tx, mut results) = mpsc::channel(fanout);
        let mut sent = 0usize;
        for vendor in candidates.into_iter().take(fanout) {
            let engine = self.clone();
            let entry = Arc::clone(entry);
            let results_tx = results_tx.clone();
            sent += 1;
            tokio::spawn(async move {
                let vendor_id = vendor.id.clone();
                let outcome = engine.offer(entry, vendor, deadline, true).await;
                let _ = results_tx.send((vendor_id, outcome)).await;
            });
        }
        drop(results_tx);

        info!(
            order_id = %entry.order.id,
            tier = tier.label(),
            vendors = sent,
            "rescue broadcast sent"
        );

        let mut winner = None;
        while let Some((vendor_id, outcome)) = results.recv().await {
            if outcome == Some(OfferOutcome::Accepted) {
                winner = Some(vendor_id);
            }
        }
        if let Some(vendor_id) = winner {
            return RoundOutcome::Confirmed(vendor_id);
        }

        self.close_round(entry, deadline).await
    }

    async fn close_round(&self, entry: &OrderEntry, deadline: Instant) -> RoundOutcome {
        if !self.shared.policy.dispatch.escalate_on_exhaustion {
            hold_until(entry, deadline).await;
        }
        if entry.book.status() == OrderStatus::Cancelled {
            RoundOutcome::Cancelled
        } else {
            RoundOutcome::Unfilled {
                had_candidates: true,
            }
        }
    }

    /// Offer the order to one vendor and wait for the answer or the deadline. `None` when the
    /// vendor could not be reserved or the order settled before the offer went out.
    async fn offer(
        self,
        entry: Arc<OrderEntry>,
        vendor: Vendor,
        deadline: Instant,
        rescue: bool,
    ) -> Option<OfferOutcome> {
        let shared = &self.shared;
        let order = &entry.order;

        if let Err(rejection) = shared.ledger.try_reserve(&vendor, &order.id, order.window) {
            debug!(
                order_id = %order.id,
                vendor_id = %vendor.id,
                rejection = ?rejection,
                "vendor skipped at reservation"
            );
            return None;
        }

        let sent_at = shared.clock.now();
        let deadline_at = shared.clock.wall_at(deadline);
        let Some((index, response)) =
            entry
                .book
                .open(vendor.id.clone(), sent_at, deadline_at, rescue)
        else {
            shared.ledger.release(&vendor.id, &order.id);
            return None;
        };

        let notice = OfferNotice {
            order_id: order.id.clone(),
            vendor_id: vendor.id.clone(),
            deadline: deadline_at,
            state: order.state.clone(),
            signing_type: order.signing_type,
            service_tier: entry.book.current_tier(),
            window: order.window,
            rescue,
        };

        let outcome = match shared.collaborators.notifier.send_offer(&notice) {
            Err(err) => {
                warn!(
                    order_id = %order.id,
                    vendor_id = %vendor.id,
                    error = %err,
                    "offer could not be delivered"
                );
                entry.book.mark_undeliverable(index, shared.clock.now())
            }
            Ok(()) => {
                info!(
                    order_id = %order.id,
                    vendor_id = %vendor.id,
                    rescue,
                    deadline = %deadline_at,
                    "offer sent"
                );
                match tokio::time::timeout_at(deadline, response).await {
                    Ok(_) => entry.book.outcome(index),
                    Err(_) => entry.book.expire(index, shared.clock.now()),
                }
            }
        };

        if outcome == OfferOutcome::Accepted {
            shared.ledger.commit(&vendor.id, &order.id);
        } else {
            shared.ledger.release(&vendor.id, &order.id);
        }
        info!(
            order_id = %order.id,
            vendor_id = %vendor.id,
            outcome = outcome.label(),
            "offer resolved"
        );
        Some(outcome)
    }

    fn fetch_vendors(&self, order: &SigningOrder) -> Vec<Vendor> {
        match self
            .shared
            .collaborators
            .directory
            .vendors_in_state(&order.state)
        {
            Ok(vendors) => vendors,
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "vendor directory unavailable for escalation");
                Vec::new()
            }
        }
    }

    /// Overlay live load and current standings on the directory snapshot, filter, then rank.
    fn candidates(
        &self,
        order: &SigningOrder,
        mut vendors: Vec<Vendor>,
        rescue: bool,
    ) -> Result<Vec<Vendor>, NoEligibleVendors> {
        for vendor in &mut vendors {
            self.shared.recalculator.apply_standing(vendor);
            let load = self.shared.ledger.load(&vendor.id);
            vendor.active_offer_count = load.active();
            vendor.committed_windows.extend(
                load.windows
                    .into_iter()
                    .filter(|(held_for, _)| held_for != &order.id)
                    .map(|(_, window)| window),
            );
        }
        if rescue {
            vendors.retain(|vendor| vendor.rescue_standby);
        }

        let eligible = self.shared.eligibility.filter(order, &vendors)?;
        let ranked = self.shared.scoring.rank(order, &eligible);
        for candidate in &ranked {
            debug!(
                order_id = %order.id,
                vendor_id = %candidate.vendor.id,
                score = candidate.score.total,
                "candidate ranked"
            );
        }
        Ok(ranked
            .into_iter()
            .map(|candidate| candidate.vendor.clone())
            .collect())
    }

    fn finalize(&self, entry: &OrderEntry, outcome: DecisionOutcome) {
        let decided = Instant::now();
        let (escalated, escalation_reason) = entry.book.escalation();
        let mut order = entry.order.clone();
        order.status = outcome.status();
        let decision = RoutingDecision {
            order_id: entry.order.id.clone(),
            order,
            requested_tier: entry.order.service_tier,
            final_tier: entry.book.current_tier(),
            attempts: entry.book.attempts(),
            outcome,
            escalated,
            escalation_reason,
            started_at: entry.order.created_at,
            decided_at: self.shared.clock.wall_at(decided),
            elapsed_ms: decided.saturating_duration_since(entry.started).as_millis() as u64,
        };

        let logged = match self
            .shared
            .collaborators
            .decision_log
            .append(decision.clone())
        {
            Ok(()) => true,
            Err(err) => {
                error!(order_id = %decision.order_id, error = %err, "failed to append routing decision");
                false
            }
        };
        if let DecisionOutcome::Failed { reason } = decision.outcome {
            self.alert_operator(&decision, reason);
        }

        info!(
            order_id = %decision.order_id,
            outcome = decision.outcome.label(),
            final_tier = decision.final_tier.label(),
            offers = decision.offers_sent(),
            elapsed_ms = decision.elapsed_ms,
            "routing decision recorded"
        );
        let order_id = decision.order_id.clone();
        let settled = decision.accepted_vendor().is_none();
        entry.decision.send_replace(Some(decision));

        // Confirmed orders stay until completion releases the assignment hold.
        if logged && settled {
            self.archive(&order_id);
        }
    }

    fn alert_operator(&self, decision: &RoutingDecision, reason: FailureReason) {
        let mut details = BTreeMap::new();
        details.insert("reason".to_string(), reason.label().to_string());
        details.insert(
            "requested_tier".to_string(),
            decision.requested_tier.label().to_string(),
        );
        details.insert(
            "final_tier".to_string(),
            decision.final_tier.label().to_string(),
        );
        details.insert(
            "offers_sent".to_string(),
            decision.offers_sent().to_string(),
        );

        let alert = OperatorAlert {
            template: "order_unfilled".to_string(),
            order_id: decision.order_id.clone(),
            details,
        };
        if let Err(err) = self.shared.collaborators.alerts.publish(alert) {
            error!(order_id = %decision.order_id, error = %err, "failed to alert operators");
        }
    }
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("policy", &self.shared.policy)
            .finish_non_exhaustive()
    }
}

fn validate_request(request: &OrderRequest) -> Result<(), DispatchError> {
    if !request.window.is_valid() {
        return Err(DispatchError::InvalidOrder(
            "signing window must end after it starts".to_string(),
        ));
    }
    if let Some(location) = request.location {
        let valid = location.latitude.is_finite()
            && location.longitude.is_finite()
            && (-90.0..=90.0).contains(&location.latitude)
            && (-180.0..=180.0).contains(&location.longitude);
        if !valid {
            return Err(DispatchError::InvalidOrder(
                "signing location is not a valid coordinate".to_string(),
            ));
        }
    }
    Ok(())
}

fn log_no_coverage(empty: &NoEligibleVendors, rescue: bool) {
    info!(
        order_id = %empty.order_id,
        state = %empty.state,
        considered = empty.considered,
        rejections = ?empty.rejections,
        rescue,
        "no eligible vendors"
    );
}

fn settled_outcome(entry: &OrderEntry) -> DecisionOutcome {
    match (entry.book.status(), entry.book.accepted_vendor()) {
        (OrderStatus::Confirmed, Some(vendor_id)) => DecisionOutcome::Confirmed { vendor_id },
        _ => DecisionOutcome::Cancelled,
    }
}

async fn hold_until(entry: &OrderEntry, deadline: Instant) {
    let mut cancelled = entry.cancelled.subscribe();
    let wait_for_cancel = async move {
        loop {
            let flag = *cancelled.borrow_and_update();
            if flag {
                return;
            }
            if cancelled.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {}
        _ = wait_for_cancel => {}
    }
}
