use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::routing::collaborators::{
    AlertError, DirectoryError, NotifyError, OfferNotifier, OperatorAlert, OperatorAlertPublisher,
    VendorDirectory,
};
use crate::routing::decision_log::InMemoryDecisionLog;
use crate::routing::dispatch::{DispatchCollaborators, DispatchEngine, DispatchSettings};
use crate::routing::domain::{
    CommissionStatus, GeoPoint, OfferNotice, OrderId, OrderRequest, OrderStatus, ServiceTier,
    SigningOrder, SigningType, StateCode, TimeWindow, Vendor, VendorId, VendorTier,
};
use crate::routing::eligibility::EligibilityPolicy;
use crate::routing::policy::RoutingPolicy;
use crate::routing::scoring::{ScoreWeights, TierPoints};
use crate::routing::sla::SlaConfig;
use crate::routing::tiering::{
    CompletionHistory, CompletionRecord, HistoryError, PerformancePolicy, TierThreshold,
    VendorTierThresholds,
};

pub(super) const PHILADELPHIA: GeoPoint = GeoPoint {
    latitude: 39.9526,
    longitude: -75.1652,
};

pub(super) const PITTSBURGH: GeoPoint = GeoPoint {
    latitude: 40.4406,
    longitude: -79.9959,
};

pub(super) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn window(start_hour: u32, end_hour: u32) -> TimeWindow {
    TimeWindow {
        start: at(start_hour, 0),
        end: at(end_hour, 0),
    }
}

pub(super) fn state(code: &str) -> StateCode {
    StateCode::parse(code).expect("valid state code")
}

pub(super) fn vid(id: &str) -> VendorId {
    VendorId(id.to_string())
}

/// PA-commissioned, RON-capable vendor based in Philadelphia. Tier follows the test thresholds
/// for the given score with a long completion history.
pub(super) fn vendor(id: &str, tier: VendorTier, score: f64) -> Vendor {
    let mut commissions = BTreeMap::new();
    commissions.insert(state("PA"), CommissionStatus::Active);
    Vendor {
        id: vid(id),
        commissions,
        ron_capable: true,
        specializations: BTreeSet::new(),
        performance_score: score,
        tier,
        completed_orders: 120,
        active_offer_count: 0,
        capacity_limit: 3,
        base_location: PHILADELPHIA,
        mean_response_latency_secs: 60.0,
        rescue_standby: false,
        committed_windows: Vec::new(),
    }
}

pub(super) fn standby(mut vendor: Vendor) -> Vendor {
    vendor.rescue_standby = true;
    vendor
}

pub(super) fn request(tier: ServiceTier, signing_type: SigningType) -> OrderRequest {
    OrderRequest {
        state: state("PA"),
        signing_type,
        loan_type: None,
        facility_type: None,
        service_tier: tier,
        window: window(14, 15),
        location: Some(PHILADELPHIA),
    }
}

pub(super) fn order(tier: ServiceTier, signing_type: SigningType) -> SigningOrder {
    SigningOrder::from_request(
        OrderId("ord-test".to_string()),
        request(tier, signing_type),
        at(9, 0),
    )
}

pub(super) fn thresholds() -> VendorTierThresholds {
    let row = |tier, min_score, max_score, min_completed_orders| TierThreshold {
        tier,
        min_score,
        max_score,
        min_completed_orders,
        benefits: BTreeSet::new(),
    };
    VendorTierThresholds::new(vec![
        row(VendorTier::Bronze, 0.0, 59.99, 0),
        row(VendorTier::Silver, 60.0, 74.99, 10),
        row(VendorTier::Gold, 75.0, 89.99, 25),
        row(VendorTier::Elite, 90.0, 100.0, 50),
    ])
}

pub(super) fn weights() -> ScoreWeights {
    ScoreWeights {
        tier_points: TierPoints {
            bronze: 0.0,
            silver: 10.0,
            gold: 20.0,
            elite: 30.0,
        },
        performance: 40.0,
        specialization_match: 15.0,
        proximity: 10.0,
        proximity_scale_km: 25.0,
        load_penalty: 5.0,
    }
}

pub(super) fn performance_policy() -> PerformancePolicy {
    PerformancePolicy {
        on_time_weight: 0.5,
        qa_pass_weight: 0.3,
        cancellation_weight: 0.2,
        window_size: 20,
    }
}

pub(super) fn routing_policy() -> RoutingPolicy {
    RoutingPolicy {
        eligibility: EligibilityPolicy {
            ron_permitted_states: [state("PA")].into_iter().collect(),
            certified_specializations: ["reverse_mortgage", "correctional_facility"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        },
        weights: weights(),
        sla: SlaConfig::default(),
        tiers: thresholds(),
        performance: performance_policy(),
        dispatch: DispatchSettings::default(),
    }
}

#[derive(Default)]
pub(super) struct MemoryDirectory {
    vendors: Mutex<Vec<Vendor>>,
    offline: AtomicBool,
}

impl MemoryDirectory {
    pub(super) fn with_vendors(vendors: Vec<Vendor>) -> Self {
        Self {
            vendors: Mutex::new(vendors),
            offline: AtomicBool::new(false),
        }
    }

    pub(super) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl VendorDirectory for MemoryDirectory {
    fn vendors_in_state(&self, state: &StateCode) -> Result<Vec<Vendor>, DirectoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("directory offline".to_string()));
        }
        Ok(self
            .vendors
            .lock()
            .expect("directory mutex poisoned")
            .iter()
            .filter(|vendor| vendor.commissions.contains_key(state))
            .cloned()
            .collect())
    }
}

pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<OfferNotice>>,
    unreachable: Mutex<HashSet<VendorId>>,
    outbox: mpsc::UnboundedSender<OfferNotice>,
}

impl RecordingNotifier {
    pub(super) fn new() -> (Self, mpsc::UnboundedReceiver<OfferNotice>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (
            Self {
                sent: Mutex::new(Vec::new()),
                unreachable: Mutex::new(HashSet::new()),
                outbox,
            },
            inbox,
        )
    }

    pub(super) fn sent(&self) -> Vec<OfferNotice> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn mark_unreachable(&self, vendor_id: &str) {
        self.unreachable
            .lock()
            .expect("notifier mutex poisoned")
            .insert(vid(vendor_id));
    }
}

impl OfferNotifier for RecordingNotifier {
    fn send_offer(&self, notice: &OfferNotice) -> Result<(), NotifyError> {
        if self
            .unreachable
            .lock()
            .expect("notifier mutex poisoned")
            .contains(&notice.vendor_id)
        {
            return Err(NotifyError::Transport(format!(
                "no endpoint for {}",
                notice.vendor_id
            )));
        }
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice.clone());
        let _ = self.outbox.send(notice.clone());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryAlerts {
    events: Arc<Mutex<Vec<OperatorAlert>>>,
}

impl MemoryAlerts {
    pub(super) fn events(&self) -> Vec<OperatorAlert> {
        self.events.lock().expect("alert mutex poisoned").clone()
    }
}

impl OperatorAlertPublisher for MemoryAlerts {
    fn publish(&self, alert: OperatorAlert) -> Result<(), AlertError> {
        self.events
            .lock()
            .expect("alert mutex poisoned")
            .push(alert);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct MemoryHistory {
    records: Mutex<Vec<CompletionRecord>>,
}

impl CompletionHistory for MemoryHistory {
    fn record(&self, record: CompletionRecord) -> Result<(), HistoryError> {
        let mut records = self.records.lock().expect("history mutex poisoned");
        if records
            .iter()
            .any(|existing| existing.order_id == record.order_id)
        {
            return Err(HistoryError::Duplicate(record.order_id));
        }
        records.push(record);
        Ok(())
    }

    fn recent(
        &self,
        vendor_id: &VendorId,
        limit: usize,
    ) -> Result<Vec<CompletionRecord>, HistoryError> {
        let mut matching: Vec<CompletionRecord> = self
            .records
            .lock()
            .expect("history mutex poisoned")
            .iter()
            .filter(|record| &record.vendor_id == vendor_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        matching.truncate(limit);
        Ok(matching)
    }

    fn completed_count(&self, vendor_id: &VendorId) -> Result<u32, HistoryError> {
        Ok(self
            .records
            .lock()
            .expect("history mutex poisoned")
            .iter()
            .filter(|record| &record.vendor_id == vendor_id)
            .count() as u32)
    }

    fn vendors(&self) -> Result<Vec<VendorId>, HistoryError> {
        let vendors: BTreeSet<VendorId> = self
            .records
            .lock()
            .expect("history mutex poisoned")
            .iter()
            .map(|record| record.vendor_id.clone())
            .collect();
        Ok(vendors.into_iter().collect())
    }
}

pub(super) struct UnavailableHistory;

impl CompletionHistory for UnavailableHistory {
    fn record(&self, _record: CompletionRecord) -> Result<(), HistoryError> {
        Err(HistoryError::Unavailable("warehouse offline".to_string()))
    }

    fn recent(
        &self,
        _vendor_id: &VendorId,
        _limit: usize,
    ) -> Result<Vec<CompletionRecord>, HistoryError> {
        Err(HistoryError::Unavailable("warehouse offline".to_string()))
    }

    fn completed_count(&self, _vendor_id: &VendorId) -> Result<u32, HistoryError> {
        Err(HistoryError::Unavailable("warehouse offline".to_string()))
    }

    fn vendors(&self) -> Result<Vec<VendorId>, HistoryError> {
        Err(HistoryError::Unavailable("warehouse offline".to_string()))
    }
}

pub(super) struct Harness {
    pub engine: DispatchEngine,
    pub directory: Arc<MemoryDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub notices: mpsc::UnboundedReceiver<OfferNotice>,
    pub log: Arc<InMemoryDecisionLog>,
    pub alerts: MemoryAlerts,
    pub history: Arc<MemoryHistory>,
}

impl Harness {
    /// Next offer the engine sends. Under a paused clock this lets time run forward to it.
    pub(super) async fn next_notice(&mut self) -> OfferNotice {
        self.notices.recv().await.expect("notifier outbox open")
    }

    pub(super) fn status(&self, order_id: &OrderId) -> OrderStatus {
        self.engine
            .order_status(order_id)
            .expect("order exists")
            .order
            .status
    }
}

pub(super) fn harness(vendors: Vec<Vendor>) -> Harness {
    harness_with(routing_policy(), vendors)
}

pub(super) fn harness_with(policy: RoutingPolicy, vendors: Vec<Vendor>) -> Harness {
    let directory = Arc::new(MemoryDirectory::with_vendors(vendors));
    let (notifier, notices) = RecordingNotifier::new();
    let notifier = Arc::new(notifier);
    let log = Arc::new(InMemoryDecisionLog::new());
    let alerts = MemoryAlerts::default();
    let history = Arc::new(MemoryHistory::default());

    let engine = DispatchEngine::new(
        policy,
        DispatchCollaborators {
            directory: directory.clone(),
            notifier: notifier.clone(),
            decision_log: log.clone(),
            alerts: Arc::new(alerts.clone()),
            history: history.clone(),
        },
    )
    .expect("policy validates");

    Harness {
        engine,
        directory,
        notifier,
        notices,
        log,
        alerts,
        history,
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
