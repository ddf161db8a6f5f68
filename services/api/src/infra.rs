use metrics_exporter_prometheus::PrometheusHandle;
use notary_dispatch::routing::{
    AlertError, CommissionStatus, CompletionHistory, CompletionRecord, DirectoryError,
    DispatchSettings, EligibilityPolicy, GeoPoint, HistoryError, NotifyError, OfferNotice,
    OfferNotifier, OperatorAlert, OperatorAlertPublisher, PerformancePolicy, RoutingPolicy,
    ScoreWeights, SlaConfig, StateCode, TierPoints, TierThreshold, Vendor, VendorDirectory,
    VendorId, VendorTier, VendorTierThresholds,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryVendorDirectory {
    vendors: Arc<RwLock<HashMap<VendorId, Vendor>>>,
}

impl InMemoryVendorDirectory {
    pub(crate) fn seeded(vendors: Vec<Vendor>) -> Self {
        let directory = Self::default();
        for vendor in vendors {
            directory.upsert(vendor);
        }
        directory
    }

    pub(crate) fn upsert(&self, vendor: Vendor) {
        self.vendors
            .write()
            .expect("directory lock poisoned")
            .insert(vendor.id.clone(), vendor);
    }
}

impl VendorDirectory for InMemoryVendorDirectory {
    fn vendors_in_state(&self, state: &StateCode) -> Result<Vec<Vendor>, DirectoryError> {
        let guard = self.vendors.read().expect("directory lock poisoned");
        let mut vendors: Vec<Vendor> = guard
            .values()
            .filter(|vendor| vendor.commissions.contains_key(state))
            .cloned()
            .collect();
        vendors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(vendors)
    }
}

/// Stand-in for the vendor messaging integration: logs each offer and optionally forwards it.
#[derive(Default, Clone)]
pub(crate) struct TracingOfferNotifier {
    sent: Arc<Mutex<Vec<OfferNotice>>>,
    outbox: Option<mpsc::UnboundedSender<OfferNotice>>,
}

impl TracingOfferNotifier {
    pub(crate) fn with_outbox() -> (Self, mpsc::UnboundedReceiver<OfferNotice>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (
            Self {
                sent: Arc::default(),
                outbox: Some(outbox),
            },
            inbox,
        )
    }

    pub(crate) fn sent(&self) -> Vec<OfferNotice> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl OfferNotifier for TracingOfferNotifier {
    fn send_offer(&self, notice: &OfferNotice) -> Result<(), NotifyError> {
        info!(
            order_id = %notice.order_id,
            vendor_id = %notice.vendor_id,
            tier = notice.service_tier.label(),
            rescue = notice.rescue,
            deadline = %notice.deadline,
            "offer delivered"
        );
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice.clone());
        if let Some(outbox) = &self.outbox {
            outbox
                .send(notice.clone())
                .map_err(|err| NotifyError::Transport(err.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryOperatorAlerts {
    events: Arc<Mutex<Vec<OperatorAlert>>>,
}

impl OperatorAlertPublisher for InMemoryOperatorAlerts {
    fn publish(&self, alert: OperatorAlert) -> Result<(), AlertError> {
        warn!(
            order_id = %alert.order_id,
            template = %alert.template,
            details = ?alert.details,
            "operator alert raised"
        );
        let mut guard = self.events.lock().expect("alert mutex poisoned");
        guard.push(alert);
        Ok(())
    }
}

impl InMemoryOperatorAlerts {
    pub(crate) fn events(&self) -> Vec<OperatorAlert> {
        self.events.lock().expect("alert mutex poisoned").clone()
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryCompletionHistory {
    records: Arc<Mutex<Vec<CompletionRecord>>>,
}

impl CompletionHistory for InMemoryCompletionHistory {
    fn record(&self, record: CompletionRecord) -> Result<(), HistoryError> {
        let mut guard = self.records.lock().expect("history mutex poisoned");
        if guard.iter().any(|existing| existing.order_id == record.order_id) {
            return Err(HistoryError::Duplicate(record.order_id));
        }
        guard.push(record);
        Ok(())
    }

    fn recent(
        &self,
        vendor_id: &VendorId,
        limit: usize,
    ) -> Result<Vec<CompletionRecord>, HistoryError> {
        let guard = self.records.lock().expect("history mutex poisoned");
        let mut matching: Vec<CompletionRecord> = guard
            .iter()
            .filter(|record| &record.vendor_id == vendor_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        matching.truncate(limit);
        Ok(matching)
    }

    fn completed_count(&self, vendor_id: &VendorId) -> Result<u32, HistoryError> {
        let guard = self.records.lock().expect("history mutex poisoned");
        Ok(guard
            .iter()
            .filter(|record| &record.vendor_id == vendor_id)
            .count() as u32)
    }

    fn vendors(&self) -> Result<Vec<VendorId>, HistoryError> {
        let guard = self.records.lock().expect("history mutex poisoned");
        let vendors: BTreeSet<VendorId> = guard
            .iter()
            .map(|record| record.vendor_id.clone())
            .collect();
        Ok(vendors.into_iter().collect())
    }
}

/// Illustrative policy used when no `ROUTING_POLICY_PATH` is configured.
pub(crate) fn default_routing_policy() -> RoutingPolicy {
    let threshold = |tier, min_score, max_score, min_completed_orders, benefits: &[&str]| {
        TierThreshold {
            tier,
            min_score,
            max_score,
            min_completed_orders,
            benefits: benefits.iter().map(|b| b.to_string()).collect(),
        }
    };

    RoutingPolicy {
        eligibility: EligibilityPolicy {
            ron_permitted_states: ["PA", "TX", "FL", "VA", "NJ"]
                .into_iter()
                .filter_map(StateCode::parse)
                .collect(),
            certified_specializations: ["reverse_mortgage", "correctional_facility", "hospital"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        },
        weights: ScoreWeights {
            tier_points: TierPoints {
                bronze: 0.0,
                silver: 10.0,
                gold: 20.0,
                elite: 30.0,
            },
            performance: 40.0,
            specialization_match: 15.0,
            proximity: 10.0,
            proximity_scale_km: 40.0,
            load_penalty: 5.0,
        },
        sla: SlaConfig::default(),
        tiers: VendorTierThresholds::new(vec![
            threshold(VendorTier::Bronze, 0.0, 59.99, 0, &[]),
            threshold(VendorTier::Silver, 60.0, 74.99, 10, &["standard_queue"]),
            threshold(
                VendorTier::Gold,
                75.0,
                89.99,
                25,
                &["priority_queue", "weekly_payout"],
            ),
            threshold(
                VendorTier::Elite,
                90.0,
                100.0,
                50,
                &["priority_queue", "rescue_bonus", "daily_payout"],
            ),
        ]),
        performance: PerformancePolicy {
            on_time_weight: 0.5,
            qa_pass_weight: 0.3,
            cancellation_weight: 0.2,
            window_size: 50,
        },
        dispatch: DispatchSettings::default(),
    }
}

pub(crate) struct SeedVendor {
    pub(crate) id: &'static str,
    pub(crate) states: &'static [&'static str],
    pub(crate) ron_capable: bool,
    pub(crate) specializations: &'static [&'static str],
    pub(crate) score: f64,
    pub(crate) completed_orders: u32,
    pub(crate) location: GeoPoint,
    pub(crate) rescue_standby: bool,
}

impl SeedVendor {
    pub(crate) fn into_vendor(self, thresholds: &VendorTierThresholds) -> Vendor {
        let commissions: BTreeMap<StateCode, CommissionStatus> = self
            .states
            .iter()
            .filter_map(|code| StateCode::parse(code))
            .map(|state| (state, CommissionStatus::Active))
            .collect();
        Vendor {
            id: VendorId(self.id.to_string()),
            commissions,
            ron_capable: self.ron_capable,
            specializations: self
                .specializations
                .iter()
                .map(|s| s.to_string())
                .collect(),
            performance_score: self.score,
            tier: thresholds.tier_for(self.score, self.completed_orders),
            completed_orders: self.completed_orders,
            active_offer_count: 0,
            capacity_limit: 3,
            base_location: self.location,
            mean_response_latency_secs: 90.0,
            rescue_standby: self.rescue_standby,
            committed_windows: Vec::new(),
        }
    }
}

pub(crate) const PHILADELPHIA: GeoPoint = GeoPoint {
    latitude: 39.9526,
    longitude: -75.1652,
};

const PITTSBURGH: GeoPoint = GeoPoint {
    latitude: 40.4406,
    longitude: -79.9959,
};

const CAMDEN: GeoPoint = GeoPoint {
    latitude: 39.9259,
    longitude: -75.1196,
};

/// Starter roster so a fresh service has vendors to route to.
pub(crate) fn seed_vendors(thresholds: &VendorTierThresholds) -> Vec<Vendor> {
    vec![
        SeedVendor {
            id: "pa-keystone-closings",
            states: &["PA", "NJ"],
            ron_capable: true,
            specializations: &["refinance"],
            score: 92.0,
            completed_orders: 140,
            location: PHILADELPHIA,
            rescue_standby: true,
        },
        SeedVendor {
            id: "pa-three-rivers-notary",
            states: &["PA"],
            ron_capable: true,
            specializations: &["reverse_mortgage"],
            score: 81.0,
            completed_orders: 64,
            location: PITTSBURGH,
            rescue_standby: true,
        },
        SeedVendor {
            id: "nj-riverside-signings",
            states: &["NJ", "PA"],
            ron_capable: false,
            specializations: &[],
            score: 68.0,
            completed_orders: 22,
            location: CAMDEN,
            rescue_standby: false,
        },
    ]
    .into_iter()
    .map(|seed| seed.into_vendor(thresholds))
    .collect()
}
