use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for field vendors (notaries and signing agents).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(pub String);

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier wrapper for signing orders accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Two-letter jurisdiction code, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateCode(String);

impl StateCode {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Self(trimmed.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StateCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StateCode::parse(&value).ok_or_else(|| format!("'{value}' is not a two-letter state code"))
    }
}

impl From<StateCode> for String {
    fn from(value: StateCode) -> Self {
        value.0
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Active,
    Expired,
}

/// How the signing ceremony is conducted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningType {
    InPerson,
    Ron,
    Hybrid,
}

impl SigningType {
    /// Whether any part of the ceremony happens over remote online notarization.
    pub const fn requires_remote(self) -> bool {
        matches!(self, SigningType::Ron | SigningType::Hybrid)
    }

    /// Whether the vendor has to travel to the signer.
    pub const fn has_in_person_leg(self) -> bool {
        matches!(self, SigningType::InPerson | SigningType::Hybrid)
    }

    pub const fn label(self) -> &'static str {
        match self {
            SigningType::InPerson => "in_person",
            SigningType::Ron => "ron",
            SigningType::Hybrid => "hybrid",
        }
    }
}

/// Customer-facing SLA class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Standard,
    Priority,
    Rescue,
}

impl ServiceTier {
    pub const ALL: [ServiceTier; 3] = [
        ServiceTier::Standard,
        ServiceTier::Priority,
        ServiceTier::Rescue,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ServiceTier::Standard => "standard",
            ServiceTier::Priority => "priority",
            ServiceTier::Rescue => "rescue",
        }
    }
}

/// Vendor performance classification. Ordering follows seniority: bronze is lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorTier {
    Bronze,
    Silver,
    Gold,
    Elite,
}

impl VendorTier {
    pub const ALL: [VendorTier; 4] = [
        VendorTier::Bronze,
        VendorTier::Silver,
        VendorTier::Gold,
        VendorTier::Elite,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            VendorTier::Bronze => "bronze",
            VendorTier::Silver => "silver",
            VendorTier::Gold => "gold",
            VendorTier::Elite => "elite",
        }
    }
}

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Half-open interval `[start, end)` during which the signing must take place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Vendor record as fed by the directory, refreshed with live load before matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub commissions: BTreeMap<StateCode, CommissionStatus>,
    pub ron_capable: bool,
    #[serde(default)]
    pub specializations: BTreeSet<String>,
    pub performance_score: f64,
    pub tier: VendorTier,
    #[serde(default)]
    pub completed_orders: u32,
    #[serde(default)]
    pub active_offer_count: u32,
    pub capacity_limit: u32,
    pub base_location: GeoPoint,
    pub mean_response_latency_secs: f64,
    #[serde(default)]
    pub rescue_standby: bool,
    #[serde(default)]
    pub committed_windows: Vec<TimeWindow>,
}

impl Vendor {
    pub fn has_active_commission(&self, state: &StateCode) -> bool {
        self.commissions.get(state) == Some(&CommissionStatus::Active)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.specializations.contains(tag)
    }

    pub fn has_capacity(&self) -> bool {
        self.active_offer_count < self.capacity_limit
    }
}

/// Inbound order payload from the booking collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub state: StateCode,
    pub signing_type: SigningType,
    #[serde(default)]
    pub loan_type: Option<String>,
    #[serde(default)]
    pub facility_type: Option<String>,
    pub service_tier: ServiceTier,
    pub window: TimeWindow,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// Order as tracked by the dispatch engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningOrder {
    pub id: OrderId,
    pub state: StateCode,
    pub signing_type: SigningType,
    pub loan_type: Option<String>,
    pub facility_type: Option<String>,
    pub service_tier: ServiceTier,
    pub created_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub location: Option<GeoPoint>,
    pub status: OrderStatus,
}

impl SigningOrder {
    pub fn from_request(id: OrderId, request: OrderRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            state: request.state,
            signing_type: request.signing_type,
            loan_type: request.loan_type,
            facility_type: request.facility_type,
            service_tier: request.service_tier,
            created_at,
            window: request.window,
            location: request.location,
            status: OrderStatus::Pending,
        }
    }

    /// Loan and facility tags carried by the order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.loan_type
            .as_deref()
            .into_iter()
            .chain(self.facility_type.as_deref())
    }
}

/// Order lifecycle. The discriminants back the atomic status cell used by dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OrderStatus {
    Pending = 0,
    Offered = 1,
    Escalated = 2,
    Confirmed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl OrderStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Offered => "offered",
            OrderStatus::Escalated => "escalated",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => OrderStatus::Pending,
            1 => OrderStatus::Offered,
            2 => OrderStatus::Escalated,
            3 => OrderStatus::Confirmed,
            4 => OrderStatus::Failed,
            _ => OrderStatus::Cancelled,
        }
    }

    /// Legal forward moves of the order state machine. `Pending`/`Offered` straight to `Failed`
    /// is only taken by rescue-tier orders, which have no escalation step.
    pub const fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Offered)
                | (Pending, Escalated)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Offered, Confirmed)
                | (Offered, Escalated)
                | (Offered, Failed)
                | (Offered, Cancelled)
                | (Escalated, Confirmed)
                | (Escalated, Failed)
                | (Escalated, Cancelled)
        )
    }
}

/// Resolution of an individual offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferOutcome {
    Pending,
    Accepted,
    Declined,
    TimedOut,
    Superseded,
    Undeliverable,
}

impl OfferOutcome {
    pub const fn is_pending(self) -> bool {
        matches!(self, OfferOutcome::Pending)
    }

    pub const fn label(self) -> &'static str {
        match self {
            OfferOutcome::Pending => "pending",
            OfferOutcome::Accepted => "accepted",
            OfferOutcome::Declined => "declined",
            OfferOutcome::TimedOut => "timed_out",
            OfferOutcome::Superseded => "superseded",
            OfferOutcome::Undeliverable => "undeliverable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAttempt {
    pub order_id: OrderId,
    pub vendor_id: VendorId,
    pub sent_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub outcome: OfferOutcome,
    pub rescue: bool,
}

/// Payload handed to the notification collaborator for delivery to a vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferNotice {
    pub order_id: OrderId,
    pub vendor_id: VendorId,
    pub deadline: DateTime<Utc>,
    pub state: StateCode,
    pub signing_type: SigningType,
    pub service_tier: ServiceTier,
    pub window: TimeWindow,
    pub rescue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorDecision {
    Accept,
    Decline,
}

/// Vendor reply received through the offer response webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferResponse {
    pub vendor_id: VendorId,
    pub decision: VendorDecision,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

/// What the responding vendor is told about their reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Confirmed,
    Declined,
    Superseded,
}

impl ResponseOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            ResponseOutcome::Confirmed => "confirmed",
            ResponseOutcome::Declined => "declined",
            ResponseOutcome::Superseded => "superseded",
        }
    }
}
