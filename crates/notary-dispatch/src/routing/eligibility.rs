use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::domain::{OrderId, SigningOrder, StateCode, Vendor};

/// Jurisdiction and certification matrix consulted before any vendor is ranked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityPolicy {
    /// States whose law permits remote online notarization.
    pub ron_permitted_states: BTreeSet<StateCode>,
    /// Loan or facility tags that a vendor must carry to be offered the order
    /// (e.g. `reverse_mortgage`, `correctional_facility`).
    pub certified_specializations: BTreeSet<String>,
}

impl EligibilityPolicy {
    pub fn permits_ron(&self, state: &StateCode) -> bool {
        self.ron_permitted_states.contains(state)
    }

    pub fn requires_certification(&self, tag: &str) -> bool {
        self.certified_specializations.contains(tag)
    }
}

/// The first rule a vendor failed, used for the rejection breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibilityRule {
    NoActiveCommission,
    RonNotPermitted,
    RonIncapable,
    MissingCertification,
    AtCapacity,
    WindowConflict,
}

/// Typed empty result: nobody can legally and technically serve the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("no eligible vendors for order {order_id} in {state} ({considered} considered)")]
pub struct NoEligibleVendors {
    pub order_id: OrderId,
    pub state: StateCode,
    pub considered: usize,
    pub rejections: BTreeMap<IneligibilityRule, usize>,
}

/// Stateless filter applying the eligibility policy to a vendor snapshot.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    policy: EligibilityPolicy,
}

impl EligibilityFilter {
    pub fn new(policy: EligibilityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    pub fn check(&self, order: &SigningOrder, vendor: &Vendor) -> Result<(), IneligibilityRule> {
        if !vendor.has_active_commission(&order.state) {
            return Err(IneligibilityRule::NoActiveCommission);
        }

        if order.signing_type.requires_remote() {
            if !self.policy.permits_ron(&order.state) {
                return Err(IneligibilityRule::RonNotPermitted);
            }
            if !vendor.ron_capable {
                return Err(IneligibilityRule::RonIncapable);
            }
        }

        if order
            .tags()
            .any(|tag| self.policy.requires_certification(tag) && !vendor.has_tag(tag))
        {
            return Err(IneligibilityRule::MissingCertification);
        }

        if !vendor.has_capacity() {
            return Err(IneligibilityRule::AtCapacity);
        }

        if vendor
            .committed_windows
            .iter()
            .any(|window| window.overlaps(&order.window))
        {
            return Err(IneligibilityRule::WindowConflict);
        }

        Ok(())
    }

    /// Reduce `vendors` to those able to serve `order`. Order of the input is preserved.
    pub fn filter<'a>(
        &self,
        order: &SigningOrder,
        vendors: &'a [Vendor],
    ) -> Result<Vec<&'a Vendor>, NoEligibleVendors> {
        let mut eligible = Vec::new();
        let mut rejections = BTreeMap::new();

        for vendor in vendors {
            match self.check(order, vendor) {
                Ok(()) => eligible.push(vendor),
                Err(rule) => *rejections.entry(rule).or_insert(0) += 1,
            }
        }

        if eligible.is_empty() {
            return Err(NoEligibleVendors {
                order_id: order.id.clone(),
                state: order.state.clone(),
                considered: vendors.len(),
                rejections,
            });
        }

        Ok(eligible)
    }
}
