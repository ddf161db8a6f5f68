use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::super::domain::{OrderId, TimeWindow, Vendor, VendorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReserveRejection {
    AtCapacity,
    WindowConflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hold {
    order_id: OrderId,
    window: TimeWindow,
    committed: bool,
}

/// Live load of one vendor: outstanding offers plus confirmed assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorLoad {
    pub pending_offers: u32,
    pub assignments: u32,
    pub windows: Vec<(OrderId, TimeWindow)>,
}

impl VendorLoad {
    pub fn active(&self) -> u32 {
        self.pending_offers + self.assignments
    }
}

/// Capacity holds per vendor. Each vendor's holds sit behind their own lock so reservations for
/// different vendors never contend.
#[derive(Debug, Default)]
pub struct CapacityLedger {
    vendors: Mutex<HashMap<VendorId, Arc<Mutex<Vec<Hold>>>>>,
}

impl CapacityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn holds(&self, vendor_id: &VendorId) -> Arc<Mutex<Vec<Hold>>> {
        let mut vendors = self.vendors.lock().expect("ledger mutex poisoned");
        vendors.entry(vendor_id.clone()).or_default().clone()
    }

    /// Take a pending hold for `order_id`, checked against the vendor's capacity and every window
    /// already held or committed elsewhere.
    pub fn try_reserve(
        &self,
        vendor: &Vendor,
        order_id: &OrderId,
        window: TimeWindow,
    ) -> Result<(), ReserveRejection> {
        let holds = self.holds(&vendor.id);
        let mut holds = holds.lock().expect("vendor hold mutex poisoned");

        if holds.len() as u32 >= vendor.capacity_limit {
            return Err(ReserveRejection::AtCapacity);
        }

        let conflict = holds
            .iter()
            .filter(|hold| &hold.order_id != order_id)
            .map(|hold| &hold.window)
            .chain(vendor.committed_windows.iter())
            .any(|held| held.overlaps(&window));
        if conflict {
            return Err(ReserveRejection::WindowConflict);
        }

        holds.push(Hold {
            order_id: order_id.clone(),
            window,
            committed: false,
        });
        Ok(())
    }

    /// Drop a pending hold. Committed assignments are left alone.
    pub fn release(&self, vendor_id: &VendorId, order_id: &OrderId) -> bool {
        let holds = self.holds(vendor_id);
        let mut holds = holds.lock().expect("vendor hold mutex poisoned");
        match holds
            .iter()
            .position(|hold| &hold.order_id == order_id && !hold.committed)
        {
            Some(index) => {
                holds.remove(index);
                true
            }
            None => false,
        }
    }

    /// Turn the pending hold into an assignment held for the order window.
    pub fn commit(&self, vendor_id: &VendorId, order_id: &OrderId) -> bool {
        let holds = self.holds(vendor_id);
        let mut holds = holds.lock().expect("vendor hold mutex poisoned");
        match holds
            .iter_mut()
            .find(|hold| &hold.order_id == order_id && !hold.committed)
        {
            Some(hold) => {
                hold.committed = true;
                true
            }
            None => false,
        }
    }

    /// Release the assignment once the signing is done.
    pub fn complete(&self, vendor_id: &VendorId, order_id: &OrderId) -> bool {
        let holds = self.holds(vendor_id);
        let mut holds = holds.lock().expect("vendor hold mutex poisoned");
        match holds
            .iter()
            .position(|hold| &hold.order_id == order_id && hold.committed)
        {
            Some(index) => {
                holds.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn load(&self, vendor_id: &VendorId) -> VendorLoad {
        let holds = self.holds(vendor_id);
        let holds = holds.lock().expect("vendor hold mutex poisoned");
        let mut load = VendorLoad::default();
        for hold in holds.iter() {
            if hold.committed {
                load.assignments += 1;
            } else {
                load.pending_offers += 1;
            }
            load.windows.push((hold.order_id.clone(), hold.window));
        }
        load
    }
}
