use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::domain::ServiceTier;
use super::policy::PolicyError;

/// Confirmation deadline and where a breach escalates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaTerms {
    pub confirmation_deadline_secs: u64,
    pub escalation_target: Option<ServiceTier>,
}

impl SlaTerms {
    pub fn confirmation_deadline(&self) -> Duration {
        Duration::from_secs(self.confirmation_deadline_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaConfig {
    pub standard: SlaTerms,
    pub priority: SlaTerms,
    pub rescue: SlaTerms,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            standard: SlaTerms {
                confirmation_deadline_secs: 60 * 60,
                escalation_target: Some(ServiceTier::Priority),
            },
            priority: SlaTerms {
                confirmation_deadline_secs: 15 * 60,
                escalation_target: Some(ServiceTier::Rescue),
            },
            rescue: SlaTerms {
                confirmation_deadline_secs: 3 * 60,
                escalation_target: None,
            },
        }
    }
}

impl SlaConfig {
    pub fn terms(&self, tier: ServiceTier) -> &SlaTerms {
        match tier {
            ServiceTier::Standard => &self.standard,
            ServiceTier::Priority => &self.priority,
            ServiceTier::Rescue => &self.rescue,
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for tier in ServiceTier::ALL {
            if self.terms(tier).confirmation_deadline_secs == 0 {
                return Err(PolicyError::ZeroDeadline { tier: tier.label() });
            }

            let mut visited = vec![tier];
            let mut current = tier;
            while let Some(next) = self.terms(current).escalation_target {
                if visited.contains(&next) {
                    return Err(PolicyError::EscalationCycle {
                        from: tier.label(),
                        to: next.label(),
                    });
                }
                visited.push(next);
                current = next;
            }
        }
        Ok(())
    }
}

/// Pure lookup from service tier to deadline and escalation path.
#[derive(Debug, Clone)]
pub struct SlaPolicy {
    config: SlaConfig,
}

impl SlaPolicy {
    pub fn new(config: SlaConfig) -> Self {
        Self { config }
    }

    pub fn terms(&self, tier: ServiceTier) -> &SlaTerms {
        self.config.terms(tier)
    }

    pub fn escalation_target(&self, tier: ServiceTier) -> Option<ServiceTier> {
        self.config.terms(tier).escalation_target
    }

    /// Tiers an unconfirmed order walks through after `tier`, in order.
    pub fn escalation_path(&self, tier: ServiceTier) -> Vec<ServiceTier> {
        let mut path = Vec::new();
        let mut current = tier;
        while let Some(next) = self.escalation_target(current) {
            if path.contains(&next) || next == tier {
                break;
            }
            path.push(next);
            current = next;
        }
        path
    }
}
