//! Zone table configuration.
//!
//! Budgets and names for the zones registered at startup.

use minne_core::zone::{BudgetPolicy, ZoneBudget, ZoneId, DEFAULT_ZONE};
use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct ZoneConfig {
    #[validate(length(min = 1, max = 31))]
    pub name: String,

    pub id: ZoneId,

    /// Byte ceiling; zero means unlimited.
    #[serde(default)]
    pub budget_bytes: usize,

    #[serde(default)]
    pub policy: BudgetPolicy,
}

impl ZoneConfig {
    pub fn budget(&self) -> ZoneBudget {
        ZoneBudget {
            bytes: self.budget_bytes,
            policy: self.policy,
        }
    }
}

/// The table used when nothing is configured: just the default zone.
pub fn default_zones() -> Vec<ZoneConfig> {
    vec![ZoneConfig {
        name: "default".into(),
        id: DEFAULT_ZONE,
        budget_bytes: 0,
        policy: BudgetPolicy::Silent,
    }]
}
