use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::UnknownStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    fn months(&self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Yearly => 12,
        }
    }

    /// End of one billing period starting at `start`. Month arithmetic clamps
    /// to the last day of shorter months (Jan 31 + 1 month = Feb 28/29).
    pub fn period_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_months(Months::new(self.months()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" | "annual" => Ok(Self::Yearly),
            other => Err(UnknownStatus {
                kind: "billing cycle",
                value: other.to_owned(),
            }),
        }
    }
}

/// Purchasable plan. Each feature code becomes one entitlement on purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub feature_codes: Vec<String>,
    pub billing_cycle: Option<BillingCycle>,
    pub price_cents: i64,
    pub currency: String,
    pub active: bool,
}

impl Plan {
    /// Expiry for entitlements granted at `granted_at`; `None` for plans
    /// without a billing cycle (lifetime grants).
    pub fn expiry_from(&self, granted_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.billing_cycle.map(|cycle| cycle.period_end(granted_at))
    }
}
