use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UnknownStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementStatus {
    Active,
    Inactive,
    Suspended,
}

impl EntitlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntitlementStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "suspended" => Ok(Self::Suspended),
            other => Err(UnknownStatus {
                kind: "entitlement",
                value: other.to_owned(),
            }),
        }
    }
}

/// Grant of one feature to one user. Never hard-deleted; revocation is a
/// status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: Uuid,
    pub user_id: String,
    pub family_id: Option<String>,
    pub feature_code: String,
    pub plan_id: String,
    pub subscription_id: Option<String>,
    pub status: EntitlementStatus,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_limits: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    /// Active and not past its expiry. A missing expiry never lapses.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EntitlementStatus::Active && self.expires_at.is_none_or(|exp| exp > now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Shared with the holder's family rather than granted to the user alone.
    pub fn is_family_shared(&self) -> bool {
        self.family_id.is_some()
    }
}
