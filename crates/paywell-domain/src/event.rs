//! Outbox and publish-side event types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::UnknownStatus;

/// Schema version stamped on every published envelope.
pub const EVENT_VERSION: u32 = 1;

pub const ENTITLEMENT_GRANTED: &str = "entitlement.granted";
pub const ENTITLEMENT_UPDATED: &str = "entitlement.updated";
pub const ENTITLEMENT_REVOKED: &str = "entitlement.revoked";
pub const PAYMENT_COMPLETED: &str = "payment.completed";
pub const PAYMENT_FAILED: &str = "payment.failed";

/// Lifecycle of an outbox row: `pending` -> `published` | `failed`.
/// A `failed` row may be re-queued to `pending` while under the retry cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus {
                kind: "outbox",
                value: other.to_owned(),
            }),
        }
    }
}

/// Envelope handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub aggregate: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Unix seconds of the originating state change.
    pub timestamp: i64,
    pub version: u32,
}

/// Aggregate name for an event type: the segment before the first dot
/// (`entitlement.granted` -> `entitlement`).
pub fn aggregate_of(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}
