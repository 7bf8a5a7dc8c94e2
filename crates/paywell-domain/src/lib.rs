//! Domain types shared across Paywell services.
//!
//! Pure types with no framework dependencies. Import in `usecase/` and
//! `domain/` layers; never reach for sea-orm or axum from here.

pub mod entitlement;
pub mod event;
pub mod payment;
pub mod plan;

/// A stored status string did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}
