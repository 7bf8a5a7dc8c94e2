//! Shared plumbing for Paywell services.
//!
//! Error envelope, tracing bootstrap, health handlers, request-id layer and the
//! resilience primitives every outbound call goes through.

pub mod error;
pub mod health;
pub mod middleware;
pub mod resilience;
pub mod serde;
pub mod tracing;
