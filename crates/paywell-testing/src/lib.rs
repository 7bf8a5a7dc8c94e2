//! Test utilities for Paywell services.
//!
//! Identity headers and signed webhook builders. Use from tests only.

pub mod auth;
pub mod webhook;
