//! Caller identity shared across Paywell services.
//!
//! The gateway authenticates callers and forwards who they are in headers;
//! services only ever see the resulting [`identity::Principal`].

pub mod identity;
