pub mod entitlements;
pub mod outbox_events;
pub mod payments;
pub mod plans;
pub mod webhook_events;
