pub mod bulk_check;
pub mod checkout;
pub mod entitlement;
pub mod webhook;
