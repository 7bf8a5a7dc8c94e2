pub mod breakers;
pub mod checkout;
pub mod entitlement;
pub mod webhook;
