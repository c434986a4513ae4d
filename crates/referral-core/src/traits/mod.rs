//! Core traits for the referral ledger
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`StoreBackend`]: Redemption ledger and eligibility lookups
//! - [`TriggerSource`]: Inbound triggers and outbound responses

pub mod store_backend;
pub mod trigger_source;

pub use store_backend::{
    CREDIT_PER_REDEMPTION, Redemption, ReferralCode, StoreBackend, USES_PER_REDEMPTION,
};
pub use trigger_source::{Response, Trigger, TriggerSource};
