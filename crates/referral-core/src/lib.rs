// # referral-core
//
// Core library for the referral code redemption ledger.
//
// ## Architecture Overview
//
// This library records which identity redeemed which referral code:
// - **StoreBackend**: Trait for the redemption ledger and eligibility lookups
// - **PersistentStore / VolatileStore**: Durable and permissive backends
// - **select_backend**: Startup factory choosing one of them, never failing
// - **Registrar**: Decision policy turning a request into response text
// - **TriggerSource / Listener**: Inbound triggers, one registration each
//
// ## Design Principles
//
// 1. **At most one redemption per identity**: enforced by the store, not in memory
// 2. **Atomic credit**: redemption insert and code credit commit together
// 3. **Stay live**: missing or unreachable storage degrades to the volatile store
// 4. **Errors become text**: nothing propagates past the Registrar
// 5. **Library-First**: the daemon is a thin wrapper around this crate

pub mod config;
pub mod error;
pub mod identity;
pub mod listener;
pub mod registration;
pub mod source;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use config::{DatabaseParams, ListenerConfig, PoolConfig, StoreConfig};
pub use error::{Error, Result};
pub use identity::{Identity, IdentityKind, directory_key};
pub use listener::{Listener, ListenerEvent};
pub use registration::{Registrar, RegistrationOutcome};
pub use source::JsonLinesTriggerSource;
pub use store::{PersistentStore, VolatileStore, select_backend};
pub use traits::{StoreBackend, TriggerSource};
