// # Volatile Store
//
// Permissive in-memory implementation of StoreBackend.
//
// ## Purpose
//
// Keeps the bot live when no persistent store is configured or the
// persistent store is unreachable at startup. It never rejects a user for
// infrastructure reasons.
//
// ## Behavior
//
// - `lookup_redemption`: always "not found", nobody has redeemed before
// - `redeem_code`: always succeeds, nothing is recorded or credited
// - `check_eligibility`: always eligible
//
// ## Crash Behavior
//
// - Nothing to lose: no state is held
// - No enforcement or durability while active

use async_trait::async_trait;

use crate::Error;
use crate::identity::Identity;
use crate::traits::store_backend::StoreBackend;

/// Fallback store with no enforcement
///
/// # Example
///
/// ```rust,no_run
/// use referral_core::store::VolatileStore;
/// use referral_core::traits::StoreBackend;
/// use referral_core::identity::{Identity, IdentityKind};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = VolatileStore::new();
///     let identity = Identity::new([1u8; 32], IdentityKind::User);
///
///     store.redeem_code(&identity, "PROMO1").await?;
///     assert!(store.lookup_redemption(&identity).await.is_err());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatileStore;

impl VolatileStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StoreBackend for VolatileStore {
    async fn lookup_redemption(&self, identity: &Identity) -> Result<String, Error> {
        Err(Error::not_found(format!(
            "no redemption recorded for {} (volatile store)",
            identity
        )))
    }

    async fn redeem_code(&self, _identity: &Identity, _code: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn check_eligibility(&self, _identity: &Identity) -> Result<bool, Error> {
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "volatile"
    }
}
