// # Store Backend Trait
//
// Defines the interface between the registration orchestrator and storage.
//
// ## Purpose
//
// The store backend is the ledger of referral redemptions:
// - Which identity redeemed which code (at most one redemption per identity)
// - Usage counters on each referral code, credited atomically
// - Eligibility, read from the external identity directory
//
// ## Implementations
//
// - Persistent: PostgreSQL main store plus the identity directory
// - Volatile: permissive in-memory fallback with no enforcement
//
// ## Usage
//
// ```rust,ignore
// use referral_core::StoreBackend;
//
// let store = /* StoreBackend implementation */;
//
// match store.lookup_redemption(&identity).await {
//     Ok(code) => println!("already redeemed {}", code),
//     Err(e) if e.is_not_found() => {
//         if store.check_eligibility(&identity).await? {
//             store.redeem_code(&identity, "PROMO1").await?;
//         }
//     }
//     Err(e) => return Err(e),
// }
// ```

use async_trait::async_trait;

use crate::identity::Identity;

/// Increment applied to a code's `uses` per successful redemption
pub const USES_PER_REDEMPTION: i64 = 1;

/// Quota units credited to a code's `total` per successful redemption
pub const CREDIT_PER_REDEMPTION: i64 = 10;

/// A provisioned referral code and its counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralCode {
    pub code: String,
    /// Number of successful redemptions
    pub uses: i64,
    /// Cumulative credited quota units
    pub total: i64,
}

/// The permanent record that one identity consumed one referral code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub identity: Identity,
    pub code: String,
}

/// Trait for store backend implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks;
/// the listener runs one registration per inbound trigger.
///
/// ## Implementation Guidelines
///
/// - **No retries**: a failure is reported once, the orchestrator decides
/// - **No timeouts of its own**: bounding belongs to the connection pool
/// - **No business logic**: the decision policy is owned by `Registrar`
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Look up the code an identity redeemed
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The code stored for this identity
    /// - `Err(Error::NotFound)`: The identity has never redeemed a code
    /// - `Err(Error)`: Storage error
    async fn lookup_redemption(&self, identity: &Identity) -> Result<String, crate::Error>;

    /// Redeem `code` for `identity`
    ///
    /// Inserts the redemption and credits the code
    /// ([`USES_PER_REDEMPTION`], [`CREDIT_PER_REDEMPTION`]) as one
    /// transaction. Nothing is persisted unless both steps succeed.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Redeemed and credited
    /// - `Err(Error::Duplicate)`: The identity already has a redemption
    /// - `Err(Error::NotFound)`: The code is not provisioned
    /// - `Err(Error)`: Storage error, transaction rolled back
    async fn redeem_code(&self, identity: &Identity, code: &str) -> Result<(), crate::Error>;

    /// Check whether an identity has a verified phone fact in the directory
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Eligible to redeem
    /// - `Ok(false)`: No verified phone fact
    /// - `Err(Error)`: Directory error
    async fn check_eligibility(&self, identity: &Identity) -> Result<bool, crate::Error>;

    /// Release connections held by the backend
    ///
    /// Called once at shutdown, after the last registration. Operations
    /// issued afterwards fail.
    async fn close(&self) {}

    /// Short name for logs
    fn backend_name(&self) -> &'static str;
}
