//! Registration orchestrator
//!
//! The [`Registrar`] is the single business-logic entry point: it turns a
//! `(identity, code)` request into response text by consulting the store
//! backend. It never returns an error; every outcome, including storage
//! failures, becomes a message for the requester.
//!
//! ## Decision Flow
//!
//! ```text
//! lookup_redemption ── Ok(c0) ──────────────▶ AlreadyRegistered(c0)
//!        │ NotFound         └── other error ─▶ LookupFailed
//!        ▼
//! check_eligibility ── Err ─────────────────▶ EligibilityCheckFailed
//!        │ true             └── false ──────▶ Ineligible
//!        ▼
//! redeem_code ──────── Ok ──────────────────▶ Redeemed
//!                      └── Err ─────────────▶ RedeemFailed
//! ```
//!
//! No step is retried. A `Duplicate` from a concurrent redemption by the
//! same identity is reported as `RedeemFailed`, not re-queried.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::identity::Identity;
use crate::traits::StoreBackend;

/// Result of one registration attempt
#[derive(Debug)]
pub enum RegistrationOutcome {
    /// The identity redeemed `code` earlier; nothing changed
    AlreadyRegistered { code: String },
    /// The redemption lookup failed
    LookupFailed { error: Error },
    /// The directory could not be queried
    EligibilityCheckFailed { code: String, error: Error },
    /// No verified phone fact in the directory
    Ineligible { code: String },
    /// Redemption recorded and the code credited
    Redeemed { code: String },
    /// The redemption transaction failed
    RedeemFailed { code: String, error: Error },
}

impl RegistrationOutcome {
    /// True only for [`RegistrationOutcome::Redeemed`]
    pub fn is_redeemed(&self) -> bool {
        matches!(self, Self::Redeemed { .. })
    }

    /// Human-readable response for the requester
    pub fn response_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RegistrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered { code } => {
                write!(f, "User has already registered using code {}", code)
            }
            Self::LookupFailed { error } => {
                write!(f, "Could not check user in database: {}", error)
            }
            Self::EligibilityCheckFailed { code, error } => write!(
                f,
                "Could not use code {} (failed to check identity directory registration status): {}",
                code, error
            ),
            Self::Ineligible { code } => write!(
                f,
                "Could not use code {} (must have registered a phone number with the identity directory)",
                code
            ),
            Self::Redeemed { code } => write!(
                f,
                "Thank you for using the messenger!  Your referral code {} has been registered.",
                code
            ),
            Self::RedeemFailed { code, error } => {
                write!(f, "Could not use code {}: {}", code, error)
            }
        }
    }
}

/// Registration orchestrator
///
/// Stateless apart from the injected backend; cheap to share behind an
/// `Arc` across tasks.
#[derive(Clone)]
pub struct Registrar {
    backend: Arc<dyn StoreBackend>,
}

impl Registrar {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Name of the backend in use
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Register `identity` with `code` and return the response text
    pub async fn register(&self, identity: &Identity, code: &str) -> String {
        self.evaluate(identity, code).await.response_text()
    }

    /// Register `identity` with `code` and return the structured outcome
    pub async fn evaluate(&self, identity: &Identity, code: &str) -> RegistrationOutcome {
        match self.backend.lookup_redemption(identity).await {
            Ok(used) => {
                debug!("{} already redeemed {}", identity, used);
                return RegistrationOutcome::AlreadyRegistered { code: used };
            }
            Err(e) if e.is_not_found() => {}
            Err(error) => {
                warn!("Redemption lookup failed for {}: {}", identity, error);
                return RegistrationOutcome::LookupFailed { error };
            }
        }

        let code = code.to_string();

        match self.backend.check_eligibility(identity).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("{} is not eligible to redeem {}", identity, code);
                return RegistrationOutcome::Ineligible { code };
            }
            Err(error) => {
                warn!("Eligibility check failed for {}: {}", identity, error);
                return RegistrationOutcome::EligibilityCheckFailed { code, error };
            }
        }

        match self.backend.redeem_code(identity, &code).await {
            Ok(()) => {
                info!("{} redeemed referral code {}", identity, code);
                RegistrationOutcome::Redeemed { code }
            }
            Err(error) => {
                warn!("Redemption of {} by {} failed: {}", code, identity, error);
                RegistrationOutcome::RedeemFailed { code, error }
            }
        }
    }
}
