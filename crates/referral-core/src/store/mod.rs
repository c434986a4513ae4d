// # Store Backends
//
// This module provides the StoreBackend implementations and the factory
// that picks one of them at startup.
//
// The selection is made once per process. There is no runtime failover in
// either direction: a volatile process stays volatile until restarted.

pub mod persistent;
pub mod schema;
pub mod volatile;

pub use persistent::PersistentStore;
pub use volatile::VolatileStore;

use std::sync::Arc;
use tracing::{info, warn};

use crate::Error;
use crate::config::StoreConfig;
use crate::traits::StoreBackend;

/// Choose the store backend for this process
///
/// Returns the persistent store when both the main store and the identity
/// directory are configured and reachable. Otherwise logs a warning and
/// returns the volatile store. Never fails.
pub async fn select_backend(config: &StoreConfig) -> Arc<dyn StoreBackend> {
    if !config.is_persistent_configured() {
        warn!("Database backend connection information not provided");
        return volatile_fallback();
    }

    match PersistentStore::connect(config).await {
        Ok(store) => {
            info!("Database backend initialized successfully");
            Arc::new(store)
        }
        Err(e) => {
            warn!("{}: {}", fallback_reason(&e), e);
            volatile_fallback()
        }
    }
}

/// Log prefix for a failed persistent store startup
fn fallback_reason(err: &Error) -> &'static str {
    match err {
        Error::Connectivity(_) => "Unable to reach database backend",
        Error::Config(_) => "Invalid database backend configuration",
        _ => "Database backend reachable but its schema could not be provisioned",
    }
}

fn volatile_fallback() -> Arc<dyn StoreBackend> {
    info!("Volatile backend initialized, redemptions will not be enforced or persisted");
    Arc::new(VolatileStore::new())
}
