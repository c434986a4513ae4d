// # Persistent Store
//
// PostgreSQL implementation of StoreBackend.
//
// ## Purpose
//
// Durable, transactional ledger of redemptions. Two pools are held:
// - The main store (`codes`, `users`), owned and provisioned by this crate
// - The identity directory (`users`, `facts`), read-only, owned elsewhere
//
// ## Atomicity
//
// `redeem_code` inserts the redemption and credits the code in one
// transaction. The credit is an in-place `uses = uses + 1`, never a
// read-then-write, so concurrent redemptions of one code lose no updates.
// Concurrent redemptions by one identity are serialized by the `users`
// primary key; the loser gets `Error::Duplicate`.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use tracing::{debug, info, warn};

use crate::Error;
use crate::config::{DatabaseParams, PoolConfig, StoreConfig};
use crate::identity::{Identity, directory_key};
use crate::store::schema;
use crate::traits::store_backend::{
    CREDIT_PER_REDEMPTION, Redemption, ReferralCode, StoreBackend, USES_PER_REDEMPTION,
};

/// Directory fact type for a verified phone number
const PHONE_FACT_TYPE: i16 = 2;

const SELECT_REDEMPTION: &str = "SELECT code FROM users WHERE id = $1";

const INSERT_REDEMPTION: &str = "INSERT INTO users (id, code) VALUES ($1, $2)";

const CREDIT_CODE: &str = "UPDATE codes SET uses = uses + $1, total = total + $2 WHERE code = $3";

const SELECT_CODE: &str = "SELECT code, uses, total FROM codes WHERE code = $1";

const SELECT_REDEMPTIONS_FOR_CODE: &str = "SELECT id, code FROM users WHERE code = $1 ORDER BY id";

// The directory stores ids as bytea; the transcoded key is its hex literal.
const COUNT_PHONE_FACTS: &str = "SELECT COUNT(*) FROM users \
    INNER JOIN facts ON users.id = facts.user_id \
    WHERE users.id = CAST($1 AS BYTEA) AND facts.type = $2";

/// PostgreSQL-backed store
///
/// # Example
///
/// ```rust,no_run
/// use referral_core::config::{DatabaseParams, StoreConfig};
/// use referral_core::store::PersistentStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = StoreConfig::new(
///         DatabaseParams::new("db.internal", "5432").with_db_name("referrals"),
///         DatabaseParams::new("udb.internal", "5432").with_db_name("directory"),
///     );
///     let store = PersistentStore::connect(&config).await?;
///     println!("{:?}", store.referral_code("PROMO1").await?);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PersistentStore {
    pool: PgPool,
    directory: PgPool,
}

impl PersistentStore {
    /// Connect both pools and provision the main store schema
    ///
    /// # Errors
    ///
    /// - [`Error::Config`]: the configuration does not validate
    /// - [`Error::Connectivity`]: either store cannot be reached
    /// - [`Error::Database`]: the main store is reachable but its schema
    ///   cannot be provisioned
    pub async fn connect(config: &StoreConfig) -> Result<Self, Error> {
        config.validate()?;

        let pool = open_pool(&config.main, &config.pool)
            .await
            .map_err(|e| Error::connectivity(format!("main store: {}", e)))?;
        let directory = open_pool(&config.directory, &config.pool)
            .await
            .map_err(|e| Error::connectivity(format!("identity directory: {}", e)))?;

        schema::provision(&pool)
            .await
            .map_err(|e| Error::database(format!("main store schema: {}", e)))?;

        info!(
            "Persistent store connected (max {} connections per pool)",
            config.pool.max_connections
        );

        Ok(Self::from_pools(pool, directory))
    }

    /// Wrap already-open pools
    ///
    /// The main store schema is assumed to be provisioned
    /// (see [`schema::provision`]).
    pub fn from_pools(pool: PgPool, directory: PgPool) -> Self {
        Self { pool, directory }
    }

    /// Main store pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Current counters of a referral code
    pub async fn referral_code(&self, code: &str) -> Result<ReferralCode, Error> {
        let row: Option<(String, i64, i64)> = sqlx::query_as(SELECT_CODE)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(code, uses, total)| ReferralCode { code, uses, total })
            .ok_or_else(|| Error::not_found(format!("referral code {}", code)))
    }

    /// All redemptions of a referral code
    pub async fn redemptions(&self, code: &str) -> Result<Vec<Redemption>, Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(SELECT_REDEMPTIONS_FOR_CODE)
            .bind(code)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(id, code)| -> Result<Redemption, Error> {
                Ok(Redemption {
                    identity: id.parse()?,
                    code,
                })
            })
            .collect()
    }
}

/// Build connection options from parameters
///
/// The password is only sent when non-empty. TLS is disabled.
pub fn connect_options(params: &DatabaseParams) -> Result<PgConnectOptions, Error> {
    let port: u16 = params
        .port
        .parse()
        .map_err(|_| Error::config(format!("invalid port '{}'", params.port)))?;

    let mut options = PgConnectOptions::new()
        .host(&params.address)
        .port(port)
        .username(&params.username)
        .database(&params.db_name)
        .ssl_mode(PgSslMode::Disable);

    if !params.password.is_empty() {
        options = options.password(&params.password);
    }

    Ok(options)
}

/// Open a pool with the configured bounds
pub async fn open_pool(params: &DatabaseParams, bounds: &PoolConfig) -> Result<PgPool, Error> {
    let options = connect_options(params)?;

    debug!(
        "Connecting to {}:{} (database '{}')",
        params.address, params.port, params.db_name
    );

    let pool = PgPoolOptions::new()
        .max_connections(bounds.max_connections)
        .min_connections(bounds.min_connections)
        .idle_timeout(Some(bounds.idle_timeout()))
        .max_lifetime(Some(bounds.max_lifetime()))
        .acquire_timeout(bounds.acquire_timeout())
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[async_trait]
impl StoreBackend for PersistentStore {
    async fn lookup_redemption(&self, identity: &Identity) -> Result<String, Error> {
        let row: Option<(String,)> = sqlx::query_as(SELECT_REDEMPTION)
            .bind(identity.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(code,)| code)
            .ok_or_else(|| Error::not_found(format!("no redemption recorded for {}", identity)))
    }

    async fn redeem_code(&self, identity: &Identity, code: &str) -> Result<(), Error> {
        let id = identity.to_string();
        let mut tx = self.pool.begin().await?;

        // Dropping `tx` on any early return rolls the transaction back.
        sqlx::query(INSERT_REDEMPTION)
            .bind(&id)
            .bind(code)
            .execute(&mut *tx)
            .await
            .map_err(|e| match Error::from(e) {
                Error::Duplicate(_) => {
                    Error::duplicate(format!("{} has already redeemed a code", identity))
                }
                Error::NotFound(_) => Error::not_found(format!("referral code {}", code)),
                other => Error::transaction(format!("failed to add user: {}", other)),
            })?;

        let credited = sqlx::query(CREDIT_CODE)
            .bind(USES_PER_REDEMPTION)
            .bind(CREDIT_PER_REDEMPTION)
            .bind(code)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::transaction(format!("failed to use code: {}", e)))?;

        if credited.rows_affected() == 0 {
            warn!("Redemption of unknown code {} by {} rolled back", code, identity);
            tx.rollback()
                .await
                .map_err(|e| Error::transaction(format!("rollback failed: {}", e)))?;
            return Err(Error::not_found(format!("referral code {}", code)));
        }

        tx.commit()
            .await
            .map_err(|e| Error::transaction(format!("commit failed: {}", e)))?;

        debug!("Recorded redemption {} -> {}", identity, code);
        Ok(())
    }

    async fn check_eligibility(&self, identity: &Identity) -> Result<bool, Error> {
        let (count,): (i64,) = sqlx::query_as(COUNT_PHONE_FACTS)
            .bind(directory_key(identity))
            .bind(PHONE_FACT_TYPE)
            .fetch_one(&self.directory)
            .await
            .map_err(|e| Error::directory(format!("failed to get registration status: {}", e)))?;

        Ok(count > 0)
    }

    /// Close both pools, waiting for checked-out connections
    async fn close(&self) {
        self.pool.close().await;
        self.directory.close().await;
        debug!("Persistent store pools closed");
    }

    fn backend_name(&self) -> &'static str {
        "persistent"
    }
}
