//! Contract Test: Persistent Store Atomicity & Concurrency
//!
//! These tests run against a live PostgreSQL server named by
//! `REFERRAL_TEST_DATABASE_URL` and are skipped when it is unset. Each
//! test works in its own pair of schemas (main store and directory), so
//! tests can run in parallel against one database.
//!
//! Constraints verified:
//! - A redemption and its credit commit together or not at all
//! - N concurrent redemptions of one code credit exactly N uses
//! - A second redemption by one identity fails with Duplicate
//! - Eligibility requires at least one phone fact in the directory
//! - Provisioning adds the `users` -> `codes` reference to older tables
//!
//! If this test fails, the ledger can lose or invent redemptions.

mod common;

use common::identity;
use referral_core::error::Error;
use referral_core::identity::{Identity, directory_key};
use referral_core::registration::Registrar;
use referral_core::store::{PersistentStore, schema};
use referral_core::traits::StoreBackend;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const DATABASE_URL_VAR: &str = "REFERRAL_TEST_DATABASE_URL";

static SCHEMA_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Fact type of a verified phone number in the directory
const PHONE: i16 = 2;
/// Fact type of a username in the directory
const USERNAME: i16 = 0;

struct Fixture {
    store: PersistentStore,
    directory: PgPool,
}

fn unique_schema(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{}_{}_{}_{}",
        prefix,
        std::process::id(),
        nanos,
        SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

/// Open a pool whose connections default to a fresh schema
async fn pool_in_fresh_schema(url: &str, prefix: &str) -> PgPool {
    let schema_name = unique_schema(prefix);

    let admin = PgPool::connect(url).await.expect("connect to test database");
    sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
        .execute(&admin)
        .await
        .expect("create schema");
    admin.close().await;

    let options = PgConnectOptions::from_str(url)
        .expect("valid test database url")
        .options([("search_path", schema_name.as_str())]);

    PgPoolOptions::new()
        .max_connections(20)
        .connect_with(options)
        .await
        .expect("connect to test schema")
}

fn database_url() -> Option<String> {
    let url = std::env::var(DATABASE_URL_VAR).ok();
    if url.is_none() {
        eprintln!("{} not set, skipping persistent store test", DATABASE_URL_VAR);
    }
    url
}

/// Tables as created before `users.code` referenced `codes`
async fn legacy_schema(url: &str) -> PgPool {
    let pool = pool_in_fresh_schema(url, "referral_legacy").await;
    sqlx::query("CREATE TABLE codes (code TEXT PRIMARY KEY, uses BIGINT NOT NULL DEFAULT 0, total BIGINT NOT NULL DEFAULT 0)")
        .execute(&pool)
        .await
        .expect("create legacy codes");
    sqlx::query("CREATE TABLE users (id TEXT PRIMARY KEY, code TEXT NOT NULL)")
        .execute(&pool)
        .await
        .expect("create legacy users");
    pool
}

async fn fixture() -> Option<Fixture> {
    let url = database_url()?;

    let main = pool_in_fresh_schema(&url, "referral_main").await;
    schema::provision(&main).await.expect("provision main schema");

    let directory = pool_in_fresh_schema(&url, "referral_directory").await;
    sqlx::query("CREATE TABLE users (id BYTEA PRIMARY KEY)")
        .execute(&directory)
        .await
        .expect("create directory users");
    sqlx::query("CREATE TABLE facts (user_id BYTEA NOT NULL REFERENCES users (id), type SMALLINT NOT NULL, fact TEXT NOT NULL)")
        .execute(&directory)
        .await
        .expect("create directory facts");

    Some(Fixture {
        store: PersistentStore::from_pools(main, directory.clone()),
        directory,
    })
}

impl Fixture {
    async fn provision_code(&self, code: &str, uses: i64, total: i64) {
        sqlx::query("INSERT INTO codes (code, uses, total) VALUES ($1, $2, $3)")
            .bind(code)
            .bind(uses)
            .bind(total)
            .execute(self.store.pool())
            .await
            .expect("provision code");
    }

    async fn add_directory_user(&self, identity: &Identity, fact_types: &[i16]) {
        let id = identity.as_bytes().to_vec();
        sqlx::query("INSERT INTO users (id) VALUES ($1)")
            .bind(&id)
            .execute(&self.directory)
            .await
            .expect("add directory user");

        for (i, fact_type) in fact_types.iter().enumerate() {
            sqlx::query("INSERT INTO facts (user_id, type, fact) VALUES ($1, $2, $3)")
                .bind(&id)
                .bind(*fact_type)
                .bind(format!("fact-{}", i))
                .execute(&self.directory)
                .await
                .expect("add directory fact");
        }
    }

    async fn redemption_rows(&self) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(self.store.pool())
            .await
            .expect("count redemptions");
        count
    }
}

#[tokio::test]
async fn redeem_inserts_and_credits() {
    let Some(fx) = fixture().await else { return };
    fx.provision_code("PROMO1", 0, 0).await;
    let user_a = identity(0xa);

    fx.store.redeem_code(&user_a, "PROMO1").await.unwrap();

    assert_eq!(fx.store.lookup_redemption(&user_a).await.unwrap(), "PROMO1");
    let code = fx.store.referral_code("PROMO1").await.unwrap();
    assert_eq!((code.uses, code.total), (1, 10));

    let redemptions = fx.store.redemptions("PROMO1").await.unwrap();
    assert_eq!(redemptions.len(), 1);
    assert_eq!(redemptions[0].identity, user_a);
}

#[tokio::test]
async fn lookup_unknown_identity_is_not_found() {
    let Some(fx) = fixture().await else { return };

    let err = fx.store.lookup_redemption(&identity(1)).await.unwrap_err();
    assert!(err.is_not_found(), "got {:?}", err);
}

#[tokio::test]
async fn second_redemption_is_duplicate() {
    let Some(fx) = fixture().await else { return };
    fx.provision_code("PROMO1", 0, 0).await;
    fx.provision_code("PROMO2", 0, 0).await;
    let user_a = identity(0xa);

    fx.store.redeem_code(&user_a, "PROMO1").await.unwrap();
    let err = fx.store.redeem_code(&user_a, "PROMO2").await.unwrap_err();

    assert!(err.is_duplicate(), "got {:?}", err);
    assert_eq!(fx.store.lookup_redemption(&user_a).await.unwrap(), "PROMO1");
    assert_eq!(fx.store.referral_code("PROMO2").await.unwrap().uses, 0);
}

#[tokio::test]
async fn failed_credit_rolls_back_redemption() {
    let Some(fx) = fixture().await else { return };
    // The credit overflows BIGINT, failing after the redemption insert.
    fx.provision_code("FULL", i64::MAX, 0).await;
    let user_a = identity(0xa);

    let err = fx.store.redeem_code(&user_a, "FULL").await.unwrap_err();

    assert!(matches!(err, Error::Transaction(_)), "got {:?}", err);
    assert_eq!(fx.redemption_rows().await, 0);
    assert!(fx.store.lookup_redemption(&user_a).await.unwrap_err().is_not_found());
    let code = fx.store.referral_code("FULL").await.unwrap();
    assert_eq!((code.uses, code.total), (i64::MAX, 0));
}

#[tokio::test]
async fn unknown_code_is_rejected_without_redemption() {
    let Some(fx) = fixture().await else { return };
    let user_a = identity(0xa);

    let err = fx.store.redeem_code(&user_a, "MISSING").await.unwrap_err();

    assert!(err.is_not_found(), "got {:?}", err);
    assert_eq!(fx.redemption_rows().await, 0);
}

#[tokio::test]
async fn concurrent_redemptions_lose_no_updates() {
    const USERS: u8 = 40;

    let Some(fx) = fixture().await else { return };
    fx.provision_code("PROMO1", 0, 0).await;
    let store = Arc::new(fx.store.clone());

    let handles: Vec<_> = (0..USERS)
        .map(|seed| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.redeem_code(&identity(seed), "PROMO1").await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let code = fx.store.referral_code("PROMO1").await.unwrap();
    assert_eq!(code.uses, USERS as i64);
    assert_eq!(code.total, USERS as i64 * 10);
}

#[tokio::test]
async fn concurrent_redemptions_by_one_identity_admit_one() {
    const ATTEMPTS: usize = 8;

    let Some(fx) = fixture().await else { return };
    fx.provision_code("PROMO1", 0, 0).await;
    let store = Arc::new(fx.store.clone());
    let user_a = identity(0xa);

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.redeem_code(&user_a, "PROMO1").await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(e) => assert!(e.is_duplicate(), "got {:?}", e),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(fx.store.referral_code("PROMO1").await.unwrap().uses, 1);
}

#[tokio::test]
async fn eligibility_requires_phone_fact() {
    let Some(fx) = fixture().await else { return };
    let with_phone = identity(1);
    let username_only = identity(2);
    let unknown = identity(3);

    fx.add_directory_user(&with_phone, &[USERNAME, PHONE]).await;
    fx.add_directory_user(&username_only, &[USERNAME]).await;

    assert!(fx.store.check_eligibility(&with_phone).await.unwrap());
    assert!(!fx.store.check_eligibility(&username_only).await.unwrap());
    assert!(!fx.store.check_eligibility(&unknown).await.unwrap());
}

#[tokio::test]
async fn directory_key_matches_stored_bytes() {
    let Some(fx) = fixture().await else { return };
    let user = identity(0x5c);
    fx.add_directory_user(&user, &[PHONE]).await;

    let (matches,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM users WHERE id = CAST($1 AS BYTEA)")
            .bind(directory_key(&user))
            .fetch_one(&fx.directory)
            .await
            .unwrap();
    assert_eq!(matches, 1);
}

#[tokio::test]
async fn registration_examples_end_to_end() {
    let Some(fx) = fixture().await else { return };
    fx.provision_code("PROMO1", 0, 0).await;
    fx.provision_code("PROMO2", 0, 0).await;
    let user_a = identity(0xa);
    let user_b = identity(0xb);
    fx.add_directory_user(&user_a, &[PHONE]).await;
    fx.add_directory_user(&user_b, &[USERNAME]).await;

    let registrar = Registrar::new(Arc::new(fx.store.clone()));

    let first = registrar.register(&user_a, "PROMO1").await;
    assert!(first.contains("PROMO1 has been registered"), "{}", first);

    let second = registrar.register(&user_a, "PROMO2").await;
    assert!(second.contains("already registered using code PROMO1"), "{}", second);

    let third = registrar.register(&user_b, "PROMO1").await;
    assert!(third.contains("phone number"), "{}", third);

    let code = fx.store.referral_code("PROMO1").await.unwrap();
    assert_eq!((code.uses, code.total), (1, 10));
    assert_eq!(fx.store.referral_code("PROMO2").await.unwrap().uses, 0);
    assert_eq!(fx.redemption_rows().await, 1);
}

#[tokio::test]
async fn provision_adds_missing_code_reference() {
    let Some(url) = database_url() else { return };
    let pool = legacy_schema(&url).await;
    sqlx::query("INSERT INTO codes (code) VALUES ('PROMO1')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO users (id, code) VALUES ('abc', 'PROMO1')")
        .execute(&pool)
        .await
        .unwrap();

    schema::provision(&pool).await.unwrap();
    schema::provision(&pool).await.unwrap();

    let err = sqlx::query("INSERT INTO users (id, code) VALUES ('def', 'GHOST')")
        .execute(&pool)
        .await
        .unwrap_err();
    let constraint = err
        .as_database_error()
        .and_then(|db| db.constraint())
        .map(str::to_string);
    assert_eq!(constraint.as_deref(), Some("users_code_fkey"));
    assert!(Error::from(err).is_not_found());

    let (kept,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(kept, 1);
}

#[tokio::test]
async fn provision_fails_on_orphan_redemptions() {
    let Some(url) = database_url() else { return };
    let pool = legacy_schema(&url).await;
    sqlx::query("INSERT INTO users (id, code) VALUES ('abc', 'GHOST')")
        .execute(&pool)
        .await
        .unwrap();

    let err = schema::provision(&pool).await.unwrap_err();

    assert!(matches!(err, Error::Database(_)), "got {:?}", err);
    assert!(err.to_string().contains("cannot add constraint"), "{}", err);
}

#[tokio::test]
async fn close_releases_both_pools() {
    let Some(fx) = fixture().await else { return };

    fx.store.close().await;

    assert!(fx.store.pool().is_closed());
    assert!(fx.directory.is_closed());
    let err = fx.store.lookup_redemption(&identity(1)).await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)), "got {:?}", err);
}
