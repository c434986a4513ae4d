//! Schema provisioning for the main store
//!
//! Migrations run strictly in list order. `codes` must exist before
//! `users`, because every redemption references the code it consumed.

use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One provisioning step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Ordered provisioning steps. Do not reorder.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "create_codes",
        sql: "CREATE TABLE IF NOT EXISTS codes (
                code  TEXT   PRIMARY KEY,
                uses  BIGINT NOT NULL DEFAULT 0,
                total BIGINT NOT NULL DEFAULT 0
            )",
    },
    Migration {
        name: "create_users",
        sql: "CREATE TABLE IF NOT EXISTS users (
                id   TEXT PRIMARY KEY,
                code TEXT NOT NULL REFERENCES codes (code)
            )",
    },
];

/// Tables created before the reference was declared get it added here.
/// Fails if existing redemptions point at codes that are not provisioned.
const ADD_USERS_CODE_REFERENCE: &str = "ALTER TABLE users
    ADD CONSTRAINT users_code_fkey FOREIGN KEY (code) REFERENCES codes (code)";

const COUNT_USERS_CODE_REFERENCES: &str = "SELECT COUNT(*)
    FROM information_schema.table_constraints
    WHERE table_schema = current_schema()
      AND table_name = 'users'
      AND constraint_type = 'FOREIGN KEY'";

/// Run every migration in order, then assert the `users` -> `codes`
/// reference exists.
pub async fn provision(pool: &PgPool) -> Result<()> {
    for migration in MIGRATIONS {
        sqlx::query(migration.sql)
            .execute(pool)
            .await
            .map_err(|e| {
                Error::database(format!("migration {} failed: {}", migration.name, e))
            })?;
        debug!("Applied migration {}", migration.name);
    }

    ensure_code_reference(pool).await?;

    info!("Schema provisioned ({} migrations)", MIGRATIONS.len());
    Ok(())
}

async fn ensure_code_reference(pool: &PgPool) -> Result<()> {
    let (references,): (i64,) = sqlx::query_as(COUNT_USERS_CODE_REFERENCES)
        .fetch_one(pool)
        .await?;

    if references == 0 {
        info!("Adding missing users.code reference to codes");
        sqlx::query(ADD_USERS_CODE_REFERENCE)
            .execute(pool)
            .await
            .map_err(|e| {
                Error::database(format!(
                    "redemptions reference unprovisioned codes, cannot add constraint: {}",
                    e
                ))
            })?;
    }

    Ok(())
}
