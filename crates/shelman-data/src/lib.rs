#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Persistence layer for the Shelman fleet catalogue.
//!
//! Layout: `devices.rs` (device rows and partial updates), `templates.rs`
//! (configuration templates), `tags.rs` (device labels), `audit.rs`
//! (append-only audit trail), `error.rs` (`DataError`).
//!
//! Query functions take any `PgExecutor` so callers can run them against the
//! pool for one-shot operations or against an open transaction when several
//! rows must change together (template edit plus per-device recompute).

pub mod audit;
pub mod devices;
pub mod error;
pub mod tags;
pub mod templates;

pub use audit::{AuditRecord, NewAuditRecord};
pub use devices::{DeviceQuery, DeviceRow, DeviceSort, DevicePatch, NewDevice};
pub use error::{DataError, Result};
pub use tags::TagCount;
pub use templates::{NewTemplate, TemplateRow, TemplateScope, TemplateUpdate};

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

/// Handle to the PostgreSQL-backed store.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Establish a connection pool and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or a
    /// migration fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.connect",
                source,
            })?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn with_pool(pool: PgPool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction for multi-row operations.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection cannot be acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "store.begin",
                source,
            })
    }
}
