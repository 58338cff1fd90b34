//! libSQL backend: async `CustomerDirectory` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{CustomerDirectory, CustomerRecord};

const CUSTOMER_COLUMNS: &str = "customer_id, company_name, contact_name, contact_email, country, phone";

/// libSQL customer directory.
///
/// Holds one connection reused for all lookups; `libsql::Connection` is
/// `Send + Sync` and safe for concurrent async use.
pub struct LibSqlDirectory {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlDirectory {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let directory = Self::from_database(db).await?;
        info!(path = %path.display(), "Customer directory opened");
        Ok(directory)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Insert or replace a customer row.
    pub async fn upsert_customer(&self, customer: &CustomerRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO customers ({CUSTOMER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    customer.customer_id.as_str(),
                    opt_text(customer.company_name.as_deref()),
                    opt_text(customer.contact_name.as_deref()),
                    customer.contact_email.as_str(),
                    opt_text(customer.country.as_deref()),
                    opt_text(customer.phone.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_customer: {e}")))?;

        debug!(customer_id = %customer.customer_id, "Customer upserted");
        Ok(())
    }
}

/// Convert `Option<&str>` to a libsql value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql row to a `CustomerRecord`. Column order matches `CUSTOMER_COLUMNS`.
fn row_to_customer(row: &libsql::Row) -> Result<CustomerRecord, libsql::Error> {
    Ok(CustomerRecord {
        customer_id: row.get(0)?,
        company_name: row.get::<String>(1).ok(),
        contact_name: row.get::<String>(2).ok(),
        contact_email: row.get(3)?,
        country: row.get::<String>(4).ok(),
        phone: row.get::<String>(5).ok(),
    })
}

#[async_trait]
impl CustomerDirectory for LibSqlDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<CustomerRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE contact_email = ?1"),
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let customer = row_to_customer(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(customer))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_by_email: {e}"))),
        }
    }
}
