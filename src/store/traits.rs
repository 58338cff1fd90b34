//! `CustomerDirectory` trait: the single lookup the enrichment stage needs.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// A customer row from the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub company_name: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: String,
    pub country: Option<String>,
    pub phone: Option<String>,
}

/// Backend-agnostic customer lookup.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Find the customer whose contact email matches exactly.
    ///
    /// `Ok(None)` means no match; `Err` means the lookup itself failed.
    async fn find_by_email(&self, email: &str) -> Result<Option<CustomerRecord>, DatabaseError>;
}
