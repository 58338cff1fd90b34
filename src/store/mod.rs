//! Persistence layer: the customer directory used by the enrichment stage.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlDirectory;
pub use traits::{CustomerDirectory, CustomerRecord};
