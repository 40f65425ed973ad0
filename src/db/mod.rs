//! Database module for PostgreSQL
//!
//! Catalog introspection, distinct-value lookups and read-only execution of
//! generated queries.

pub mod catalog;
pub mod connection;
pub mod executor;
pub mod result;

pub use catalog::PgCatalog;
pub use connection::init_pool;
pub use executor::{PgExecutor, QueryExecutor};
pub use result::{CellValue, ResultSet};

/// Quote an identifier for interpolation into SQL text.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
