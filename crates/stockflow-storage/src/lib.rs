// Postgres storage layer with sqlx

pub mod gateway;
pub mod models;
pub mod po_writer;
pub mod repositories;

pub use gateway::{is_transient, with_retries, Gateway, RetryOptions};
pub use models::*;
pub use po_writer::{PersistOutcome, PersistRequest, PurchaseOrderWriter};
pub use repositories::Database;
