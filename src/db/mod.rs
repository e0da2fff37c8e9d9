// Durable storage (sqlite)
pub mod sqlite;

pub use sqlite::{LedgerSummary, SqliteStore};
