// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod indicators;
pub mod logsink;
pub mod models;
pub mod pnl;
pub mod wallet;

// Re-export commonly used types
pub use api::UpbitClient;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
