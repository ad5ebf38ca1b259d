//! Persistence layer for the hazard server.
//!
//! SQLite-backed storage for positions and incident reports.

pub mod db;
pub mod positions;
pub mod reports;
pub mod store;

pub use db::{init_database, Database};
pub use store::SqliteStore;
