//! Turn store implementation for Parlor.
//!
//! Implements the `parlor_core::TurnStore` trait on SQLite.

pub mod sqlite;

pub use sqlite::SqliteTurnStore;
