//! # Storage Module
//!
//! Where escrow records and payout balances live.
//!
//! ```text
//! book.rs   in-memory account balances, for hosts that need no durability
//! db.rs     sled persistence of records, balances and totals, written atomically
//! ```
//!
//! Records go to disk with bincode; JSON is for APIs and debugging.

pub mod book;
pub mod db;

pub use book::{AccountBook, BookError};
pub use db::{DbError, DbResult, LedgerDb, StoredTotals};
