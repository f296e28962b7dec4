// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Escrow Protocol: Shared Primitives
//!
//! Everything the escrow ledger and its hosts agree on lives here: who the
//! parties are, how value is denominated, what an escrow record looks like,
//! and how records and balances are persisted.
//!
//! ## Modules
//!
//! - **identity**: 20-byte party addresses and the null identity.
//! - **units**: wei/ether denomination with exact decimal parsing.
//! - **record**: the escrow record and its three-state lifecycle.
//! - **storage**: in-memory account book and the sled-backed ledger database.
//! - **config**: protocol constants and service defaults.
//!
//! ## Design Philosophy
//!
//! 1. Value is an integer. Floats never touch an amount.
//! 2. States are enum variants with fixed discriminants, not flags.
//! 3. Every write that moves value is a single atomic storage transaction.

pub mod config;
pub mod identity;
pub mod record;
pub mod storage;
pub mod units;

pub use identity::Address;
pub use record::{EscrowId, EscrowRecord, EscrowState};
pub use units::Wei;
