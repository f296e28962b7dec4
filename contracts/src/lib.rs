// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Escrow Contracts
//!
//! The custody ledger: a registry of two-party escrows where a buyer places
//! value in custody for a seller and later either releases it to the seller
//! or takes it back. Never both, never twice, and only the buyer decides.
//!
//! - **ledger**: [`EscrowLedger`], the record store and its transitions.
//! - **settlement**: the host side that persists each mutation and moves
//!   the value, atomically. In-memory and sled-backed implementations.
//! - **events**: notifications emitted for every committed mutation.
//! - **error**: the rejection taxonomy callers branch on.
//!
//! ## Design Principles
//!
//! 1. Preconditions are checked before anything is touched. A rejected call
//!    leaves records, totals and balances exactly as they were.
//! 2. The settlement backend commits first; in-memory state follows. If the
//!    backend refuses, nothing changed.
//! 3. All arithmetic on value is checked.

pub mod error;
pub mod events;
pub mod ledger;
pub mod settlement;

pub use error::{Denial, ErrorKind, EscrowError};
pub use events::EscrowEvent;
pub use ledger::{CustodySummary, EscrowLedger};
pub use settlement::{
    BackendTotals, MemorySettlement, Mutation, SettlementBackend, SettlementError,
    SledSettlement,
};
