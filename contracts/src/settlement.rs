//! # Settlement Backends
//!
//! The ledger decides *whether* a mutation may happen; a settlement backend
//! makes it happen. Each [`Mutation`] handed to [`SettlementBackend::commit`]
//! must be applied as one unit: the record write and the value movement
//! land together or not at all. The ledger only updates its own view after
//! `commit` returns `Ok`.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemorySettlement`]: balances in an [`AccountBook`], nothing durable.
//! - [`SledSettlement`]: records, balances and totals in a [`LedgerDb`],
//!   one sled transaction per commit.

use parking_lot::Mutex;
use std::fmt;
use thiserror::Error;

use escrow_protocol::storage::{AccountBook, BookError, DbError, LedgerDb};
use escrow_protocol::{Address, EscrowRecord, Wei};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a backend may return from any operation.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("account book error: {0}")]
    Book(#[from] BookError),

    /// The host refused the mutation for its own reasons.
    #[error("rejected by host: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

/// One ledger mutation, as handed to the backend.
#[derive(Debug, Clone, Copy)]
pub enum Mutation<'a> {
    /// A new record; its amount enters custody.
    Intake { record: &'a EscrowRecord },
    /// A record reached a terminal state; `amount` leaves custody for `payee`.
    /// `record` already carries the new state.
    Payout {
        record: &'a EscrowRecord,
        payee: Address,
        amount: Wei,
    },
}

/// Counts and totals a backend keeps for the mutations it has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendTotals {
    pub escrow_count: u64,
    pub received: Wei,
    pub paid_out: Wei,
}

impl fmt::Display for BackendTotals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} escrows, {} wei received, {} wei paid out",
            self.escrow_count, self.received, self.paid_out
        )
    }
}

// ---------------------------------------------------------------------------
// SettlementBackend
// ---------------------------------------------------------------------------

/// Host side of the ledger.
pub trait SettlementBackend: Send + Sync {
    /// Applies `mutation` atomically.
    fn commit(&self, mutation: &Mutation<'_>) -> Result<(), SettlementError>;

    /// Value paid out to `account` so far.
    fn balance_of(&self, account: &Address) -> Result<Wei, SettlementError>;

    /// Records committed before this process started, in id order.
    fn restore(&self) -> Result<Vec<EscrowRecord>, SettlementError>;

    /// The backend's own count and totals, checked against the restored
    /// records on open. `None` if it keeps no such bookkeeping.
    fn stored_totals(&self) -> Result<Option<BackendTotals>, SettlementError> {
        Ok(None)
    }
}

/// Lets a ledger hold a backend chosen at runtime, e.g.
/// `EscrowLedger<Box<dyn SettlementBackend>>`.
impl<T: SettlementBackend + ?Sized> SettlementBackend for Box<T> {
    fn commit(&self, mutation: &Mutation<'_>) -> Result<(), SettlementError> {
        (**self).commit(mutation)
    }

    fn balance_of(&self, account: &Address) -> Result<Wei, SettlementError> {
        (**self).balance_of(account)
    }

    fn restore(&self) -> Result<Vec<EscrowRecord>, SettlementError> {
        (**self).restore()
    }

    fn stored_totals(&self) -> Result<Option<BackendTotals>, SettlementError> {
        (**self).stored_totals()
    }
}

// ---------------------------------------------------------------------------
// MemorySettlement
// ---------------------------------------------------------------------------

/// Keeps payout balances in memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySettlement {
    book: Mutex<AccountBook>,
}

impl MemorySettlement {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettlementBackend for MemorySettlement {
    fn commit(&self, mutation: &Mutation<'_>) -> Result<(), SettlementError> {
        match mutation {
            Mutation::Intake { .. } => Ok(()),
            Mutation::Payout { payee, amount, .. } => {
                self.book.lock().credit(payee, *amount)?;
                Ok(())
            }
        }
    }

    fn balance_of(&self, account: &Address) -> Result<Wei, SettlementError> {
        Ok(self.book.lock().balance_of(account))
    }

    fn restore(&self) -> Result<Vec<EscrowRecord>, SettlementError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// SledSettlement
// ---------------------------------------------------------------------------

/// Durable backend over [`LedgerDb`].
#[derive(Debug, Clone)]
pub struct SledSettlement {
    db: LedgerDb,
}

impl SledSettlement {
    pub fn new(db: LedgerDb) -> Self {
        Self { db }
    }

    /// The underlying database.
    pub fn db(&self) -> &LedgerDb {
        &self.db
    }
}

impl SettlementBackend for SledSettlement {
    fn commit(&self, mutation: &Mutation<'_>) -> Result<(), SettlementError> {
        match mutation {
            Mutation::Intake { record } => self.db.put_intake(record)?,
            Mutation::Payout {
                record,
                payee,
                amount,
            } => self.db.put_payout(record, payee, *amount)?,
        }
        Ok(())
    }

    fn balance_of(&self, account: &Address) -> Result<Wei, SettlementError> {
        Ok(self.db.balance_of(account)?)
    }

    fn restore(&self) -> Result<Vec<EscrowRecord>, SettlementError> {
        Ok(self.db.load_escrows()?)
    }

    fn stored_totals(&self) -> Result<Option<BackendTotals>, SettlementError> {
        let totals = self.db.totals()?;
        Ok(Some(BackendTotals {
            escrow_count: self.db.escrow_count()?,
            received: totals.received,
            paid_out: totals.paid_out,
        }))
    }
}
