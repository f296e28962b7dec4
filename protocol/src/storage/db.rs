//! # LedgerDb: Persistent Escrow Storage
//!
//! The persistence layer for the escrow ledger, built on sled's embedded
//! key-value store.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                    | Value                     |
//! |------------|------------------------|---------------------------|
//! | `escrows`  | `id` (8B BE)           | `bincode(EscrowRecord)`   |
//! | `accounts` | `address` (20B)        | `wei` (16B BE)            |
//! | `metadata` | key (UTF-8)            | value (bytes)             |
//!
//! Escrow ids are stored big-endian so that sled's lexicographic ordering
//! matches numeric ordering and a full scan yields records in id order.
//!
//! ## Atomicity
//!
//! An intake writes the new record, bumps the escrow count and adds to the
//! received total in one multi-tree transaction. A payout writes the settled
//! record, credits the payee and adds to the paid-out total in one
//! transaction. Both re-check the stored state inside the transaction, so a
//! stale or duplicated commit aborts instead of paying twice. Every commit
//! is flushed before returning.

use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use crate::config::LEDGER_SCHEMA_VERSION;
use crate::identity::Address;
use crate::record::{EscrowId, EscrowRecord, EscrowState};
use crate::units::Wei;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored state does not admit the requested write.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("stored total overflows u128 wei")]
    Overflow,

    #[error("schema version mismatch: database has {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

const META_SCHEMA_VERSION: &[u8] = b"schema_version";
const META_ESCROW_COUNT: &[u8] = b"escrow_count";
const META_TOTAL_RECEIVED: &[u8] = b"total_received";
const META_TOTAL_PAID_OUT: &[u8] = b"total_paid_out";

/// Lifetime value totals as stored in the `metadata` tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoredTotals {
    /// Sum of all intakes ever committed.
    pub received: Wei,
    /// Sum of all payouts ever committed.
    pub paid_out: Wei,
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for escrow records and payout balances.
///
/// # Thread Safety
///
/// sled trees support concurrent reads and serialized transactional writes,
/// so `LedgerDb` can be shared via `Arc<LedgerDb>` without extra locking.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    escrows: Tree,
    accounts: Tree,
    metadata: Tree,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let escrows = db.open_tree("escrows")?;
        let accounts = db.open_tree("accounts")?;
        let metadata = db.open_tree("metadata")?;

        let store = Self {
            db,
            escrows,
            accounts,
            metadata,
        };
        store.check_schema()?;
        Ok(store)
    }

    fn check_schema(&self) -> DbResult<()> {
        match self.metadata.get(META_SCHEMA_VERSION)? {
            Some(bytes) => {
                let found = u32::from_be_bytes(decode_fixed(&bytes)?);
                if found != LEDGER_SCHEMA_VERSION {
                    return Err(DbError::SchemaMismatch {
                        found,
                        expected: LEDGER_SCHEMA_VERSION,
                    });
                }
            }
            None => {
                self.metadata
                    .insert(META_SCHEMA_VERSION, &LEDGER_SCHEMA_VERSION.to_be_bytes()[..])?;
                tracing::debug!(version = LEDGER_SCHEMA_VERSION, "ledger schema initialized");
            }
        }
        Ok(())
    }

    // -- Writes -------------------------------------------------------------

    /// Persist a freshly created record together with its custody intake.
    ///
    /// The record's id must equal the stored escrow count.
    pub fn put_intake(&self, record: &EscrowRecord) -> DbResult<()> {
        if record.state != EscrowState::AwaitingDelivery {
            return Err(DbError::Conflict(format!(
                "intake for escrow {} must be AwaitingDelivery, got {}",
                record.id, record.state
            )));
        }
        let record_bytes = encode_record(record)?;

        let outcome = (&self.escrows, &self.metadata).transaction(|(escrows, metadata)| {
            let count = read_u64(metadata, META_ESCROW_COUNT)?;
            if record.id != count {
                return abort(DbError::Conflict(format!(
                    "intake id {} does not match escrow count {}",
                    record.id, count
                )));
            }

            let received = read_wei(metadata, META_TOTAL_RECEIVED)?;
            let Some(received) = received.checked_add(record.amount) else {
                return abort(DbError::Overflow);
            };

            escrows.insert(&record.id.to_be_bytes()[..], record_bytes.as_slice())?;
            metadata.insert(META_ESCROW_COUNT, &(count + 1).to_be_bytes()[..])?;
            metadata.insert(META_TOTAL_RECEIVED, &received.as_u128().to_be_bytes()[..])?;
            Ok(())
        });

        finish(outcome)?;
        self.db.flush()?;
        Ok(())
    }

    /// Persist a terminal transition together with the payee credit.
    ///
    /// The stored record must still be `AwaitingDelivery`; anything else
    /// aborts with [`DbError::Conflict`] and nothing is written.
    pub fn put_payout(&self, record: &EscrowRecord, payee: &Address, amount: Wei) -> DbResult<()> {
        if !record.state.is_terminal() {
            return Err(DbError::Conflict(format!(
                "payout for escrow {} requires a terminal state, got {}",
                record.id, record.state
            )));
        }
        let record_bytes = encode_record(record)?;
        let key = record.id.to_be_bytes();

        let outcome = (&self.escrows, &self.accounts, &self.metadata).transaction(
            |(escrows, accounts, metadata)| {
                let stored = match escrows.get(&key[..])? {
                    Some(bytes) => match bincode::deserialize::<EscrowRecord>(&bytes) {
                        Ok(r) => r,
                        Err(e) => return abort(DbError::Serialization(e.to_string())),
                    },
                    None => {
                        return abort(DbError::Conflict(format!(
                            "escrow {} does not exist",
                            record.id
                        )))
                    }
                };
                if stored.state != EscrowState::AwaitingDelivery {
                    return abort(DbError::Conflict(format!(
                        "escrow {} already settled as {}",
                        record.id, stored.state
                    )));
                }

                let balance = match accounts.get(payee.as_bytes())? {
                    Some(bytes) => match decode_fixed::<16>(&bytes) {
                        Ok(raw) => Wei::new(u128::from_be_bytes(raw)),
                        Err(e) => return abort(e),
                    },
                    None => Wei::ZERO,
                };
                let Some(balance) = balance.checked_add(amount) else {
                    return abort(DbError::Overflow);
                };
                let paid_out = read_wei(metadata, META_TOTAL_PAID_OUT)?;
                let Some(paid_out) = paid_out.checked_add(amount) else {
                    return abort(DbError::Overflow);
                };

                escrows.insert(&key[..], record_bytes.as_slice())?;
                accounts.insert(&payee.as_bytes()[..], &balance.as_u128().to_be_bytes()[..])?;
                metadata.insert(META_TOTAL_PAID_OUT, &paid_out.as_u128().to_be_bytes()[..])?;
                Ok(())
            },
        );

        finish(outcome)?;
        self.db.flush()?;
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    /// Retrieve a record by id.
    pub fn get_escrow(&self, id: EscrowId) -> DbResult<Option<EscrowRecord>> {
        match self.escrows.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All records in ascending id order.
    pub fn load_escrows(&self) -> DbResult<Vec<EscrowRecord>> {
        let mut records = Vec::with_capacity(self.escrows.len());
        for entry in self.escrows.iter() {
            let (_key, value) = entry?;
            records.push(decode_record(&value)?);
        }
        Ok(records)
    }

    /// Number of records ever committed.
    pub fn escrow_count(&self) -> DbResult<u64> {
        match self.metadata.get(META_ESCROW_COUNT)? {
            Some(bytes) => Ok(u64::from_be_bytes(decode_fixed(&bytes)?)),
            None => Ok(0),
        }
    }

    /// Payout balance of `account`; zero if never credited.
    pub fn balance_of(&self, account: &Address) -> DbResult<Wei> {
        match self.accounts.get(account.as_bytes())? {
            Some(bytes) => Ok(Wei::new(u128::from_be_bytes(decode_fixed(&bytes)?))),
            None => Ok(Wei::ZERO),
        }
    }

    /// Lifetime intake and payout totals.
    pub fn totals(&self) -> DbResult<StoredTotals> {
        let read = |key: &[u8]| -> DbResult<Wei> {
            match self.metadata.get(key)? {
                Some(bytes) => Ok(Wei::new(u128::from_be_bytes(decode_fixed(&bytes)?))),
                None => Ok(Wei::ZERO),
            }
        };
        Ok(StoredTotals {
            received: read(META_TOTAL_RECEIVED)?,
            paid_out: read(META_TOTAL_PAID_OUT)?,
        })
    }

    /// Number of accounts holding a payout balance.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn encode_record(record: &EscrowRecord) -> DbResult<Vec<u8>> {
    bincode::serialize(record).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> DbResult<EscrowRecord> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode_fixed<const N: usize>(bytes: &[u8]) -> DbResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| DbError::Serialization(format!("expected {N} bytes, got {}", bytes.len())))
}

type TxResult<T> = Result<T, ConflictableTransactionError<DbError>>;

fn abort<T>(err: DbError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn read_u64(tree: &TransactionalTree, key: &[u8]) -> TxResult<u64> {
    match tree.get(key)? {
        Some(bytes) => decode_fixed::<8>(&bytes)
            .map(u64::from_be_bytes)
            .or_else(abort),
        None => Ok(0),
    }
}

fn read_wei(tree: &TransactionalTree, key: &[u8]) -> TxResult<Wei> {
    match tree.get(key)? {
        Some(bytes) => decode_fixed::<16>(&bytes)
            .map(|raw| Wei::new(u128::from_be_bytes(raw)))
            .or_else(abort),
        None => Ok(Wei::ZERO),
    }
}

fn finish(outcome: Result<(), TransactionError<DbError>>) -> DbResult<()> {
    outcome.map_err(|e| match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(inner) => DbError::Sled(inner),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
