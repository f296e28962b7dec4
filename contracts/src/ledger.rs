//! # Escrow Ledger
//!
//! An append-only registry of escrow records. The lifecycle is:
//!
//! 1. **Create**: the buyer attaches value and names a seller. The record
//!    gets the next sequential id and the value enters custody.
//! 2. **Release**: the buyer pays the custody amount to the seller.
//! 3. **Refund**: or the buyer takes the custody amount back.
//!
//! Release and refund are mutually exclusive and final. The seller has no
//! path to force or block either outcome.
//!
//! ## Ordering
//!
//! Every mutation holds the ledger's write lock from its first precondition
//! check until the settlement backend has committed and the in-memory record
//! is replaced. Two racing calls on one record therefore cannot both see
//! `AwaitingDelivery`. Reads take the read lock and see either all of a
//! mutation or none of it.
//!
//! ## Solvency
//!
//! The ledger tracks what it has received and what it has paid out. At all
//! times `received - paid_out` equals the sum of amounts over records still
//! awaiting delivery; [`CustodySummary::is_solvent`] checks exactly that.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

use escrow_protocol::config::{EVENT_CHANNEL_CAPACITY, MAX_PAGE_SIZE};
use escrow_protocol::{Address, EscrowId, EscrowRecord, EscrowState, Wei};

use crate::error::{Denial, EscrowError};
use crate::events::EscrowEvent;
use crate::settlement::{BackendTotals, Mutation, SettlementBackend, SettlementError};

// ---------------------------------------------------------------------------
// CustodySummary
// ---------------------------------------------------------------------------

/// Aggregate view of the ledger at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodySummary {
    pub escrow_count: u64,
    pub awaiting_delivery: u64,
    pub complete: u64,
    pub refunded: u64,
    /// Sum of amounts over records still awaiting delivery.
    pub in_custody: Wei,
    /// Sum of every amount ever taken into custody.
    pub total_received: Wei,
    /// Sum of every amount ever paid out.
    pub total_paid_out: Wei,
}

impl CustodySummary {
    /// `true` when custody equals received minus paid out.
    pub fn is_solvent(&self) -> bool {
        self.total_received.checked_sub(self.total_paid_out) == Some(self.in_custody)
            && self.awaiting_delivery + self.complete + self.refunded == self.escrow_count
    }
}

// ---------------------------------------------------------------------------
// EscrowLedger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerState {
    records: Vec<EscrowRecord>,
    total_received: Wei,
    total_paid_out: Wei,
}

impl LedgerState {
    fn index_of(&self, id: EscrowId) -> Result<usize, EscrowError> {
        usize::try_from(id)
            .ok()
            .filter(|index| *index < self.records.len())
            .ok_or(EscrowError::NotFound(id))
    }
}

/// The custody ledger.
///
/// Generic over the [`SettlementBackend`] that persists mutations and moves
/// value. Share it across threads behind an `Arc`.
pub struct EscrowLedger<B: SettlementBackend> {
    backend: B,
    state: RwLock<LedgerState>,
    events: broadcast::Sender<EscrowEvent>,
}

impl<B: SettlementBackend> EscrowLedger<B> {
    /// An empty ledger. Whatever the backend already holds is ignored; use
    /// [`open`](Self::open) to pick it up.
    pub fn new(backend: B) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            state: RwLock::new(LedgerState::default()),
            events,
        }
    }

    /// A ledger restored from the records the backend has committed.
    ///
    /// The records are checked against the backend's own bookkeeping: its
    /// stored count and totals, when it keeps them, and the payout balance
    /// of every payee named by a settled record.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::Corrupted`] if the restored ids are not dense
    /// and zero-based, if a total overflows, or if the records disagree with
    /// the backend's bookkeeping. Backend read failures come back as
    /// [`EscrowError::Settlement`].
    pub fn open(backend: B) -> Result<Self, EscrowError> {
        let records = backend.restore()?;
        let mut total_received = Wei::ZERO;
        let mut total_paid_out = Wei::ZERO;
        let mut payouts: HashMap<Address, Wei> = HashMap::new();

        for (index, record) in records.iter().enumerate() {
            if record.id != index as u64 {
                return Err(EscrowError::Corrupted(format!(
                    "record at position {index} has id {}",
                    record.id
                )));
            }
            if record.amount.is_zero() || record.seller.is_zero() {
                return Err(EscrowError::Corrupted(format!(
                    "escrow {} has invalid terms",
                    record.id
                )));
            }
            total_received = total_received
                .checked_add(record.amount)
                .ok_or_else(|| EscrowError::Corrupted("received total overflows".into()))?;
            if let Some(payee) = record.payee_for(record.state) {
                total_paid_out = total_paid_out
                    .checked_add(record.amount)
                    .ok_or_else(|| EscrowError::Corrupted("paid-out total overflows".into()))?;
                let credited = payouts.entry(payee).or_default();
                *credited = credited.checked_add(record.amount).ok_or_else(|| {
                    EscrowError::Corrupted(format!("payouts to {payee} overflow"))
                })?;
            }
        }

        let recomputed = BackendTotals {
            escrow_count: records.len() as u64,
            received: total_received,
            paid_out: total_paid_out,
        };
        if let Some(stored) = backend.stored_totals()? {
            if stored != recomputed {
                return Err(EscrowError::Corrupted(format!(
                    "records give {recomputed} but the backend holds {stored}"
                )));
            }
        }
        for (payee, expected) in &payouts {
            let balance = backend.balance_of(payee)?;
            if balance != *expected {
                return Err(EscrowError::Corrupted(format!(
                    "{payee} holds {balance} wei, settled records pay it {expected}"
                )));
            }
        }

        tracing::info!(
            escrows = records.len(),
            received = %total_received,
            paid_out = %total_paid_out,
            payees = payouts.len(),
            "escrow ledger restored"
        );

        let ledger = Self::new(backend);
        *ledger.state.write() = LedgerState {
            records,
            total_received,
            total_paid_out,
        };
        Ok(ledger)
    }

    // -- Mutations ----------------------------------------------------------

    /// Takes `attached_value` into custody for a new escrow from `caller` to
    /// `seller`, returning the new escrow's id.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::InvalidAmount`] if `attached_value` is zero.
    /// - [`EscrowError::Unauthorized`] with [`Denial::NullSeller`] if
    ///   `seller` is the null identity.
    /// - [`EscrowError::AmountOverflow`] if custody totals would overflow.
    /// - [`EscrowError::Settlement`] if the backend refuses the intake.
    pub fn create_escrow(
        &self,
        caller: Address,
        seller: Address,
        attached_value: Wei,
    ) -> Result<EscrowId, EscrowError> {
        self.try_create(caller, seller, attached_value)
            .map_err(|e| rejected("create_escrow", None, &caller, e))
    }

    fn try_create(
        &self,
        caller: Address,
        seller: Address,
        attached_value: Wei,
    ) -> Result<EscrowId, EscrowError> {
        if attached_value.is_zero() {
            return Err(EscrowError::InvalidAmount);
        }
        if seller.is_zero() {
            return Err(EscrowError::Unauthorized {
                escrow_id: None,
                reason: Denial::NullSeller,
            });
        }

        let mut state = self.state.write();
        let total_received = state
            .total_received
            .checked_add(attached_value)
            .ok_or(EscrowError::AmountOverflow {
                amount: attached_value,
            })?;

        let id = state.records.len() as EscrowId;
        let record = EscrowRecord::new(id, caller, seller, attached_value);
        self.backend.commit(&Mutation::Intake { record: &record })?;

        let event = EscrowEvent::created(&record);
        state.total_received = total_received;
        state.records.push(record);

        tracing::info!(
            escrow_id = id,
            buyer = %caller,
            seller = %seller,
            amount = %attached_value,
            "escrow created"
        );
        // Sent under the lock so subscribers see mutations in commit order.
        let _ = self.events.send(event);
        Ok(id)
    }

    /// Pays the custody amount of escrow `id` to its seller.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::NotFound`] if `id` does not exist.
    /// - [`EscrowError::Unauthorized`] with [`Denial::NotBuyer`] if `caller`
    ///   is not the buyer, or [`Denial::NotAwaitingDelivery`] if the escrow
    ///   is already settled.
    /// - [`EscrowError::Settlement`] if the payout cannot be committed; the
    ///   escrow stays `AwaitingDelivery`.
    pub fn release_funds(&self, caller: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.settle(caller, id, EscrowState::Complete)
            .map_err(|e| rejected("release_funds", Some(id), &caller, e))
    }

    /// Returns the custody amount of escrow `id` to its buyer.
    ///
    /// Same preconditions and errors as [`release_funds`](Self::release_funds).
    pub fn refund(&self, caller: Address, id: EscrowId) -> Result<(), EscrowError> {
        self.settle(caller, id, EscrowState::Refunded)
            .map_err(|e| rejected("refund", Some(id), &caller, e))
    }

    fn settle(
        &self,
        caller: Address,
        id: EscrowId,
        terminal: EscrowState,
    ) -> Result<(), EscrowError> {
        let mut state = self.state.write();
        let index = state.index_of(id)?;
        let current = &state.records[index];

        if current.buyer != caller {
            return Err(EscrowError::Unauthorized {
                escrow_id: Some(id),
                reason: Denial::NotBuyer,
            });
        }
        if current.state != EscrowState::AwaitingDelivery {
            return Err(EscrowError::Unauthorized {
                escrow_id: Some(id),
                reason: Denial::NotAwaitingDelivery {
                    current: current.state,
                },
            });
        }

        let payee = current.payee_for(terminal).ok_or_else(|| {
            SettlementError::Rejected(format!("{terminal} is not a terminal state"))
        })?;
        let amount = current.amount;
        let total_paid_out = state
            .total_paid_out
            .checked_add(amount)
            .ok_or(EscrowError::AmountOverflow { amount })?;

        let settled = current.settled(terminal);
        self.backend.commit(&Mutation::Payout {
            record: &settled,
            payee,
            amount,
        })?;

        let event = EscrowEvent::settled(&settled);
        state.records[index] = settled;
        state.total_paid_out = total_paid_out;

        tracing::info!(
            escrow_id = id,
            state = %terminal,
            payee = %payee,
            amount = %amount,
            "escrow settled"
        );
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    /// Snapshot of escrow `id`. Anyone may read any record.
    pub fn get_escrow(&self, id: EscrowId) -> Result<EscrowRecord, EscrowError> {
        let state = self.state.read();
        let index = state.index_of(id)?;
        Ok(state.records[index].clone())
    }

    /// Number of escrows ever created, settled ones included.
    pub fn escrow_count(&self) -> u64 {
        self.state.read().records.len() as u64
    }

    /// Up to `limit` records starting at id `offset`, in id order.
    ///
    /// `limit` is capped at [`MAX_PAGE_SIZE`]. An offset past the end yields
    /// an empty page.
    pub fn escrows(&self, offset: u64, limit: usize) -> Vec<EscrowRecord> {
        let state = self.state.read();
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        state
            .records
            .iter()
            .skip(start)
            .take(limit.min(MAX_PAGE_SIZE))
            .cloned()
            .collect()
    }

    /// Every record where `party` is the buyer or the seller.
    pub fn escrows_for(&self, party: &Address) -> Vec<EscrowRecord> {
        self.state
            .read()
            .records
            .iter()
            .filter(|record| record.involves(party))
            .cloned()
            .collect()
    }

    /// Counts and totals, taken under one read lock.
    pub fn custody(&self) -> CustodySummary {
        let state = self.state.read();
        let mut summary = CustodySummary {
            escrow_count: state.records.len() as u64,
            awaiting_delivery: 0,
            complete: 0,
            refunded: 0,
            in_custody: Wei::ZERO,
            total_received: state.total_received,
            total_paid_out: state.total_paid_out,
        };
        for record in &state.records {
            match record.state {
                EscrowState::AwaitingDelivery => {
                    summary.awaiting_delivery += 1;
                    // Bounded by total_received, which already fit.
                    summary.in_custody =
                        Wei::new(summary.in_custody.as_u128() + record.amount.as_u128());
                }
                EscrowState::Complete => summary.complete += 1,
                EscrowState::Refunded => summary.refunded += 1,
            }
        }
        summary
    }

    /// Value the backend has paid out to `account`.
    pub fn balance_of(&self, account: &Address) -> Result<Wei, EscrowError> {
        Ok(self.backend.balance_of(account)?)
    }

    /// Subscribes to events for mutations committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.events.subscribe()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn rejected(
    operation: &'static str,
    escrow_id: Option<EscrowId>,
    caller: &Address,
    err: EscrowError,
) -> EscrowError {
    match err.kind() {
        crate::error::ErrorKind::Settlement => tracing::error!(
            operation,
            escrow_id,
            caller = %caller,
            error = %err,
            "settlement backend failed"
        ),
        kind => tracing::debug!(
            operation,
            escrow_id,
            caller = %caller,
            kind = %kind,
            error = %err,
            "operation rejected"
        ),
    }
    err
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
