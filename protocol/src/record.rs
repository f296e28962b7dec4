//! # Escrow Records
//!
//! One record per buyer–seller agreement. A record's parties and amount are
//! fixed when it is created; only its state moves, and it moves once:
//!
//! ```text
//!                      release (buyer)
//!  AwaitingDelivery ───────────────────▶ Complete
//!         │
//!         │ refund (buyer)
//!         ▼
//!      Refunded
//! ```
//!
//! Both terminal states are final. The record stays in the ledger forever
//! as a historical entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::Address;
use crate::units::Wei;

/// Sequential, zero-based escrow identifier.
pub type EscrowId = u64;

// ---------------------------------------------------------------------------
// EscrowState
// ---------------------------------------------------------------------------

/// Lifecycle state of an escrow.
///
/// Discriminants are part of the wire contract: clients that read the raw
/// state number expect `0`, `1`, `2` in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EscrowState {
    /// Funds are in custody, waiting for the buyer to decide.
    AwaitingDelivery = 0,
    /// Funds were released to the seller.
    Complete = 1,
    /// Funds were returned to the buyer.
    Refunded = 2,
}

impl EscrowState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// `true` for `Complete` and `Refunded`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, EscrowState::AwaitingDelivery)
    }
}

impl TryFrom<u8> for EscrowState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EscrowState::AwaitingDelivery),
            1 => Ok(EscrowState::Complete),
            2 => Ok(EscrowState::Refunded),
            other => Err(other),
        }
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscrowState::AwaitingDelivery => write!(f, "AwaitingDelivery"),
            EscrowState::Complete => write!(f, "Complete"),
            EscrowState::Refunded => write!(f, "Refunded"),
        }
    }
}

// ---------------------------------------------------------------------------
// EscrowRecord
// ---------------------------------------------------------------------------

/// A single escrow agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    /// Position in the ledger. Equal to the record count at creation.
    pub id: EscrowId,
    /// The party that funded the escrow, and the only one who may settle it.
    pub buyer: Address,
    /// The party paid on release. Never the null identity.
    pub seller: Address,
    /// Value held in custody. Strictly positive.
    pub amount: Wei,
    /// Current lifecycle state.
    pub state: EscrowState,
    /// When the record was appended.
    pub created_at: DateTime<Utc>,
    /// When the record reached its terminal state.
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
}

impl EscrowRecord {
    /// A fresh record in `AwaitingDelivery`.
    pub fn new(id: EscrowId, buyer: Address, seller: Address, amount: Wei) -> Self {
        Self {
            id,
            buyer,
            seller,
            amount,
            state: EscrowState::AwaitingDelivery,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Returns a copy moved into `terminal`, stamped with the settlement time.
    ///
    /// The receiver is left untouched so callers can commit the copy first
    /// and only then replace the original.
    pub fn settled(&self, terminal: EscrowState) -> Self {
        debug_assert!(terminal.is_terminal());
        Self {
            state: terminal,
            settled_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Who receives the custody amount when the record enters `terminal`.
    pub fn payee_for(&self, terminal: EscrowState) -> Option<Address> {
        match terminal {
            EscrowState::Complete => Some(self.seller),
            EscrowState::Refunded => Some(self.buyer),
            EscrowState::AwaitingDelivery => None,
        }
    }

    /// `true` if `party` is the buyer or the seller.
    pub fn involves(&self, party: &Address) -> bool {
        self.buyer == *party || self.seller == *party
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn new_record_awaits_delivery() {
        let record = EscrowRecord::new(0, addr(1), addr(2), Wei::from_ether(1));
        assert_eq!(record.state, EscrowState::AwaitingDelivery);
        assert!(record.settled_at.is_none());
        assert!(!record.state.is_terminal());
    }

    #[test]
    fn state_discriminants_are_stable() {
        assert_eq!(EscrowState::AwaitingDelivery.as_u8(), 0);
        assert_eq!(EscrowState::Complete.as_u8(), 1);
        assert_eq!(EscrowState::Refunded.as_u8(), 2);
        for n in 0..3u8 {
            assert_eq!(EscrowState::try_from(n).unwrap().as_u8(), n);
        }
        assert_eq!(EscrowState::try_from(3), Err(3));
    }

    #[test]
    fn settled_copy_leaves_original_untouched() {
        let record = EscrowRecord::new(4, addr(1), addr(2), Wei::new(10));
        let done = record.settled(EscrowState::Complete);
        assert_eq!(record.state, EscrowState::AwaitingDelivery);
        assert_eq!(done.state, EscrowState::Complete);
        assert!(done.settled_at.is_some());
        assert_eq!(done.id, 4);
        assert_eq!(done.amount, record.amount);
    }

    #[test]
    fn payee_depends_on_terminal_state() {
        let record = EscrowRecord::new(0, addr(1), addr(2), Wei::new(10));
        assert_eq!(record.payee_for(EscrowState::Complete), Some(addr(2)));
        assert_eq!(record.payee_for(EscrowState::Refunded), Some(addr(1)));
        assert_eq!(record.payee_for(EscrowState::AwaitingDelivery), None);
    }

    #[test]
    fn involves_either_party() {
        let record = EscrowRecord::new(0, addr(1), addr(2), Wei::new(10));
        assert!(record.involves(&addr(1)));
        assert!(record.involves(&addr(2)));
        assert!(!record.involves(&addr(3)));
    }

    #[test]
    fn bincode_roundtrip_preserves_record() {
        let pending = EscrowRecord::new(7, addr(1), addr(2), Wei::new(123));
        let refunded = pending.settled(EscrowState::Refunded);
        for record in [pending, refunded] {
            let bytes = bincode::serialize(&record).unwrap();
            let back: EscrowRecord = bincode::deserialize(&bytes).unwrap();
            assert_eq!(back, record);
        }
    }
}
