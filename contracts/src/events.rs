//! # Ledger Events
//!
//! One event per committed mutation, carrying the escrow id and the state
//! the record is now in. Rejected operations emit nothing.
//!
//! Events are pushed through a `tokio::sync::broadcast` channel owned by the
//! ledger. Sending never blocks, and a ledger with no subscribers is normal.

use serde::{Deserialize, Serialize};

use escrow_protocol::{Address, EscrowId, EscrowRecord, EscrowState, Wei};

/// A record-changed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscrowEvent {
    /// A new escrow entered custody.
    Created {
        escrow_id: EscrowId,
        buyer: Address,
        seller: Address,
        amount: Wei,
        state: EscrowState,
    },
    /// Custody was paid to the seller.
    Released {
        escrow_id: EscrowId,
        seller: Address,
        amount: Wei,
        state: EscrowState,
    },
    /// Custody was paid back to the buyer.
    Refunded {
        escrow_id: EscrowId,
        buyer: Address,
        amount: Wei,
        state: EscrowState,
    },
}

impl EscrowEvent {
    pub(crate) fn created(record: &EscrowRecord) -> Self {
        EscrowEvent::Created {
            escrow_id: record.id,
            buyer: record.buyer,
            seller: record.seller,
            amount: record.amount,
            state: record.state,
        }
    }

    /// Event for a record that has just reached a terminal state.
    ///
    /// Returns `None` if the record is still `AwaitingDelivery`.
    pub(crate) fn settled(record: &EscrowRecord) -> Option<Self> {
        match record.state {
            EscrowState::Complete => Some(EscrowEvent::Released {
                escrow_id: record.id,
                seller: record.seller,
                amount: record.amount,
                state: record.state,
            }),
            EscrowState::Refunded => Some(EscrowEvent::Refunded {
                escrow_id: record.id,
                buyer: record.buyer,
                amount: record.amount,
                state: record.state,
            }),
            EscrowState::AwaitingDelivery => None,
        }
    }

    pub fn escrow_id(&self) -> EscrowId {
        match self {
            EscrowEvent::Created { escrow_id, .. }
            | EscrowEvent::Released { escrow_id, .. }
            | EscrowEvent::Refunded { escrow_id, .. } => *escrow_id,
        }
    }

    /// The record's state after the mutation.
    pub fn state(&self) -> EscrowState {
        match self {
            EscrowEvent::Created { state, .. }
            | EscrowEvent::Released { state, .. }
            | EscrowEvent::Refunded { state, .. } => *state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EscrowRecord {
        EscrowRecord::new(
            2,
            Address::from_bytes([1; 20]),
            Address::from_bytes([2; 20]),
            Wei::new(77),
        )
    }

    #[test]
    fn created_event_carries_terms() {
        let event = EscrowEvent::created(&record());
        assert_eq!(event.escrow_id(), 2);
        assert_eq!(event.state(), EscrowState::AwaitingDelivery);
    }

    #[test]
    fn settled_event_matches_terminal_state() {
        let pending = record();
        assert!(EscrowEvent::settled(&pending).is_none());

        let released = EscrowEvent::settled(&pending.settled(EscrowState::Complete)).unwrap();
        assert!(matches!(released, EscrowEvent::Released { .. }));
        assert_eq!(released.state(), EscrowState::Complete);

        let refunded = EscrowEvent::settled(&pending.settled(EscrowState::Refunded)).unwrap();
        assert!(matches!(refunded, EscrowEvent::Refunded { .. }));
        assert_eq!(refunded.state(), EscrowState::Refunded);
    }

    #[test]
    fn json_is_tagged_by_type() {
        let event = EscrowEvent::created(&record());
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "created");
        assert_eq!(json["escrow_id"], 2);
        assert_eq!(json["state"], "AwaitingDelivery");
        assert_eq!(json["amount"], "77");
    }
}
