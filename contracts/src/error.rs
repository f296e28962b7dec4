//! # Ledger Errors
//!
//! Every rejection maps to one of four stable [`ErrorKind`]s. Callers that
//! only match on message text keep working too: each message starts with
//! the kind's name.
//!
//! `Unauthorized` deliberately covers three distinct conditions, told apart
//! by [`Denial`]:
//!
//! | Denial                | Raised by                      |
//! |-----------------------|--------------------------------|
//! | `NotBuyer`            | release / refund               |
//! | `NotAwaitingDelivery` | release / refund               |
//! | `NullSeller`          | create                         |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use escrow_protocol::{EscrowId, EscrowState, Wei};

use crate::settlement::SettlementError;

/// Coarse error category, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidAmount,
    Unauthorized,
    NotFound,
    /// The host failed to commit a valid mutation.
    Settlement,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "InvalidAmount",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Settlement => "Settlement",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an `Unauthorized` rejection happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The caller is not the record's buyer.
    NotBuyer,
    /// The record already reached a terminal state.
    NotAwaitingDelivery { current: EscrowState },
    /// Creation named the null identity as seller.
    NullSeller,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::NotBuyer => write!(f, "caller is not the buyer"),
            Denial::NotAwaitingDelivery { current } => {
                write!(f, "escrow is {current}, not AwaitingDelivery")
            }
            Denial::NullSeller => write!(f, "seller is the null address"),
        }
    }
}

/// Errors returned by [`crate::EscrowLedger`] operations.
#[derive(Debug, Error)]
pub enum EscrowError {
    /// Creation with zero attached value.
    #[error("InvalidAmount: attached value must be greater than zero")]
    InvalidAmount,

    /// The value would overflow a ledger total.
    #[error("InvalidAmount: {amount} wei would overflow the custody totals")]
    AmountOverflow { amount: Wei },

    /// The caller lacks rights over the target, or the target's state
    /// forbids the transition.
    #[error("Unauthorized: {reason}")]
    Unauthorized {
        /// Absent for creation-time denials.
        escrow_id: Option<EscrowId>,
        reason: Denial,
    },

    #[error("NotFound: escrow {0} does not exist")]
    NotFound(EscrowId),

    /// The settlement backend refused or failed to commit.
    #[error("Settlement: {0}")]
    Settlement(#[from] SettlementError),

    /// Restored records violate the ledger's invariants.
    #[error("Settlement: stored ledger is corrupted: {0}")]
    Corrupted(String),
}

impl EscrowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::InvalidAmount | EscrowError::AmountOverflow { .. } => {
                ErrorKind::InvalidAmount
            }
            EscrowError::Unauthorized { .. } => ErrorKind::Unauthorized,
            EscrowError::NotFound(_) => ErrorKind::NotFound,
            EscrowError::Settlement(_) | EscrowError::Corrupted(_) => ErrorKind::Settlement,
        }
    }

    /// The denial reason for `Unauthorized` errors.
    pub fn denial(&self) -> Option<Denial> {
        match self {
            EscrowError::Unauthorized { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
