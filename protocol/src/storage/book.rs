//! # Account Book
//!
//! In-memory balances credited by escrow payouts. The book only ever grows:
//! the ledger credits payees, and nothing in the escrow flow debits them.
//! Thread safety is the owner's concern; an `AccountBook` is plain data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Address;
use crate::units::Wei;

/// Errors that can occur while crediting the book.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BookError {
    /// The credit would push the balance past `u128::MAX` wei.
    #[error("balance overflow for {account}: current {current}, credit {credit}")]
    Overflow {
        account: Address,
        current: Wei,
        credit: Wei,
    },
}

/// Balances keyed by address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountBook {
    balances: HashMap<Address, Wei>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of `account`; zero for addresses never credited.
    pub fn balance_of(&self, account: &Address) -> Wei {
        self.balances.get(account).copied().unwrap_or(Wei::ZERO)
    }

    /// Checks that `amount` can be credited without applying it.
    pub fn can_credit(&self, account: &Address, amount: Wei) -> Result<(), BookError> {
        let current = self.balance_of(account);
        current
            .checked_add(amount)
            .map(|_| ())
            .ok_or(BookError::Overflow {
                account: *account,
                current,
                credit: amount,
            })
    }

    /// Adds `amount` to `account` and returns the new balance.
    pub fn credit(&mut self, account: &Address, amount: Wei) -> Result<Wei, BookError> {
        self.can_credit(account, amount)?;
        let balance = self.balances.entry(*account).or_insert(Wei::ZERO);
        // Checked above; the sum fits.
        *balance = Wei::new(balance.as_u128() + amount.as_u128());
        Ok(*balance)
    }

    /// Number of accounts holding a balance entry.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}
