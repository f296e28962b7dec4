//! # Identity Module
//!
//! Parties to an escrow are identified by a 20-byte address, written on the
//! wire as `0x`-prefixed hex. The all-zero address is the null identity: it
//! can never be a seller, and nothing is ever paid to it.
//!
//! Identities here carry no key material. Whoever hosts the ledger decides
//! how a caller proves it owns an address; the ledger only compares them.

pub mod address;

pub use address::{Address, AddressError};
