//! # Protocol Configuration & Constants
//!
//! Every magic number in the escrow stack lives here. If you're hardcoding
//! a constant somewhere else, move it here instead.
//!
//! Runtime configuration (ports, data directory, log format) is parsed by
//! the node binary; the values below are its defaults.

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The protocol version string reported by the node.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// On-disk schema version for the ledger database. Stored in the `metadata`
/// tree on first open; a mismatch on reopen is refused rather than guessed at.
pub const LEDGER_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Raw address length in bytes. Same width as an EVM account address.
pub const ADDRESS_LENGTH: usize = 20;

/// Leading characters kept by [`crate::identity::Address::short`], `0x` included.
pub const SHORT_ADDRESS_HEAD: usize = 6;

/// Trailing characters kept by [`crate::identity::Address::short`].
pub const SHORT_ADDRESS_TAIL: usize = 4;

// ---------------------------------------------------------------------------
// Value Units
// ---------------------------------------------------------------------------

/// Decimal places between one ether and one wei.
pub const ETHER_DECIMALS: u32 = 18;

/// 10^18. Spelled out so nobody has to count zeros.
pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Fractional digits shown by default when formatting an amount for humans.
pub const DEFAULT_DISPLAY_DECIMALS: u32 = 4;

// ---------------------------------------------------------------------------
// Ledger Limits
// ---------------------------------------------------------------------------

/// Upper bound on records returned by a single paging call.
pub const MAX_PAGE_SIZE: usize = 100;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Capacity of the event broadcast channel. Slow subscribers that fall
/// further behind than this observe a lag and skip ahead.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Service Defaults
// ---------------------------------------------------------------------------

/// Default port for the REST / JSON-RPC / WebSocket API.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Default data directory for the persistent ledger.
pub const DEFAULT_DATA_DIR: &str = "~/.escrow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wei_per_ether_matches_decimals() {
        assert_eq!(WEI_PER_ETHER, 10u128.pow(ETHER_DECIMALS));
    }

    #[test]
    fn page_sizes_are_consistent() {
        assert!(DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE);
        assert!(DEFAULT_PAGE_SIZE > 0);
    }

    #[test]
    fn ports_do_not_collide() {
        assert_ne!(DEFAULT_RPC_PORT, DEFAULT_METRICS_PORT);
    }
}
