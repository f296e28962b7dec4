//! Concurrency tests for the escrow ledger.
//!
//! Many threads hammer one ledger at once. Whatever the interleaving, each
//! escrow must be paid out exactly once and custody must stay solvent.

use std::sync::{Arc, Barrier};
use std::thread;

use escrow_contracts::{EscrowLedger, MemorySettlement, SledSettlement};
use escrow_protocol::storage::LedgerDb;
use escrow_protocol::{Address, EscrowState, Wei};

fn party(byte: u8) -> Address {
    Address::from_bytes([byte; 20])
}

const BUYER: u8 = 0xB1;
const SELLER: u8 = 0x51;

#[test]
fn racing_release_and_refund_pay_out_once() {
    const ESCROWS: u64 = 64;
    const AMOUNT: u128 = 1_000;

    let ledger = Arc::new(EscrowLedger::new(MemorySettlement::new()));
    for _ in 0..ESCROWS {
        ledger
            .create_escrow(party(BUYER), party(SELLER), Wei::new(AMOUNT))
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut wins = 0u64;
                for id in 0..ESCROWS {
                    let outcome = if worker % 2 == 0 {
                        ledger.release_funds(party(BUYER), id)
                    } else {
                        ledger.refund(party(BUYER), id)
                    };
                    if outcome.is_ok() {
                        wins += 1;
                    }
                }
                wins
            })
        })
        .collect();

    let total_wins: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total_wins, ESCROWS);

    let summary = ledger.custody();
    assert_eq!(summary.awaiting_delivery, 0);
    assert_eq!(summary.complete + summary.refunded, ESCROWS);
    assert_eq!(summary.in_custody, Wei::ZERO);
    assert!(summary.is_solvent());

    let seller_balance = ledger.balance_of(&party(SELLER)).unwrap().as_u128();
    let buyer_balance = ledger.balance_of(&party(BUYER)).unwrap().as_u128();
    assert_eq!(seller_balance, summary.complete as u128 * AMOUNT);
    assert_eq!(buyer_balance, summary.refunded as u128 * AMOUNT);
}

#[test]
fn concurrent_creations_get_unique_dense_ids() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let ledger = Arc::new(EscrowLedger::new(MemorySettlement::new()));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| {
                        ledger
                            .create_escrow(party(t as u8 + 1), party(SELLER), Wei::new(1))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    let expected: Vec<u64> = (0..(THREADS * PER_THREAD) as u64).collect();
    assert_eq!(ids, expected);
    assert_eq!(ledger.escrow_count(), expected.len() as u64);
    assert!(ledger.custody().is_solvent());
}

#[test]
fn readers_never_see_half_applied_settlement() {
    const ESCROWS: u64 = 200;

    let ledger = Arc::new(EscrowLedger::new(MemorySettlement::new()));
    for _ in 0..ESCROWS {
        ledger
            .create_escrow(party(BUYER), party(SELLER), Wei::new(5))
            .unwrap();
    }

    let writer = {
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            for id in 0..ESCROWS {
                ledger.release_funds(party(BUYER), id).unwrap();
            }
        })
    };
    let reader = {
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            for _ in 0..500 {
                assert!(ledger.custody().is_solvent());
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(ledger.custody().complete, ESCROWS);
}

#[test]
fn sled_backend_under_contention() {
    const ESCROWS: u64 = 16;

    let db = LedgerDb::open_temporary().unwrap();
    let ledger = Arc::new(EscrowLedger::new(SledSettlement::new(db)));
    for _ in 0..ESCROWS {
        ledger
            .create_escrow(party(BUYER), party(SELLER), Wei::new(10))
            .unwrap();
    }

    thread::scope(|scope| {
        for worker in 0..4 {
            let ledger = &ledger;
            scope.spawn(move || {
                for id in 0..ESCROWS {
                    let _ = if worker % 2 == 0 {
                        ledger.refund(party(BUYER), id)
                    } else {
                        ledger.release_funds(party(BUYER), id)
                    };
                }
            });
        }
    });

    let restored = ledger.backend().db().load_escrows().unwrap();
    assert_eq!(restored.len() as u64, ESCROWS);
    assert!(restored.iter().all(|r| r.state != EscrowState::AwaitingDelivery));

    let totals = ledger.backend().db().totals().unwrap();
    assert_eq!(totals.paid_out, Wei::new(10 * ESCROWS as u128));
    assert_eq!(totals.received, totals.paid_out);
}
