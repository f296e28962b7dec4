//! Integration tests for escrow persistence.
//!
//! These tests drive `LedgerDb` through whole record lifecycles on a real
//! on-disk database: intake, payout, reopen. Each test gets its own
//! temporary directory.

use escrow_protocol::storage::{DbError, LedgerDb};
use escrow_protocol::units::parse_ether;
use escrow_protocol::{Address, EscrowRecord, EscrowState, Wei};

fn buyer() -> Address {
    Address::parse("0x5FbDB2315678afecb367f032d93F642f64180aa3").unwrap()
}

fn seller() -> Address {
    Address::parse("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512").unwrap()
}

/// Commits `count` intakes of `amount` each and returns the records.
fn seed(db: &LedgerDb, count: u64, amount: Wei) -> Vec<EscrowRecord> {
    (0..count)
        .map(|id| {
            let record = EscrowRecord::new(id, buyer(), seller(), amount);
            db.put_intake(&record).unwrap();
            record
        })
        .collect()
}

#[test]
fn lifecycle_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let amount = parse_ether("0.1").unwrap();

    {
        let db = LedgerDb::open(dir.path()).unwrap();
        let records = seed(&db, 5, amount);

        let released = records[1].settled(EscrowState::Complete);
        db.put_payout(&released, &seller(), amount).unwrap();
        let refunded = records[3].settled(EscrowState::Refunded);
        db.put_payout(&refunded, &buyer(), amount).unwrap();
    }

    let db = LedgerDb::open(dir.path()).unwrap();
    assert_eq!(db.escrow_count().unwrap(), 5);

    let states: Vec<_> = db
        .load_escrows()
        .unwrap()
        .into_iter()
        .map(|r| r.state)
        .collect();
    assert_eq!(
        states,
        vec![
            EscrowState::AwaitingDelivery,
            EscrowState::Complete,
            EscrowState::AwaitingDelivery,
            EscrowState::Refunded,
            EscrowState::AwaitingDelivery,
        ]
    );

    assert_eq!(db.balance_of(&seller()).unwrap(), amount);
    assert_eq!(db.balance_of(&buyer()).unwrap(), amount);
    assert_eq!(db.account_count(), 2);

    let totals = db.totals().unwrap();
    assert_eq!(totals.received, parse_ether("0.5").unwrap());
    assert_eq!(totals.paid_out, parse_ether("0.2").unwrap());

    let settled = db.get_escrow(1).unwrap().unwrap();
    assert!(settled.settled_at.is_some());
    assert!(settled.settled_at.unwrap() >= settled.created_at);
}

#[test]
fn conflicting_writes_leave_no_trace() {
    let db = LedgerDb::open_temporary().unwrap();
    let records = seed(&db, 2, Wei::new(50));
    let before = db.totals().unwrap();

    // Reused id.
    let duplicate = EscrowRecord::new(1, buyer(), seller(), Wei::new(50));
    assert!(matches!(db.put_intake(&duplicate), Err(DbError::Conflict(_))));

    // Skipped id.
    let gap = EscrowRecord::new(5, buyer(), seller(), Wei::new(50));
    assert!(matches!(db.put_intake(&gap), Err(DbError::Conflict(_))));

    // Payout for a record that was never taken in.
    let ghost = EscrowRecord::new(9, buyer(), seller(), Wei::new(50)).settled(EscrowState::Complete);
    assert!(matches!(
        db.put_payout(&ghost, &seller(), Wei::new(50)),
        Err(DbError::Conflict(_))
    ));

    // Second payout on the same record, via the other terminal state.
    db.put_payout(&records[0].settled(EscrowState::Complete), &seller(), Wei::new(50))
        .unwrap();
    assert!(matches!(
        db.put_payout(&records[0].settled(EscrowState::Refunded), &buyer(), Wei::new(50)),
        Err(DbError::Conflict(_))
    ));

    assert_eq!(db.escrow_count().unwrap(), 2);
    assert_eq!(db.balance_of(&buyer()).unwrap(), Wei::ZERO);
    assert_eq!(db.balance_of(&seller()).unwrap(), Wei::new(50));
    let after = db.totals().unwrap();
    assert_eq!(after.received, before.received);
    assert_eq!(after.paid_out, Wei::new(50));
}

#[test]
fn reopen_keeps_schema_and_data() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = LedgerDb::open(dir.path()).unwrap();
        db.flush().unwrap();
    }

    let db = LedgerDb::open(dir.path()).unwrap();
    seed(&db, 1, Wei::new(1));
    drop(db);

    let db = LedgerDb::open(dir.path()).unwrap();
    assert_eq!(db.escrow_count().unwrap(), 1);
}
