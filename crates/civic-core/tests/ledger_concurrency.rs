use civic_core::config::PointsConfig;
use civic_core::ledger::Ledger;
use civic_core::model::{EventKind, IssueId, UserId};
use civic_core::store::{AwardStore, MemoryStore, SqliteStore};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

fn race_same_award(store: Arc<dyn AwardStore>) -> usize {
    let ledger = Ledger::new(store, PointsConfig::default());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let ledger = ledger.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ledger
                    .award(&UserId::new("ben"), IssueId(1), EventKind::Confirm)
                    .expect("award")
                    .is_recorded()
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .filter(|recorded| *recorded)
        .count()
}

#[test]
fn concurrent_awards_record_once_in_memory() {
    let store = Arc::new(MemoryStore::new());
    assert_eq!(race_same_award(store.clone()), 1);
    assert_eq!(store.total_for(&UserId::new("ben")).expect("total"), 5);
}

#[test]
fn concurrent_awards_record_once_in_sqlite() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(SqliteStore::open(&dir.path().join(".civic")).expect("open store"));
    assert_eq!(race_same_award(store.clone()), 1);
    assert_eq!(store.awards_for(&UserId::new("ben")).expect("awards").len(), 1);
}

#[test]
fn awards_survive_reopening_the_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let civic_dir = dir.path().join(".civic");
    {
        let store = Arc::new(SqliteStore::open(&civic_dir).expect("open store"));
        let ledger = Ledger::new(store, PointsConfig::default());
        ledger
            .award(&UserId::new("ana"), IssueId(3), EventKind::Submit)
            .expect("award");
    }

    let store = Arc::new(SqliteStore::open(&civic_dir).expect("reopen store"));
    let ledger = Ledger::new(store, PointsConfig::default());
    let again = ledger
        .award(&UserId::new("ana"), IssueId(3), EventKind::Submit)
        .expect("award");
    assert!(!again.is_recorded());
    assert_eq!(ledger.total_for(&UserId::new("ana")).expect("total"), 10);
}
