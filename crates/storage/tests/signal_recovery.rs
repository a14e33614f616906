#![forbid(unsafe_code)]

use ho_core::ids::WorkUnitId;
use ho_core::model::Signal;
use ho_storage::{SignalBoard, SqliteStore};

fn id(raw: &str) -> WorkUnitId {
    WorkUnitId::try_new(raw).expect("id")
}

/// Every non-empty subset of the three signals.
fn subsets() -> Vec<Vec<Signal>> {
    (1u8..8)
        .map(|mask| {
            Signal::ALL
                .into_iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, signal)| signal)
                .collect()
        })
        .collect()
}

#[test]
fn clear_stale_removes_any_subset() {
    for subset in subsets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path().join("blobs.db")).expect("open");
        let board = SignalBoard::new(&store);
        for signal in &subset {
            board.put(*signal, &id("stale")).expect("seed");
        }

        let cleared = board.clear_stale().expect("clear");
        assert_eq!(cleared, subset);
        assert!(board.snapshot().expect("snapshot").is_idle());
        assert!(board.clear_stale().expect("second clear").is_empty());
    }
}

#[test]
fn snapshot_reports_payloads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::open(dir.path().join("blobs.db")).expect("open");
    let board = SignalBoard::new(&store);
    board.put(Signal::Claimed, &id("abc")).expect("put");

    let snapshot = board.snapshot().expect("snapshot");
    assert_eq!(snapshot.claimed, Some(id("abc")));
    assert_eq!(snapshot.offered, None);
    assert_eq!(snapshot.present(), vec![Signal::Claimed]);
}
