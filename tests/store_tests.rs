use iedsim::activity::ACTIVITY_LOG_CAPACITY;
use iedsim::store::StoreError;
use iedsim::*;
use std::sync::Arc;
use std::thread;

fn store(size: u16) -> Arc<RegisterStore> {
    Arc::new(RegisterStore::new(size, Arc::new(ActivityLog::new())))
}

#[test]
fn test_parallel_writers_on_disjoint_ranges() {
    let store = store(400);

    let handles: Vec<_> = (0..4u16)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for offset in 0..100u16 {
                    store
                        .write_one(
                            RegisterBank::HoldingRegister,
                            worker * 100 + offset,
                            worker * 1000 + offset + 1,
                            WriteSource::ExternalApi,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for worker in 0..4u16 {
        let values = store
            .read(RegisterBank::HoldingRegister, worker * 100, 100)
            .unwrap();
        let expected: Vec<u16> = (0..100).map(|offset| worker * 1000 + offset + 1).collect();
        assert_eq!(values, expected);
    }
    assert_eq!(store.activity().total_recorded(), 400);
}

#[test]
fn test_block_writes_are_never_torn() {
    let store = store(50);
    let writers: Vec<_> = [1u16, 2]
        .into_iter()
        .map(|fill| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    store
                        .write_many(RegisterBank::HoldingRegister, 0, &[fill; 10], WriteSource::ExternalApi)
                        .unwrap();
                }
            })
        })
        .collect();

    for _ in 0..200 {
        let block = store.read(RegisterBank::HoldingRegister, 0, 10).unwrap();
        assert!(block.iter().all(|&v| v == block[0]), "torn block {block:?}");
    }
    for writer in writers {
        writer.join().unwrap();
    }
}

#[test]
fn test_activity_keeps_latest_entries() {
    let store = store(10);
    for value in 1..=150u16 {
        store
            .write_one(RegisterBank::HoldingRegister, 0, value, WriteSource::Simulation)
            .unwrap();
    }

    let log = store.activity();
    assert_eq!(log.len(), ACTIVITY_LOG_CAPACITY);
    assert_eq!(log.total_recorded(), 150);

    let all = log.recent(usize::MAX);
    assert_eq!(all.first().unwrap().sequence, 51);
    assert_eq!(all.last().unwrap().new, 150);
    assert_eq!(all.last().unwrap().previous, 149);
}

#[test]
fn test_rejected_writes_leave_no_trace() {
    let store = store(10);

    assert!(matches!(
        store.write_one(RegisterBank::InputRegister, 0, 5, WriteSource::ProtocolWrite),
        Err(StoreError::ReadOnlyViolation { .. })
    ));
    assert!(matches!(
        store.write_many(RegisterBank::Coil, 0, &[1, 0, 2], WriteSource::ExternalApi),
        Err(StoreError::InvalidValue { value: 2, .. })
    ));
    assert!(matches!(
        store.read(RegisterBank::DiscreteInput, 5, 6),
        Err(StoreError::OutOfRange { .. })
    ));

    assert!(store.activity().is_empty());
    assert_eq!(store.read(RegisterBank::Coil, 0, 3).unwrap(), vec![0, 0, 0]);
}

#[test]
fn test_snapshot_restore_logs_only_differences() {
    let store = store(20);
    store
        .write_many(RegisterBank::HoldingRegister, 0, &[1, 2, 3], WriteSource::ExternalApi)
        .unwrap();
    let saved = store.snapshot();

    store
        .write_one(RegisterBank::HoldingRegister, 1, 99, WriteSource::ProtocolWrite)
        .unwrap();
    store
        .write_one(RegisterBank::Coil, 4, 1, WriteSource::ProtocolWrite)
        .unwrap();
    let before = store.activity().total_recorded();

    store.restore(&saved, WriteSource::ExternalApi).unwrap();
    assert_eq!(store.snapshot(), saved);
    assert_eq!(store.activity().total_recorded() - before, 2);
}
