//! Queue ordering and deferral properties, checked against the memory driver.

use proptest::prelude::*;
use rustypmd_io::{
    Access, FlushParams, IoHandler, IoTask, MemoryBackend, MemoryStore, Operation, Parameter,
    Slot,
};

fn path_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,6}", 1..12)
}

// ---- FIFO execution ----

proptest! {
    #[test]
    fn flush_executes_in_staging_order(names in path_names()) {
        let store = MemoryStore::new();
        let mut h = IoHandler::new(MemoryBackend::new(store.clone()), Access::Create);
        let root = h.root();
        for name in &names {
            let id = h.writables_mut().insert(Some(root));
            h.enqueue(IoTask::new(id, Parameter::CreatePath { path: name.clone() }));
        }
        prop_assert!(store.journal().is_empty());

        h.flush(&FlushParams::USER).unwrap();
        let expected: Vec<String> = names.iter().map(|n| format!("/{n}")).collect();
        prop_assert_eq!(store.journal_of(Operation::CreatePath), expected);
        prop_assert_eq!(h.pending(), 0);
    }

    #[test]
    fn slots_stay_empty_until_flush(names in path_names()) {
        let store = MemoryStore::new();
        let mut h = IoHandler::new(MemoryBackend::new(store), Access::Create);
        let root = h.root();
        for name in &names {
            let id = h.writables_mut().insert(Some(root));
            h.enqueue(IoTask::new(id, Parameter::CreatePath { path: name.clone() }));
        }
        let listing = Slot::new();
        h.enqueue(IoTask::new(root, Parameter::ListPaths { paths: listing.clone() }));
        prop_assert!(!listing.is_filled());

        h.flush(&FlushParams::USER).unwrap();
        let mut expected = names.clone();
        expected.sort();
        expected.dedup();
        prop_assert_eq!(listing.take().unwrap(), expected);
    }
}

// ---- Failure handling ----

#[test]
fn failure_drops_remaining_tasks() {
    let store = MemoryStore::new();
    let mut h = IoHandler::new(MemoryBackend::new(store.clone()), Access::Create);
    let root = h.root();
    let a = h.writables_mut().insert(Some(root));
    let missing = h.writables_mut().insert(Some(root));
    let b = h.writables_mut().insert(Some(root));
    h.enqueue(IoTask::new(a, Parameter::CreatePath { path: "a".into() }));
    h.enqueue(IoTask::new(missing, Parameter::OpenPath { path: "nope".into() }));
    h.enqueue(IoTask::new(b, Parameter::CreatePath { path: "b".into() }));

    assert!(h.flush(&FlushParams::USER).is_err());
    assert!(store.contains("/a"));
    assert!(!store.contains("/b"));
    assert_eq!(h.pending(), 0);

    // Next flush starts from an empty queue.
    h.flush(&FlushParams::USER).unwrap();
    assert!(!store.contains("/b"));
}

#[test]
fn empty_flush_is_a_no_op() {
    let store = MemoryStore::new();
    let mut h = IoHandler::new(MemoryBackend::new(store.clone()), Access::ReadOnly);
    h.flush(&FlushParams::USER).unwrap();
    h.flush(&FlushParams::USER).unwrap();
    assert!(store.journal().is_empty());
    assert_eq!(h.executed(), 0);
}
