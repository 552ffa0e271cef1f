//! Delivers a completed transaction's records into the dataset store.

use std::collections::HashSet;
use std::time::Instant;

use kvmesh_net::Store;

use crate::transaction::Transaction;

/// Apply every record carried by `txn` to `store`, in arrival order.
/// Returns the set of data types that changed, each listed at most once,
/// suitable for the collaborator's `changed_data_type` notifications.
pub fn apply_transaction(store: &mut Store, txn: &Transaction, now: Instant) -> Vec<u8> {
    let mut changed = Vec::new();
    let mut already_signalled = HashSet::new();

    for record in txn.records() {
        let did_change = store.apply_record(record, &txn.peer, now);
        if did_change && already_signalled.insert(record.data_type) {
            changed.push(record.data_type);
        }
    }

    changed
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use test_log::test;
    use kvmesh_net::{DataRecord, HwAddr};

    fn mac(b: u8) -> HwAddr {
        HwAddr::new([b; 6])
    }

    fn push_fixture(peer: HwAddr, records: Vec<DataRecord>) -> Transaction {
        let mut table = crate::transaction::TransactionTable::new();
        let now = Instant::now();
        let event = table.on_push(crate::role::Mode::Master, peer, 1, 0, records, now);
        let event = match event {
            crate::transaction::TxnEvent::Progressed => table.on_txend(crate::role::Mode::Master, peer, 1, 1, now),
            other => other,
        };
        match event {
            crate::transaction::TxnEvent::Completed(txn) => txn,
            _ => panic!("fixture transaction did not complete"),
        }
    }

    #[test]
    fn distinct_keys_both_change() {
        let peer = mac(1);
        let records = vec![
            DataRecord {
                src_hwaddr: peer,
                data_type: 10,
                version: 1,
                payload: Bytes::from_static(b"a"),
            },
            DataRecord {
                src_hwaddr: mac(2),
                data_type: 11,
                version: 1,
                payload: Bytes::from_static(b"b"),
            },
        ];
        let txn = push_fixture(peer, records);
        let mut store = Store::new();
        let changed = apply_transaction(&mut store, &txn, Instant::now());
        assert_eq!(changed, vec![10, 11]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn repeated_type_in_one_push_signals_once() {
        let peer = mac(1);
        let records = vec![
            DataRecord {
                src_hwaddr: peer,
                data_type: 10,
                version: 1,
                payload: Bytes::from_static(b"a"),
            },
            DataRecord {
                src_hwaddr: mac(3),
                data_type: 10,
                version: 1,
                payload: Bytes::from_static(b"c"),
            },
        ];
        let txn = push_fixture(peer, records);
        let mut store = Store::new();
        let changed = apply_transaction(&mut store, &txn, Instant::now());
        assert_eq!(changed, vec![10]);
    }

    #[test]
    fn local_entry_is_protected_and_not_signalled() {
        let peer = mac(1);
        let now = Instant::now();
        let mut store = Store::new();
        store.put_local(10, peer, 1, Bytes::from_static(b"mine"), now);

        let records = vec![DataRecord {
            src_hwaddr: peer,
            data_type: 10,
            version: 2,
            payload: Bytes::from_static(b"theirs"),
        }];
        let txn = push_fixture(peer, records);
        let changed = apply_transaction(&mut store, &txn, now);
        assert!(changed.is_empty());
        assert_eq!(store.get(10, &peer).unwrap().payload, Bytes::from_static(b"mine"));
    }
}
