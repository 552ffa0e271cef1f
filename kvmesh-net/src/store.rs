//! The dataset store: the per-`(type, source)` table of opaque payloads a
//! server has learned, either from a local client or from the network.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;

use crate::hwaddr::HwAddr;
use crate::wire::DataRecord;

/// How a stored dataset was obtained.
///
/// Conceptually `Local` is the most trusted provenance and `Synced` the
/// least: a `Local` entry represents data this node itself produced and is
/// never overwritten by network input (see [`Store::apply_record`]). That
/// trust relationship is a single equality check, not a comparison — the
/// `Ord` derived below instead encodes the *push eligibility* ordering used
/// by the push scheduler's `max_provenance_level` filter, where admitting
/// "FIRST_HAND-or-better" means admitting `Local` and `FirstHand` but not
/// `Synced`. The two orderings run in opposite directions; only this one is
/// a real `Ord` impl.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Provenance {
    Local,
    FirstHand,
    Synced,
}

#[derive(Clone, Debug)]
pub struct Dataset {
    pub version: u8,
    pub payload: Bytes,
    pub provenance: Provenance,
    pub last_seen: Instant,
}

pub type DatasetKey = (u8, HwAddr);

/// The typed key/value table this server maintains.
#[derive(Default)]
pub struct Store {
    entries: HashMap<DatasetKey, Dataset>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, data_type: u8, src_hwaddr: &HwAddr) -> Option<&Dataset> {
        self.entries.get(&(data_type, *src_hwaddr))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DatasetKey, &Dataset)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Install or refresh a `Local` entry, as driven by the (out-of-scope)
    /// local-client collaborator. Always wins: a local push is definitionally
    /// authoritative over whatever was there before.
    pub fn put_local(&mut self, data_type: u8, src_hwaddr: HwAddr, version: u8, payload: Bytes, now: Instant) {
        self.entries.insert(
            (data_type, src_hwaddr),
            Dataset {
                version,
                payload,
                provenance: Provenance::Local,
                last_seen: now,
            },
        );
    }

    /// Apply one record from a delivered push, sent by `sender`. Implements
    /// the merge engine: returns `true` if a "changed" signal should fire
    /// for `record.data_type`.
    pub fn apply_record(&mut self, record: &DataRecord, sender: &HwAddr, now: Instant) -> bool {
        let key = (record.data_type, record.src_hwaddr);
        let is_new = !self.entries.contains_key(&key);

        if let Some(existing) = self.entries.get(&key) {
            if existing.provenance == Provenance::Local {
                return false;
            }
        }

        let changed = is_new
            || self
                .entries
                .get(&key)
                .map(|existing| existing.payload != record.payload)
                .unwrap_or(true);

        let provenance = if record.src_hwaddr == *sender {
            Provenance::FirstHand
        } else {
            Provenance::Synced
        };

        self.entries.insert(
            key,
            Dataset {
                version: record.version,
                payload: record.payload.clone(),
                provenance,
                last_seen: now,
            },
        );

        changed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn mac(b: u8) -> HwAddr {
        HwAddr::new([b; 6])
    }

    fn record(src: HwAddr, data_type: u8, payload: &'static [u8]) -> DataRecord {
        DataRecord {
            src_hwaddr: src,
            data_type,
            version: 1,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn first_hand_when_sender_is_source() {
        let mut store = Store::new();
        let src = mac(1);
        let now = Instant::now();
        let changed = store.apply_record(&record(src, 10, b"hello"), &src, now);
        assert!(changed);
        assert_eq!(store.get(10, &src).unwrap().provenance, Provenance::FirstHand);
    }

    #[test]
    fn synced_when_relayed_by_another_peer() {
        let mut store = Store::new();
        let src = mac(1);
        let relay = mac(2);
        let now = Instant::now();
        store.apply_record(&record(src, 10, b"hello"), &relay, now);
        assert_eq!(store.get(10, &src).unwrap().provenance, Provenance::Synced);
    }

    #[test]
    fn local_entry_is_never_clobbered() {
        let mut store = Store::new();
        let src = mac(1);
        let now = Instant::now();
        store.put_local(10, src, 1, Bytes::from_static(b"mine"), now);
        let changed = store.apply_record(&record(src, 10, b"theirs"), &src, now);
        assert!(!changed);
        let entry = store.get(10, &src).unwrap();
        assert_eq!(entry.provenance, Provenance::Local);
        assert_eq!(entry.payload, Bytes::from_static(b"mine"));
    }

    #[test]
    fn unchanged_payload_does_not_signal_change() {
        let mut store = Store::new();
        let src = mac(1);
        let now = Instant::now();
        store.apply_record(&record(src, 10, b"hello"), &src, now);
        let changed_again = store.apply_record(&record(src, 10, b"hello"), &src, now);
        assert!(!changed_again);
    }

    #[test]
    fn push_eligibility_ordering_admits_first_hand_or_better() {
        assert!(Provenance::Local <= Provenance::FirstHand);
        assert!(Provenance::FirstHand <= Provenance::FirstHand);
        assert!(Provenance::Synced > Provenance::FirstHand);
    }
}
