//! Aggregates the dataset store into MTU-sized `PushData` datagrams and a
//! trailing `StatusTxEnd` terminator.

use bytes::Bytes;

use kvmesh_net::wire::{encode_push_data, encode_status_txend, record_wire_len, HEADER_LEN, MAX_PAYLOAD, PUSH_BODY_PREFIX_LEN};
use kvmesh_net::{DataRecord, Provenance, Store};

/// The datagrams produced by one call to [`schedule_push`].
pub struct PushBatch {
    pub fragments: Vec<Bytes>,
    pub terminator: Option<Bytes>,
}

impl PushBatch {
    pub fn total_fragments(&self) -> u16 {
        self.fragments.len() as u16
    }
}

/// Select datasets at or below `max_level` (optionally restricted to
/// `type_filter`) and pack them into `PushData` datagrams bounded by
/// [`MAX_PAYLOAD`], followed by a `StatusTxEnd` naming how many fragments
/// were sent. The terminator is omitted only when nothing was sent and the
/// caller did not ask for a specific type (an unfiltered sync with nothing
/// to say need not speak at all).
pub fn schedule_push(store: &Store, max_level: Provenance, type_filter: Option<u8>, tx_id: u16) -> PushBatch {
    let mut fragments = Vec::new();
    let mut buffer: Vec<DataRecord> = Vec::new();
    let mut buffer_body_len = PUSH_BODY_PREFIX_LEN;
    let mut next_seqno: u16 = 0;

    for ((data_type, src_hwaddr), dataset) in store.iter() {
        if dataset.provenance > max_level {
            continue;
        }
        if let Some(wanted) = type_filter {
            if *data_type != wanted {
                continue;
            }
        }

        let record = DataRecord {
            src_hwaddr: *src_hwaddr,
            data_type: *data_type,
            version: dataset.version,
            payload: dataset.payload.clone(),
        };
        let record_len = record_wire_len(&record);

        if HEADER_LEN + PUSH_BODY_PREFIX_LEN + record_len > MAX_PAYLOAD {
            // No datagram could ever carry this record on its own; drop it.
            continue;
        }

        if HEADER_LEN + buffer_body_len + record_len > MAX_PAYLOAD {
            fragments.push(encode_push_data(tx_id, next_seqno, &buffer));
            next_seqno += 1;
            buffer.clear();
            buffer_body_len = PUSH_BODY_PREFIX_LEN;
        }

        buffer_body_len += record_len;
        buffer.push(record);
    }

    if !buffer.is_empty() {
        fragments.push(encode_push_data(tx_id, next_seqno, &buffer));
        next_seqno += 1;
    }

    let terminator = if next_seqno > 0 || type_filter.is_some() {
        Some(encode_status_txend(tx_id, next_seqno))
    } else {
        None
    };

    PushBatch { fragments, terminator }
}
