//! Wire codec: the four framed message types this protocol exchanges.
//!
//! Every datagram is a TLV: `type: u8`, `version: u8`, `length: u16` (big
//! endian, counting only the bytes after this header), followed by a body
//! whose shape depends on `type`. Parsing never panics and never returns an
//! `Err` — malformed input is simply not a `Message`, per the "drop silently"
//! failure semantics of this protocol; there is no negative acknowledgement.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::hwaddr::{HwAddr, HWADDR_LEN};

/// Ceiling on a single datagram's on-wire size, matching the legacy
/// deployment this protocol was carried over.
pub const MAX_PAYLOAD: usize = 1400;

/// The only protocol version this crate speaks. Anything else is dropped.
pub const VERSION: u8 = 0;

/// Size of the framing TLV header common to every datagram.
pub const HEADER_LEN: usize = 4; // type(1) + version(1) + length(2)
const RECORD_HEADER_LEN: usize = HWADDR_LEN + 1 + 1 + 2; // src(6) + type(1) + version(1) + length(2)
/// Size of the `tx_id`/`seqno` prefix inside a `PushData` body, before any records.
pub const PUSH_BODY_PREFIX_LEN: usize = 4;

const TYPE_ANNOUNCE_MASTER: u8 = 0;
const TYPE_REQUEST: u8 = 1;
const TYPE_PUSH_DATA: u8 = 2;
const TYPE_STATUS_TXEND: u8 = 3;

/// A single dataset as carried inside a `PushData` message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataRecord {
    pub src_hwaddr: HwAddr,
    pub data_type: u8,
    pub version: u8,
    pub payload: Bytes,
}

/// A fully parsed inbound message, or the encoding recipe for an outbound one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    AnnounceMaster,
    Request {
        requested_type: u8,
        tx_id: u16,
    },
    StatusTxEnd {
        tx_id: u16,
        seqno: u16,
    },
    PushData {
        tx_id: u16,
        seqno: u16,
        records: Vec<DataRecord>,
    },
}

/// Parse one datagram. Returns `None` for anything this protocol must drop
/// silently: truncation, an unrecognised type, a body shorter than its
/// declared length, or an unsupported version.
pub fn parse(buf: &[u8]) -> Option<Message> {
    if buf.len() < HEADER_LEN {
        trace!(len = buf.len(), "datagram shorter than the framing header");
        return None;
    }
    let packet_type = buf[0];
    let version = buf[1];
    let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;

    if version != VERSION {
        trace!(version, "dropping datagram with unsupported version");
        return None;
    }
    let Some(total_len) = HEADER_LEN.checked_add(length) else {
        trace!(length, "declared body length overflows header arithmetic");
        return None;
    };
    if buf.len() < total_len {
        trace!(declared = length, actual = buf.len(), "datagram shorter than its declared length");
        return None;
    }
    let body = &buf[HEADER_LEN..HEADER_LEN + length];

    match packet_type {
        TYPE_ANNOUNCE_MASTER => parse_announce_master(body),
        TYPE_REQUEST => parse_request(body),
        TYPE_STATUS_TXEND => parse_status_txend(body),
        TYPE_PUSH_DATA => parse_push_data(body),
        _ => {
            trace!(packet_type, "dropping datagram of unknown type");
            None
        }
    }
}

fn parse_announce_master(body: &[u8]) -> Option<Message> {
    if !body.is_empty() {
        return None;
    }
    Some(Message::AnnounceMaster)
}

fn parse_request(body: &[u8]) -> Option<Message> {
    if body.len() < 3 {
        return None;
    }
    let requested_type = body[0];
    let tx_id = u16::from_be_bytes([body[1], body[2]]);
    Some(Message::Request {
        requested_type,
        tx_id,
    })
}

fn parse_status_txend(body: &[u8]) -> Option<Message> {
    if body.len() < 4 {
        return None;
    }
    let tx_id = u16::from_be_bytes([body[0], body[1]]);
    let seqno = u16::from_be_bytes([body[2], body[3]]);
    Some(Message::StatusTxEnd { tx_id, seqno })
}

fn parse_push_data(body: &[u8]) -> Option<Message> {
    if body.len() < 4 {
        return None;
    }
    let tx_id = u16::from_be_bytes([body[0], body[1]]);
    let seqno = u16::from_be_bytes([body[2], body[3]]);

    let mut records = Vec::new();
    let mut rest = &body[4..];
    while rest.len() >= RECORD_HEADER_LEN {
        let src_hwaddr = HwAddr::new([
            rest[0], rest[1], rest[2], rest[3], rest[4], rest[5],
        ]);
        let data_type = rest[6];
        let version = rest[7];
        let data_len = u16::from_be_bytes([rest[8], rest[9]]) as usize;

        let available = rest.len() - RECORD_HEADER_LEN;
        if data_len > available {
            // Trailing record claims more than remains: stop, keep what
            // we already parsed rather than failing the whole message.
            break;
        }

        let payload = Bytes::copy_from_slice(&rest[RECORD_HEADER_LEN..RECORD_HEADER_LEN + data_len]);
        records.push(DataRecord {
            src_hwaddr,
            data_type,
            version,
            payload,
        });

        rest = &rest[RECORD_HEADER_LEN + data_len..];
    }

    Some(Message::PushData {
        tx_id,
        seqno,
        records,
    })
}

fn put_header(buf: &mut BytesMut, packet_type: u8, body_len: u16) {
    buf.put_u8(packet_type);
    buf.put_u8(VERSION);
    buf.put_u16(body_len);
}

pub fn encode_announce_master() -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    put_header(&mut buf, TYPE_ANNOUNCE_MASTER, 0);
    buf.freeze()
}

pub fn encode_request(requested_type: u8, tx_id: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 3);
    put_header(&mut buf, TYPE_REQUEST, 3);
    buf.put_u8(requested_type);
    buf.put_u16(tx_id);
    buf.freeze()
}

pub fn encode_status_txend(tx_id: u16, seqno: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 4);
    put_header(&mut buf, TYPE_STATUS_TXEND, 4);
    buf.put_u16(tx_id);
    buf.put_u16(seqno);
    buf.freeze()
}

/// Size a single [`DataRecord`] would occupy inside a `PushData` body.
pub fn record_wire_len(record: &DataRecord) -> usize {
    RECORD_HEADER_LEN + record.payload.len()
}

/// Encode a complete `PushData` message from already-selected records. The
/// caller (the push scheduler) is responsible for keeping the total within
/// [`MAX_PAYLOAD`]; this function does not re-check that bound.
pub fn encode_push_data(tx_id: u16, seqno: u16, records: &[DataRecord]) -> Bytes {
    let body_len: usize = PUSH_BODY_PREFIX_LEN + records.iter().map(record_wire_len).sum::<usize>();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    put_header(&mut buf, TYPE_PUSH_DATA, body_len as u16);
    buf.put_u16(tx_id);
    buf.put_u16(seqno);
    for record in records {
        buf.put_slice(record.src_hwaddr.as_bytes());
        buf.put_u8(record.data_type);
        buf.put_u8(record.version);
        buf.put_u16(record.payload.len() as u16);
        buf.put_slice(&record.payload);
    }
    buf.freeze()
}
