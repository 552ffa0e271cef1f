//! The facade tying the wire codec, peer table, dataset store, transaction
//! reassembler, merge engine, push scheduler and role controller together
//! behind the collaborator-facing entry points.
//!
//! `Core` performs no I/O of its own: it is handed received bytes and hands
//! back the bytes it wants sent, plus callbacks on [`Collaborator`] for the
//! few decisions that depend on the embedding environment (address
//! resolution, the clock, randomness, and delivering a finished transaction
//! to a waiting local client).

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};

use kvmesh_net::hwaddr::HwAddr;
use kvmesh_net::peer::{NetAddr, PeerTable};
use kvmesh_net::store::{Provenance, Store};
use kvmesh_net::wire::{self, Message};

use crate::merge;
use crate::push::schedule_push;
use crate::role::{Mode, RoleController};
use crate::transaction::{Transaction, TransactionTable, TxnEvent};

/// Everything the core needs from the embedding binary but cannot decide
/// for itself: address resolution, time, randomness, and finishing a local
/// client's request.
pub trait Collaborator {
    fn resolve_hwaddr_v4(&self, interface: &str, addr: Ipv4Addr) -> Option<HwAddr>;
    fn resolve_hwaddr_v6(&self, addr: Ipv6Addr) -> Option<HwAddr>;
    fn is_own_address(&self, addr: IpAddr) -> bool;
    fn now(&self) -> Instant;
    fn random_tx_id(&mut self) -> u16;
    fn unix_sock_req_data_finish(&mut self, txn: Transaction);
    fn changed_data_type(&mut self, data_type: u8);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Peer(HwAddr),
    Broadcast,
}

/// One datagram the collaborator should send, and where.
#[derive(Clone, Debug)]
pub struct Outbound {
    pub interface: String,
    pub destination: Destination,
    pub bytes: Bytes,
}

impl Outbound {
    fn from_batch(interface: &str, destination: Destination, batch: crate::push::PushBatch) -> Vec<Outbound> {
        let mut out: Vec<Outbound> = batch
            .fragments
            .into_iter()
            .map(|bytes| Outbound {
                interface: interface.to_string(),
                destination,
                bytes,
            })
            .collect();
        if let Some(bytes) = batch.terminator {
            out.push(Outbound {
                interface: interface.to_string(),
                destination,
                bytes,
            });
        }
        out
    }
}

pub struct Core {
    store: Store,
    transactions: TransactionTable,
    peers: HashMap<String, PeerTable>,
    role: RoleController,
    staleness: Duration,
}

impl Core {
    pub fn new(mode: Mode, staleness: Duration) -> Self {
        Core {
            store: Store::new(),
            transactions: TransactionTable::new(),
            peers: HashMap::new(),
            role: RoleController::new(mode),
            staleness,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn peers(&self, interface: &str) -> Option<&PeerTable> {
        self.peers.get(interface)
    }

    pub fn mode(&self) -> Mode {
        self.role.mode()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.role.set_mode(mode);
    }

    pub fn set_best_server(&mut self, server: Option<HwAddr>) {
        self.role.set_best_server(server);
    }

    pub fn put_local(&mut self, data_type: u8, src_hwaddr: HwAddr, version: u8, payload: Bytes, now: Instant) {
        self.store.put_local(data_type, src_hwaddr, version, payload, now);
    }

    /// Parse and dispatch one inbound datagram.
    pub fn recv_packet<C: Collaborator>(
        &mut self,
        collaborator: &mut C,
        interface: &str,
        bytes: &[u8],
        source: IpAddr,
    ) -> Vec<Outbound> {
        if collaborator.is_own_address(source) {
            trace!(%source, "dropping our own packet");
            return Vec::new();
        }

        let sender = match source {
            IpAddr::V4(addr) => collaborator.resolve_hwaddr_v4(interface, addr),
            IpAddr::V6(addr) => {
                if HwAddr::from_link_local_eui64(&addr).is_none() {
                    trace!(%source, "dropping non-eui64 v6 source");
                    return Vec::new();
                }
                collaborator.resolve_hwaddr_v6(addr)
            }
        };
        let Some(sender) = sender else {
            trace!(%source, "dropping packet from unresolvable sender");
            return Vec::new();
        };

        let Some(message) = wire::parse(bytes) else {
            trace!(%source, "dropping unparseable datagram");
            return Vec::new();
        };

        let now = collaborator.now();
        match message {
            Message::AnnounceMaster => {
                let net_addr = match source {
                    IpAddr::V4(addr) => NetAddr::V4(addr),
                    IpAddr::V6(addr) => NetAddr::V6(addr),
                };
                self.peers.entry(interface.to_string()).or_default().on_announce(sender, net_addr, now);
                Vec::new()
            }
            Message::Request { requested_type, tx_id } => {
                let batch = schedule_push(&self.store, Provenance::Synced, Some(requested_type), tx_id);
                Outbound::from_batch(interface, Destination::Peer(sender), batch)
            }
            Message::PushData { tx_id, seqno, records } => {
                let event = self.transactions.on_push(self.role.mode(), sender, tx_id, seqno, records, now);
                self.handle_txn_event(collaborator, event, now)
            }
            Message::StatusTxEnd { tx_id, seqno } => {
                let event = self.transactions.on_txend(self.role.mode(), sender, tx_id, seqno, now);
                self.handle_txn_event(collaborator, event, now)
            }
        }
    }

    fn handle_txn_event<C: Collaborator>(&mut self, collaborator: &mut C, event: TxnEvent, now: Instant) -> Vec<Outbound> {
        if let TxnEvent::Completed(txn) = event {
            let changed = merge::apply_transaction(&mut self.store, &txn, now);
            for data_type in changed {
                collaborator.changed_data_type(data_type);
            }
            if txn.client_socket.is_some() {
                collaborator.unix_sock_req_data_finish(txn);
            }
        }
        Vec::new()
    }

    /// Broadcast `AnnounceMaster` on every interface with a known peer, if
    /// this node is currently a master.
    pub fn announce_master(&self) -> Vec<Outbound> {
        if !self.role.is_master() {
            return Vec::new();
        }
        self.peers
            .keys()
            .map(|interface| Outbound {
                interface: interface.clone(),
                destination: Destination::Broadcast,
                bytes: wire::encode_announce_master(),
            })
            .collect()
    }

    /// Push `FirstHand`-or-better datasets to every known peer on every
    /// interface, each with a freshly randomised `tx_id`.
    pub fn sync_data<C: Collaborator>(&self, collaborator: &mut C) -> Vec<Outbound> {
        let mut out = Vec::new();
        for (interface, table) in &self.peers {
            for peer in table.iter() {
                let tx_id = collaborator.random_tx_id();
                let batch = schedule_push(&self.store, Provenance::FirstHand, None, tx_id);
                out.extend(Outbound::from_batch(interface, Destination::Peer(peer.hwaddr), batch));
            }
        }
        out
    }

    /// Push this node's `Local` datasets up to the chosen best server, on
    /// whichever interface that peer was last heard on.
    pub fn push_local_data<C: Collaborator>(&self, collaborator: &mut C) -> Vec<Outbound> {
        let Some(best) = self.role.best_server() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (interface, table) in &self.peers {
            if table.get(&best).is_some() {
                let tx_id = collaborator.random_tx_id();
                let batch = schedule_push(&self.store, Provenance::Local, None, tx_id);
                out.extend(Outbound::from_batch(interface, Destination::Peer(best), batch));
            }
        }
        out
    }

    /// Discard transactions that have gone quiet for longer than the
    /// configured staleness threshold.
    pub fn transaction_sweep(&mut self, now: Instant) {
        let swept = self.transactions.tick(now, self.staleness);
        for txn in swept {
            debug!(peer = %txn.peer, tx_id = txn.tx_id, "swept stale transaction");
        }
    }
}
