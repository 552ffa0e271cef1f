//! The per-interface table of known peers, populated by inbound
//! `AnnounceMaster` messages.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use crate::hwaddr::HwAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetAddr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

#[derive(Clone, Debug)]
pub struct Peer {
    pub hwaddr: HwAddr,
    pub address: NetAddr,
    /// Carried opaquely; this crate never reads it. See spec Non-goals.
    pub tq: u8,
    pub last_seen: Instant,
}

/// Peers heard from on one interface.
#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<HwAddr, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or refresh) a peer in response to an `AnnounceMaster`.
    pub fn on_announce(&mut self, hwaddr: HwAddr, address: NetAddr, now: Instant) {
        match self.peers.get_mut(&hwaddr) {
            Some(peer) => {
                peer.address = address;
                peer.last_seen = now;
            }
            None => {
                self.peers.insert(
                    hwaddr,
                    Peer {
                        hwaddr,
                        address,
                        tq: 0,
                        last_seen: now,
                    },
                );
            }
        }
    }

    pub fn get(&self, hwaddr: &HwAddr) -> Option<&Peer> {
        self.peers.get(hwaddr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;
    use test_log::test;

    fn addr() -> NetAddr {
        NetAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    #[test]
    fn first_announce_creates_peer() {
        let mut table = PeerTable::new();
        let mac = HwAddr::new([1, 2, 3, 4, 5, 6]);
        let t0 = Instant::now();
        table.on_announce(mac, addr(), t0);
        let peer = table.get(&mac).expect("peer present");
        assert_eq!(peer.hwaddr, mac);
        assert_eq!(peer.tq, 0);
        assert_eq!(peer.last_seen, t0);
    }

    #[test]
    fn subsequent_announce_refreshes_last_seen() {
        let mut table = PeerTable::new();
        let mac = HwAddr::new([1, 2, 3, 4, 5, 6]);
        let t0 = Instant::now();
        table.on_announce(mac, addr(), t0);
        let t1 = t0 + Duration::from_secs(30);
        table.on_announce(mac, addr(), t1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&mac).unwrap().last_seen, t1);
    }
}
