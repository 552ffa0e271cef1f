//! [`kvmesh_txn::Collaborator`] implemented against `std::net` and the
//! handful of OS facilities this daemon actually needs.

use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use kvmesh_net::HwAddr;
use kvmesh_txn::{Collaborator, Transaction};
use tracing::{info, warn};

/// A small xorshift generator: good enough for randomising `tx_id`s, and
/// avoids pulling in a full `rand` dependency for one call site.
struct XorShiftRng(u64);

impl XorShiftRng {
    fn next_u16(&mut self) -> u16 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x >> 32) as u16
    }
}

pub struct StdCollaborator {
    own_addrs: HashSet<IpAddr>,
    rng: XorShiftRng,
}

impl StdCollaborator {
    pub fn new(own_addrs: Vec<IpAddr>, rng_seed: u64) -> Self {
        StdCollaborator {
            own_addrs: own_addrs.into_iter().collect(),
            // xorshift requires a nonzero state.
            rng: XorShiftRng(rng_seed | 1),
        }
    }
}

impl Collaborator for StdCollaborator {
    fn resolve_hwaddr_v4(&self, _interface: &str, addr: Ipv4Addr) -> Option<HwAddr> {
        resolve_via_proc_net_arp(addr)
    }

    fn resolve_hwaddr_v6(&self, addr: Ipv6Addr) -> Option<HwAddr> {
        HwAddr::from_link_local_eui64(&addr)
    }

    fn is_own_address(&self, addr: IpAddr) -> bool {
        self.own_addrs.contains(&addr)
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_tx_id(&mut self) -> u16 {
        self.rng.next_u16()
    }

    fn unix_sock_req_data_finish(&mut self, txn: Transaction) {
        // No local-client socket is wired up in this thin daemon (the
        // Unix-domain client protocol is out of scope); a transaction that
        // somehow carries a client handle here has nowhere to go.
        warn!(peer = %txn.peer, tx_id = txn.tx_id, "completed transaction had a client handle but no client interface is wired up");
    }

    fn changed_data_type(&mut self, data_type: u8) {
        info!(data_type, "dataset changed");
    }
}

/// Look up `addr`'s hardware address in the kernel's neighbour table via
/// `/proc/net/arp`. Linux-only, like the legacy deployment this protocol
/// originates from.
fn resolve_via_proc_net_arp(addr: Ipv4Addr) -> Option<HwAddr> {
    let contents = fs::read_to_string("/proc/net/arp").ok()?;
    for line in contents.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let ip: Ipv4Addr = fields.next()?.parse().ok()?;
        if ip != addr {
            continue;
        }
        let hwaddr_field = fields.nth(2)?; // IP, HW type, Flags, then HW address
        return parse_colon_hex(hwaddr_field);
    }
    None
}

fn parse_colon_hex(s: &str) -> Option<HwAddr> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut bytes {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(HwAddr::new(bytes))
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn parses_colon_hex_mac() {
        assert_eq!(
            parse_colon_hex("02:11:22:33:44:55"),
            Some(HwAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]))
        );
    }

    #[test]
    fn rejects_malformed_mac() {
        assert_eq!(parse_colon_hex("not-a-mac"), None);
        assert_eq!(parse_colon_hex("02:11:22:33:44"), None);
    }

    #[test]
    fn own_address_membership() {
        let collaborator = StdCollaborator::new(vec!["10.0.0.1".parse().unwrap()], 1);
        assert!(collaborator.is_own_address("10.0.0.1".parse().unwrap()));
        assert!(!collaborator.is_own_address("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn rng_is_deterministic_for_a_fixed_seed() {
        let mut a = XorShiftRng(42);
        let mut b = XorShiftRng(42);
        assert_eq!(a.next_u16(), b.next_u16());
    }
}
