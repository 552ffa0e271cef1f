//! 6-byte hardware addresses, the identity every dataset, peer and
//! transaction in this crate is ultimately keyed by.

use std::fmt;
use std::net::Ipv6Addr;

pub const HWADDR_LEN: usize = 6;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HwAddr([u8; HWADDR_LEN]);

impl HwAddr {
    pub const fn new(bytes: [u8; HWADDR_LEN]) -> Self {
        HwAddr(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HWADDR_LEN] {
        &self.0
    }

    /// Reconstruct the hardware address embedded in a link-local EUI-64
    /// IPv6 address, returning `None` if `addr` is not link-local or not
    /// in modified-EUI-64 form.
    pub fn from_link_local_eui64(addr: &Ipv6Addr) -> Option<HwAddr> {
        if !is_link_local(addr) {
            return None;
        }
        let id = &addr.octets()[8..16];
        if id[3] != 0xff || id[4] != 0xfe {
            return None;
        }
        Some(HwAddr([
            id[0] ^ 0x02,
            id[1],
            id[2],
            id[5],
            id[6],
            id[7],
        ]))
    }
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    // fe80::/10
    let segs = addr.segments();
    (segs[0] & 0xffc0) == 0xfe80
}

impl fmt::Debug for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn eui64_round_trip() {
        // 02:11:22:33:44:55 flipped to universal/local bit 00 for the
        // interface identifier, split around the ff:fe marker.
        let addr: Ipv6Addr = "fe80::11:22ff:fe33:4455".parse().unwrap();
        let mac = HwAddr::from_link_local_eui64(&addr).expect("eui64 address");
        assert_eq!(mac.as_bytes(), &[0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn rejects_non_link_local() {
        let addr: Ipv6Addr = "2001:db8::11:22ff:fe33:4455".parse().unwrap();
        assert!(HwAddr::from_link_local_eui64(&addr).is_none());
    }

    #[test]
    fn rejects_non_eui64() {
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        assert!(HwAddr::from_link_local_eui64(&addr).is_none());
    }

    #[test]
    fn display_is_colon_hex() {
        let mac = HwAddr::new([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(format!("{mac}"), "02:11:22:33:44:55");
    }
}
