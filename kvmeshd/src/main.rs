//! Thin wiring: UDP sockets, a `mio` poll loop, and a `Collaborator` over
//! `std::net`, so the protocol core in `kvmesh-net`/`kvmesh-txn` has
//! something to actually run against. Production-grade supervision
//! (hot reload, multi-process, metrics export) is out of scope — this
//! binary exists to exercise the core end to end, not to replace it.

mod collaborator;
mod config;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::time::{Duration, Instant};

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use kvmesh_base::Result;
use kvmesh_txn::Core;

use collaborator::StdCollaborator;
use config::Config;

/// This protocol's fixed well-known port.
const PORT: u16 = 7060;
/// Administratively-scoped multicast group carrying `AnnounceMaster`.
const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 5, 5, 42);

const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(10);
const SYNC_INTERVAL: Duration = Duration::from_secs(5);
const PUSH_LOCAL_INTERVAL: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

const MAX_DATAGRAM: usize = kvmesh_net::wire::MAX_PAYLOAD;

fn main() -> Result<()> {
    let config = config::parse_args(std::env::args().skip(1))?;
    kvmesh_base::init_default(&config.log_filter);

    let mut core = Core::new(config.mode, config.staleness);
    let mut collaborator = StdCollaborator::new(config.own_addrs.clone(), 0x5eed_1234);

    let (mut poll, mut sockets, mut tokens) = bind_sockets(&config)?;
    run_event_loop(&mut core, &mut collaborator, &mut poll, &mut sockets, &mut tokens)
}

/// Bind one UDP socket per configured interface, joined to the multicast
/// group, and register each with a `mio::Poll`.
///
/// Binding several interfaces to the same well-known port needs
/// `SO_REUSEADDR`, which `std::net::UdpSocket` does not expose; `socket2`
/// supplies it, then hands the result back as a plain `std::net::UdpSocket`
/// for `mio` to take non-blocking ownership of.
fn bind_sockets(config: &Config) -> Result<(Poll, HashMap<Token, MioUdpSocket>, HashMap<Token, String>)> {
    let poll = Poll::new().map_err(kvmesh_base::Error::new)?;
    let mut sockets = HashMap::new();
    let mut interfaces = HashMap::new();

    for (index, interface) in config.interfaces.iter().enumerate() {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(kvmesh_base::Error::new)?;
        socket.set_reuse_address(true).map_err(kvmesh_base::Error::new)?;
        let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, PORT).into();
        socket.bind(&bind_addr.into()).map_err(kvmesh_base::Error::new)?;
        socket.set_nonblocking(true).map_err(kvmesh_base::Error::new)?;

        let std_socket: StdUdpSocket = socket.into();
        std_socket
            .join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)
            .map_err(kvmesh_base::Error::new)?;

        let mut mio_socket = MioUdpSocket::from_std(std_socket);
        let token = Token(index);
        poll.registry()
            .register(&mut mio_socket, token, Interest::READABLE)
            .map_err(kvmesh_base::Error::new)?;

        info!(%interface, ?token, "bound UDP socket");
        sockets.insert(token, mio_socket);
        interfaces.insert(token, interface.clone());
    }

    Ok((poll, sockets, interfaces))
}

/// The single-threaded cooperative loop the core is driven by: alternate
/// between readable-socket callbacks and timer-driven periodic triggers,
/// never blocking beyond the next scheduled deadline.
fn run_event_loop(
    core: &mut Core,
    collaborator: &mut StdCollaborator,
    poll: &mut Poll,
    sockets: &mut HashMap<Token, MioUdpSocket>,
    tokens: &mut HashMap<Token, String>,
) -> Result<()> {
    let mut events = Events::with_capacity(tokens.len().max(1));
    let mut buf = [0u8; MAX_DATAGRAM];

    let mut next_announce = Instant::now();
    let mut next_sync = Instant::now();
    let mut next_push_local = Instant::now();
    let mut next_sweep = Instant::now();

    loop {
        let now = Instant::now();
        let next_deadline = [next_announce, next_sync, next_push_local, next_sweep]
            .into_iter()
            .min()
            .expect("four deadlines");
        let timeout = next_deadline.saturating_duration_since(now);

        poll.poll(&mut events, Some(timeout)).map_err(kvmesh_base::Error::new)?;

        for event in events.iter() {
            let token = event.token();
            let Some(interface) = tokens.get(&token).cloned() else {
                warn!(?token, "event for unknown token");
                continue;
            };
            loop {
                let Some(socket) = sockets.get(&token) else {
                    break;
                };
                match socket.recv_from(&mut buf) {
                    Ok((len, source)) => {
                        let outbound = core.recv_packet(collaborator, &interface, &buf[..len], source.ip());
                        for broken in send_all(core, sockets, tokens, &outbound) {
                            teardown_interface(poll, sockets, tokens, &broken);
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!(%interface, error = %e, "recv_from failed");
                        break;
                    }
                }
            }
        }

        let now = Instant::now();
        if now >= next_announce {
            let outbound = core.announce_master();
            for broken in send_all(core, sockets, tokens, &outbound) {
                teardown_interface(poll, sockets, tokens, &broken);
            }
            next_announce = now + ANNOUNCE_INTERVAL;
        }
        if now >= next_sync {
            let outbound = core.sync_data(collaborator);
            for broken in send_all(core, sockets, tokens, &outbound) {
                teardown_interface(poll, sockets, tokens, &broken);
            }
            next_sync = now + SYNC_INTERVAL;
        }
        if now >= next_push_local {
            let outbound = core.push_local_data(collaborator);
            for broken in send_all(core, sockets, tokens, &outbound) {
                teardown_interface(poll, sockets, tokens, &broken);
            }
            next_push_local = now + PUSH_LOCAL_INTERVAL;
        }
        if now >= next_sweep {
            core.transaction_sweep(now);
            next_sweep = now + SWEEP_INTERVAL;
        }
    }
}

/// Send every outbound frame, returning the (deduplicated) interfaces whose
/// sockets failed with a permission-denied class error. A send failure of
/// that kind means the interface itself is no longer usable, not that the
/// daemon is broken: the caller tears down just that interface and the loop
/// keeps running the rest (SPEC_FULL.md §4.6/§5).
fn send_all(
    core: &Core,
    sockets: &HashMap<Token, MioUdpSocket>,
    tokens: &HashMap<Token, String>,
    outbound: &[kvmesh_txn::Outbound],
) -> Vec<String> {
    let mut broken = Vec::new();
    for frame in outbound {
        let Some(token) = tokens.iter().find(|(_, iface)| *iface == &frame.interface).map(|(t, _)| *t) else {
            continue;
        };
        let Some(socket) = sockets.get(&token) else {
            continue;
        };
        let dest: SocketAddr = match frame.destination {
            kvmesh_txn::Destination::Broadcast => (MULTICAST_GROUP, PORT).into(),
            kvmesh_txn::Destination::Peer(hwaddr) => {
                let Some(peer) = core.peers(&frame.interface).and_then(|table| table.get(&hwaddr)) else {
                    warn!(interface = %frame.interface, "dropping reply to peer missing from the peer table");
                    continue;
                };
                match peer.address {
                    kvmesh_net::peer::NetAddr::V4(addr) => (addr, PORT).into(),
                    kvmesh_net::peer::NetAddr::V6(addr) => (addr, PORT).into(),
                }
            }
        };
        if let Err(e) = socket.send_to(&frame.bytes, dest) {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                warn!(interface = %frame.interface, error = %e, "interface is no longer usable");
                if !broken.iter().any(|iface: &String| iface == &frame.interface) {
                    broken.push(frame.interface.clone());
                }
                continue;
            }
            warn!(interface = %frame.interface, error = %e, "send_to failed");
        }
    }
    broken
}

/// Deregister and drop `interface`'s socket, and forget its token, so the
/// rest of the event loop continues without it. The collaborator is
/// expected to reopen the interface (e.g. after an operator fixes whatever
/// revoked its permissions); this daemon does not retry on its own.
fn teardown_interface(poll: &mut Poll, sockets: &mut HashMap<Token, MioUdpSocket>, tokens: &mut HashMap<Token, String>, interface: &str) {
    let Some(token) = tokens.iter().find(|(_, iface)| iface.as_str() == interface).map(|(t, _)| *t) else {
        return;
    };
    if let Some(mut socket) = sockets.remove(&token) {
        if let Err(e) = poll.registry().deregister(&mut socket) {
            warn!(interface, error = %e, "failed to deregister torn-down interface's socket");
        }
    }
    tokens.remove(&token);
    warn!(interface, "interface torn down after a fatal send failure; will not be retried until restarted");
}
