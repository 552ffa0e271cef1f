pub mod hwaddr;
pub mod peer;
pub mod store;
pub mod wire;

pub use hwaddr::HwAddr;
pub use peer::{NetAddr, Peer, PeerTable};
pub use store::{Dataset, Provenance, Store};
pub use wire::{DataRecord, Message};
