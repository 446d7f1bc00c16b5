/*! Network interface bookkeeping.

The `iface` module keeps the state of the *network interfaces*: their administrative
and operational state, the IPv4 and IPv6 addresses, multicast groups, prefixes and
routers each of them owns, and the cache mapping IPv4 neighbors to hardware addresses.

[InterfaceSet](struct.InterfaceSet.html) and [ArpCache](struct.ArpCache.html) are
separate values so that address bookkeeping and neighbor resolution can be borrowed
independently of each other and of the link layer.
*/

mod arp;
mod event;
mod interface;
mod registry;
mod route;

pub use self::arp::{ArpCache, ArpError, ArpState, Prepared, ARP_REQUEST_TIMEOUT};
pub use self::event::Event;
pub use self::interface::{
    AddrState, AddrType, Config, Error, Flags, IfAddr, Interface, InterfaceHandle,
    InterfaceSet, Ipv4Config, Ipv6Config, McastAddr, OperState, Prefix,
    PREFIX_INFINITE_LIFETIME,
};
pub use self::registry::{
    CallbackId, LinkCallback, McastCallback, Registry, TimestampCallback,
};
pub use self::route::{Router, Routers};
