#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

//! The _netif_ library keeps the bookkeeping of an embedded IP stack's network
//! interfaces: which addresses, multicast groups, prefixes and routers each interface
//! owns, how IPv4 next hops resolve to Ethernet addresses, and which addresses a small
//! DHCPv4 server has leased to whom.
//!
//! # Design
//!
//! The library does not own a clock, a thread or a socket. Every operation that depends
//! on time takes the current [Instant](time/struct.Instant.html), and every subsystem
//! with timers exposes a `poll(now)` method together with a `poll_at()` method returning
//! the nearest deadline. The caller drives them from whatever scheduler it has.
//!
//! State is split into three independently borrowed domains:
//!
//!  * [InterfaceSet](iface/struct.InterfaceSet.html), the per-interface address,
//!    multicast, prefix and router tables with their lifetime, DAD and router
//!    solicitation timers;
//!  * [ArpCache](iface/struct.ArpCache.html), the IPv4 neighbor cache and the queue of
//!    packets waiting for resolution;
//!  * [Servers](dhcpv4/struct.Servers.html), the DHCPv4 server instances and their
//!    lease slots.
//!
//! Frames leave through a [LinkLayer](phy/trait.LinkLayer.html) borrowed separately
//! from those tables.
//!
//! # Feature flags
//!
//!  * `std`: use the standard library; implies `alloc`.
//!  * `alloc`: allow storage to be backed by owned, growable collections.
//!  * `log`: emit trace and debug messages through the `log` crate.
//!  * `defmt`: emit trace and debug messages through `defmt`, and implement
//!    `defmt::Format` for public types.
//!
//! # Configuration
//!
//! Pool capacities are fixed at compile time. They are read from environment variables
//! prefixed with `NETIF_` when the crate is built, for example `NETIF_ARP_TABLE_SIZE=8`.
//! See the [config](config/index.html) module for the full list and defaults.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("You must enable at most one of the following features: defmt, log");

#[macro_use]
mod macros;
mod rand;

pub mod config {
    //! Compile-time capacities of the fixed-size pools.
    #![allow(unused)]
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

pub mod dhcpv4;
pub mod iface;
pub mod phy;
pub mod time;
pub mod timer;
pub mod wire;
