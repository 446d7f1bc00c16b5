// Heads up! Before working on this file you should read the parts
// of RFC 4291, RFC 4862 and RFC 4861 that deal with address lifetimes,
// duplicate address detection and router solicitation.

use core::fmt;

use managed::ManagedSlice;

use super::event::{Event, EventQueue};
use super::registry::Registry;
use super::route::{Router, Routers};
use crate::config::{
    IFACE_MAX_IPV6_ADDR_COUNT, IFACE_MAX_IPV6_PREFIX_COUNT, IPV4_CONFIG_BLOCK_COUNT,
    IPV6_CONFIG_BLOCK_COUNT,
};
use crate::phy::{LinkError, LinkFlags, LinkLayer};
use crate::rand::Rand;
use crate::time::{Duration, Instant};
use crate::timer::TimerList;
use crate::wire::{EthernetAddress, IpAddress, IpVersion, Ipv4Address, Ipv6Address};

mod ipv4;
mod ipv6;

#[cfg(test)]
mod tests;

pub use self::ipv4::Ipv4Config;
pub use self::ipv6::{Ipv6Config, Prefix, PREFIX_INFINITE_LIFETIME};

const IPV6_ADDR_SLOTS: usize = IPV6_CONFIG_BLOCK_COUNT * IFACE_MAX_IPV6_ADDR_COUNT;
const IPV6_PREFIX_SLOTS: usize = IPV6_CONFIG_BLOCK_COUNT * IFACE_MAX_IPV6_PREFIX_COUNT;

/// Identifies one interface of an [InterfaceSet].
///
/// Handles are handed out by [InterfaceSet::add] in registration order; the first
/// interface added is the default one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterfaceHandle(usize);

impl InterfaceHandle {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of the interface in its set.
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Error returned by the address manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Every IPv4 or IPv6 configuration block is bound to another interface.
    NoConfigBlock,
    /// No free address, multicast, prefix, router, interface or callback slot.
    Exhausted,
    /// The interface, address or group does not exist.
    NotFound,
    /// The requested state is already in effect.
    Already,
    /// The link layer cannot do what was asked.
    NotSupported,
    /// The address is not valid for the operation.
    InvalidAddress,
    /// The link layer reported an error.
    Link(LinkError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoConfigBlock => write!(f, "no free configuration block"),
            Error::Exhausted => write!(f, "no free slot"),
            Error::NotFound => write!(f, "not found"),
            Error::Already => write!(f, "already in that state"),
            Error::NotSupported => write!(f, "not supported"),
            Error::InvalidAddress => write!(f, "invalid address"),
            Error::Link(err) => write!(f, "link error: {}", err),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

bitflags::bitflags! {
    /// Administrative and link state of an interface.
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Flags: u16 {
        /// Administratively up.
        const UP = 1 << 0;
        /// The link connects exactly two nodes.
        const POINT_TO_POINT = 1 << 1;
        /// Promiscuous reception is on.
        const PROMISC = 1 << 2;
        /// Left down by `post_init`.
        const NO_AUTO_START = 1 << 3;
        /// Power management suspended the device.
        const SUSPENDED = 1 << 4;
        /// Multicast packets are forwarded to other interfaces.
        const FORWARD_MULTICASTS = 1 << 5;
        /// No IPv6 neighbor discovery: no DAD, no router solicitation.
        const IPV6_NO_ND = 1 << 6;
        /// The carrier is present.
        const LOWER_UP = 1 << 7;
        /// The link waits for an external event, e.g. authentication.
        const DORMANT = 1 << 8;
        /// Operationally up.
        const RUNNING = 1 << 9;
    }
}

/// Operational state of an interface, in the sense of RFC 2863.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperState {
    #[default]
    Unknown,
    NotPresent,
    Down,
    LowerLayerDown,
    Testing,
    Dormant,
    Up,
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OperState::Unknown => write!(f, "unknown"),
            OperState::NotPresent => write!(f, "not-present"),
            OperState::Down => write!(f, "down"),
            OperState::LowerLayerDown => write!(f, "lower-layer-down"),
            OperState::Testing => write!(f, "testing"),
            OperState::Dormant => write!(f, "dormant"),
            OperState::Up => write!(f, "up"),
        }
    }
}

/// Compute the operational state from the administrative flags and device readiness.
pub(crate) fn oper_state_of(flags: Flags, device_ready: bool) -> OperState {
    if !flags.contains(Flags::UP) {
        OperState::Down
    } else if !device_ready {
        OperState::LowerLayerDown
    } else if !flags.contains(Flags::LOWER_UP) {
        OperState::Down
    } else if flags.contains(Flags::DORMANT) {
        OperState::Dormant
    } else {
        OperState::Up
    }
}

/// How an address was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddrType {
    Autoconf,
    Dhcp,
    Manual,
    /// A manual address that a DHCP lease may replace.
    Overridable,
}

/// Usability of a unicast address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddrState {
    /// Duplicate address detection is still running.
    Tentative,
    Preferred,
    /// The preferred lifetime ended. Existing traffic may continue.
    Deprecated,
}

/// A unicast address owned by an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IfAddr<A> {
    address: A,
    addr_type: AddrType,
    state: AddrState,
    is_infinite: bool,
    is_mesh_local: bool,
}

impl<A: Copy> IfAddr<A> {
    pub(crate) fn new(address: A, addr_type: AddrType, state: AddrState, is_infinite: bool) -> Self {
        IfAddr {
            address,
            addr_type,
            state,
            is_infinite,
            is_mesh_local: false,
        }
    }

    pub fn address(&self) -> A {
        self.address
    }

    pub fn addr_type(&self) -> AddrType {
        self.addr_type
    }

    pub fn state(&self) -> AddrState {
        self.state
    }

    /// Whether the address has no lifetime timer.
    pub fn is_infinite(&self) -> bool {
        self.is_infinite
    }

    /// Whether the address belongs to a mesh-local prefix.
    pub fn is_mesh_local(&self) -> bool {
        self.is_mesh_local
    }
}

/// A multicast group known to an interface.
///
/// A group exists from `maddr_add` to `maddr_rm`; membership is active only between
/// `maddr_join` and `maddr_leave`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct McastAddr<A> {
    address: A,
    is_joined: bool,
}

impl<A: Copy> McastAddr<A> {
    pub(crate) const fn new(address: A) -> Self {
        McastAddr {
            address,
            is_joined: false,
        }
    }

    pub fn address(&self) -> A {
        self.address
    }

    pub fn is_joined(&self) -> bool {
        self.is_joined
    }
}

/// Configuration of a network interface.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct Config {
    /// Link-layer address of the interface.
    ///
    /// Adding an interface fails if the address is not unicast.
    pub hardware_addr: EthernetAddress,

    /// What the link layer below the interface can do.
    pub link_flags: LinkFlags,

    /// Flags the interface starts with, e.g. `NO_AUTO_START` or `IPV6_NO_ND`.
    pub flags: Flags,

    /// Run duplicate address detection on new IPv6 addresses.
    pub dad_enabled: bool,

    /// Request IPv4 link-local autoconfiguration when the interface comes up, and
    /// fall back to link-local source addresses.
    pub ipv4_autoconf: bool,

    pub ipv4_ttl: u8,
    pub ipv4_mcast_ttl: u8,
    pub ipv6_hop_limit: u8,
    pub ipv6_mcast_hop_limit: u8,

    /// Base value of the neighbor reachable time.
    pub base_reachable_time: Duration,

    /// Random seed.
    ///
    /// The seed doesn't have to be cryptographically secure.
    pub random_seed: u64,
}

impl Config {
    pub fn new(hardware_addr: EthernetAddress) -> Self {
        Config {
            hardware_addr,
            link_flags: LinkFlags::default(),
            flags: Flags::empty(),
            dad_enabled: true,
            ipv4_autoconf: false,
            ipv4_ttl: 64,
            ipv4_mcast_ttl: 1,
            ipv6_hop_limit: 64,
            ipv6_mcast_hop_limit: 1,
            base_reachable_time: Duration::from_secs(30),
            random_seed: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(EthernetAddress([0x02, 0, 0, 0, 0, 1]))
    }
}

/// A network interface.
#[derive(Debug)]
pub struct Interface {
    handle: InterfaceHandle,
    config: Config,
    flags: Flags,
    oper_state: OperState,
    device_ready: bool,
    ipv4: Option<usize>,
    ipv6: Option<usize>,
    rand: Rand,
}

impl Interface {
    pub fn handle(&self) -> InterfaceHandle {
        self.handle
    }

    pub fn hardware_addr(&self) -> EthernetAddress {
        self.config.hardware_addr
    }

    pub fn link_flags(&self) -> LinkFlags {
        self.config.link_flags
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn oper_state(&self) -> OperState {
        self.oper_state
    }

    /// Whether the interface is administratively up.
    pub fn is_up(&self) -> bool {
        self.flags.contains(Flags::UP)
    }

    pub fn is_running(&self) -> bool {
        self.oper_state == OperState::Up
    }

    pub fn is_device_ready(&self) -> bool {
        self.device_ready
    }

    pub fn has_ipv4(&self) -> bool {
        self.ipv4.is_some()
    }

    pub fn has_ipv6(&self) -> bool {
        self.ipv6.is_some()
    }
}

/// Slot of an address or prefix inside the configuration block pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotKey {
    block: usize,
    index: usize,
}

/// The network interfaces of a node and everything they own.
///
/// Interfaces are stored in a slice provided at creation. IPv4 and IPv6
/// configuration blocks, routers and timers come from fixed pools sized in
/// [config](../config/index.html).
#[derive(Debug)]
pub struct InterfaceSet<'a> {
    interfaces: ManagedSlice<'a, Option<Interface>>,
    ipv4_blocks: [Ipv4Config; IPV4_CONFIG_BLOCK_COUNT],
    ipv6_blocks: [Ipv6Config; IPV6_CONFIG_BLOCK_COUNT],
    routers: Routers,
    address_timers: TimerList<SlotKey, IPV6_ADDR_SLOTS>,
    dad_timers: TimerList<SlotKey, IPV6_ADDR_SLOTS>,
    prefix_timers: TimerList<SlotKey, IPV6_PREFIX_SLOTS>,
    rs_timers: TimerList<usize, IPV6_CONFIG_BLOCK_COUNT>,
    events: EventQueue,
    registry: Registry,
}

impl<'a> InterfaceSet<'a> {
    /// Create an interface set using the provided storage.
    pub fn new<InterfacesT>(interfaces: InterfacesT) -> InterfaceSet<'a>
    where
        InterfacesT: Into<ManagedSlice<'a, Option<Interface>>>,
    {
        let mut interfaces = interfaces.into();
        for slot in interfaces.iter_mut() {
            *slot = None;
        }
        InterfaceSet {
            interfaces,
            ipv4_blocks: core::array::from_fn(|_| Ipv4Config::new()),
            ipv6_blocks: core::array::from_fn(|_| Ipv6Config::new()),
            routers: Routers::new(),
            address_timers: TimerList::new(),
            dad_timers: TimerList::new(),
            prefix_timers: TimerList::new(),
            rs_timers: TimerList::new(),
            events: EventQueue::default(),
            registry: Registry::default(),
        }
    }

    /// Register an interface and return its handle.
    ///
    /// The interface starts administratively down with its carrier on.
    pub fn add(&mut self, config: Config) -> Result<InterfaceHandle, Error> {
        if !config.hardware_addr.is_unicast() {
            net_debug!("refusing interface with address {}", config.hardware_addr);
            return Err(Error::InvalidAddress);
        }

        let index = match self.interfaces.iter().position(Option::is_none) {
            Some(index) => index,
            None => match &mut self.interfaces {
                ManagedSlice::Borrowed(_) => {
                    net_debug!("no free interface slot");
                    return Err(Error::Exhausted);
                }
                #[cfg(feature = "alloc")]
                ManagedSlice::Owned(interfaces) => {
                    interfaces.push(None);
                    interfaces.len() - 1
                }
            },
        };

        let handle = InterfaceHandle::new(index);
        let mut flags = config.flags | Flags::LOWER_UP;
        if config.link_flags.contains(LinkFlags::POINT_TO_POINT) {
            flags.insert(Flags::POINT_TO_POINT);
        }
        flags.remove(Flags::UP | Flags::RUNNING);

        net_trace!("[{}]: adding interface {}", handle, config.hardware_addr);
        self.interfaces[index] = Some(Interface {
            handle,
            config,
            flags,
            oper_state: oper_state_of(flags, true),
            device_ready: true,
            ipv4: None,
            ipv6: None,
            rand: Rand::new(config.random_seed),
        });
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> + '_ {
        self.interfaces.iter().filter_map(Option::as_ref)
    }

    fn handles(&self) -> impl Iterator<Item = InterfaceHandle> + '_ {
        self.iter().map(Interface::handle)
    }

    /// `handle` alone, or every interface when `None`.
    fn scoped(&self, handle: Option<InterfaceHandle>) -> impl Iterator<Item = InterfaceHandle> + '_ {
        self.handles()
            .filter(move |h| handle.map_or(true, |handle| handle == *h))
    }

    pub fn get(&self, handle: InterfaceHandle) -> Option<&Interface> {
        self.interfaces.get(handle.0).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, handle: InterfaceHandle) -> Option<&mut Interface> {
        self.interfaces.get_mut(handle.0).and_then(Option::as_mut)
    }

    fn iface(&self, handle: InterfaceHandle) -> Result<&Interface, Error> {
        self.get(handle).ok_or(Error::NotFound)
    }

    fn iface_mut(&mut self, handle: InterfaceHandle) -> Result<&mut Interface, Error> {
        self.get_mut(handle).ok_or(Error::NotFound)
    }

    /// The first registered interface.
    pub fn default_iface(&self) -> Option<InterfaceHandle> {
        self.handles().next()
    }

    pub fn by_hardware_addr(&self, hardware_addr: &EthernetAddress) -> Option<InterfaceHandle> {
        self.iter()
            .find(|iface| iface.hardware_addr() == *hardware_addr)
            .map(Interface::handle)
    }

    pub fn routers(&self) -> &Routers {
        &self.routers
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Take the oldest pending management event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop()
    }

    /// Bring the interface administratively up.
    ///
    /// The link layer is enabled first; if it refuses, the interface stays down.
    pub fn up<L>(&mut self, now: Instant, handle: InterfaceHandle, link: &mut L) -> Result<(), Error>
    where
        L: LinkLayer + ?Sized,
    {
        if self.iface(handle)?.is_up() {
            return Ok(());
        }

        link.enable(handle, true).map_err(|err| {
            net_debug!("[{}]: cannot enable link: {}", handle, err);
            Error::Link(err)
        })?;

        self.iface_mut(handle)?.flags.insert(Flags::UP);
        self.events.push(Event::AdminUp { iface: handle });
        self.update_oper_state(now, handle);
        Ok(())
    }

    /// Bring the interface administratively down.
    pub fn down<L>(&mut self, now: Instant, handle: InterfaceHandle, link: &mut L) -> Result<(), Error>
    where
        L: LinkLayer + ?Sized,
    {
        if !self.iface(handle)?.is_up() {
            return Ok(());
        }

        link.enable(handle, false).map_err(|err| {
            net_debug!("[{}]: cannot disable link: {}", handle, err);
            Error::Link(err)
        })?;

        self.iface_mut(handle)?.flags.remove(Flags::UP);
        self.events.push(Event::AdminDown { iface: handle });
        self.update_oper_state(now, handle);
        Ok(())
    }

    /// Bring up every interface not flagged `NO_AUTO_START`.
    ///
    /// Failures are logged and do not stop the remaining interfaces.
    pub fn post_init<L>(&mut self, now: Instant, link: &mut L)
    where
        L: LinkLayer + ?Sized,
    {
        for index in 0..self.interfaces.len() {
            let handle = InterfaceHandle::new(index);
            match self.get(handle) {
                Some(iface) if !iface.flags.contains(Flags::NO_AUTO_START) => {}
                _ => continue,
            }
            if let Err(_err) = self.up(now, handle, link) {
                net_debug!("[{}]: cannot bring up: {}", handle, _err);
            }
        }
    }

    fn change_flags(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        f: impl FnOnce(&mut Interface),
    ) -> Result<(), Error> {
        f(self.iface_mut(handle)?);
        self.update_oper_state(now, handle);
        Ok(())
    }

    pub fn carrier_on(&mut self, now: Instant, handle: InterfaceHandle) -> Result<(), Error> {
        self.change_flags(now, handle, |iface| iface.flags.insert(Flags::LOWER_UP))
    }

    pub fn carrier_off(&mut self, now: Instant, handle: InterfaceHandle) -> Result<(), Error> {
        self.change_flags(now, handle, |iface| iface.flags.remove(Flags::LOWER_UP))
    }

    pub fn dormant_on(&mut self, now: Instant, handle: InterfaceHandle) -> Result<(), Error> {
        self.change_flags(now, handle, |iface| iface.flags.insert(Flags::DORMANT))
    }

    pub fn dormant_off(&mut self, now: Instant, handle: InterfaceHandle) -> Result<(), Error> {
        self.change_flags(now, handle, |iface| iface.flags.remove(Flags::DORMANT))
    }

    /// Record whether the device driver below the interface is ready.
    pub fn set_device_ready(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        ready: bool,
    ) -> Result<(), Error> {
        self.change_flags(now, handle, |iface| iface.device_ready = ready)
    }

    pub fn suspend(&mut self, handle: InterfaceHandle) -> Result<(), Error> {
        let iface = self.iface_mut(handle)?;
        if iface.flags.contains(Flags::SUSPENDED) {
            return Err(Error::Already);
        }
        iface.flags.insert(Flags::SUSPENDED);
        Ok(())
    }

    pub fn resume(&mut self, handle: InterfaceHandle) -> Result<(), Error> {
        let iface = self.iface_mut(handle)?;
        if !iface.flags.contains(Flags::SUSPENDED) {
            return Err(Error::Already);
        }
        iface.flags.remove(Flags::SUSPENDED);
        Ok(())
    }

    pub fn is_suspended(&self, handle: InterfaceHandle) -> bool {
        self.get(handle)
            .map_or(false, |iface| iface.flags.contains(Flags::SUSPENDED))
    }

    /// Switch the link to promiscuous reception.
    pub fn set_promisc<L>(&mut self, handle: InterfaceHandle, link: &mut L) -> Result<(), Error>
    where
        L: LinkLayer + ?Sized,
    {
        let iface = self.iface(handle)?;
        if !iface.link_flags().contains(LinkFlags::PROMISC_MODE) {
            return Err(Error::NotSupported);
        }
        if iface.flags.contains(Flags::PROMISC) {
            return Err(Error::Already);
        }

        link.set_promisc(handle, true).map_err(|err| match err {
            LinkError::Unsupported => Error::NotSupported,
            err => Error::Link(err),
        })?;
        self.iface_mut(handle)?.flags.insert(Flags::PROMISC);
        Ok(())
    }

    /// Leave promiscuous reception. Does nothing if it is off.
    pub fn unset_promisc<L>(&mut self, handle: InterfaceHandle, link: &mut L) -> Result<(), Error>
    where
        L: LinkLayer + ?Sized,
    {
        if !self.iface(handle)?.flags.contains(Flags::PROMISC) {
            return Ok(());
        }

        link.set_promisc(handle, false).map_err(|err| match err {
            LinkError::Unsupported => Error::NotSupported,
            err => Error::Link(err),
        })?;
        self.iface_mut(handle)?.flags.remove(Flags::PROMISC);
        Ok(())
    }

    pub fn is_promisc(&self, handle: InterfaceHandle) -> bool {
        self.get(handle)
            .map_or(false, |iface| iface.flags.contains(Flags::PROMISC))
    }

    /// Recompute the operational state and run the transition into or out of `Up`.
    ///
    /// Nothing happens when the state did not change.
    fn update_oper_state(&mut self, now: Instant, handle: InterfaceHandle) {
        let Some(iface) = self.get_mut(handle) else {
            return;
        };
        let old = iface.oper_state;
        let new = oper_state_of(iface.flags, iface.device_ready);
        if old == new {
            return;
        }

        net_debug!("[{}]: oper state {} -> {}", handle, old, new);
        iface.oper_state = new;

        if new == OperState::Up {
            iface.flags.insert(Flags::RUNNING);
            let ipv4_autoconf = iface.config.ipv4_autoconf;
            self.events.push(Event::OperUp { iface: handle });

            self.ipv6_iface_up(now, handle);
            if ipv4_autoconf {
                self.events.push(Event::Ipv4AutoconfStart { iface: handle });
            }
        } else if old == OperState::Up {
            iface.flags.remove(Flags::RUNNING);
            let ipv4_autoconf = iface.config.ipv4_autoconf;
            self.events.push(Event::OperDown { iface: handle });

            self.ipv4_leave_all(handle);
            self.ipv6_iface_down(handle);
            if ipv4_autoconf {
                self.events.push(Event::Ipv4AutoconfReset { iface: handle });
            }
        }
    }

    /// Add an IPv6 router. A non-zero `lifetime` makes it a default router with a
    /// lifetime in seconds; zero adds a permanent, non-default router.
    pub fn ipv6_router_add(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        addr: Ipv6Address,
        lifetime: u16,
    ) -> Result<Router, Error> {
        self.router_add(now, handle, IpAddress::Ipv6(addr), lifetime > 0, lifetime)
    }

    /// Add an IPv4 router, with a lifetime in seconds or zero for a permanent one.
    pub fn ipv4_router_add(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        addr: Ipv4Address,
        is_default: bool,
        lifetime: u16,
    ) -> Result<Router, Error> {
        self.router_add(now, handle, IpAddress::Ipv4(addr), is_default, lifetime)
    }

    fn router_add(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        addr: IpAddress,
        is_default: bool,
        lifetime: u16,
    ) -> Result<Router, Error> {
        self.iface(handle)?;
        let (router, is_new) = self
            .routers
            .add(now, handle, addr, is_default, lifetime)
            .ok_or_else(|| {
                net_debug!("[{}]: no free router slot for {}", handle, addr);
                Error::Exhausted
            })?;
        if is_new {
            self.events.push(Event::RouterAdded {
                iface: handle,
                addr,
            });
        }
        Ok(router)
    }

    pub fn router_lookup(&self, handle: InterfaceHandle, addr: &IpAddress) -> Option<&Router> {
        self.routers.lookup(handle, addr)
    }

    /// The first default router of the family, optionally on one interface only.
    pub fn router_find_default(
        &self,
        handle: Option<InterfaceHandle>,
        version: IpVersion,
    ) -> Option<&Router> {
        self.routers.find_default(handle, version)
    }

    /// Restart the lifetime of a router. Zero makes it permanent.
    pub fn router_update_lifetime(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        addr: &IpAddress,
        lifetime: u16,
    ) -> bool {
        self.routers.update_lifetime(now, handle, addr, lifetime)
    }

    pub fn router_rm(&mut self, handle: InterfaceHandle, addr: &IpAddress) -> bool {
        match self.routers.remove(handle, addr) {
            Some(router) => {
                self.events.push(Event::RouterRemoved {
                    iface: handle,
                    addr: router.address(),
                });
                true
            }
            None => false,
        }
    }

    fn routers_flush(&mut self, handle: InterfaceHandle, version: IpVersion) {
        let events = &mut self.events;
        self.routers.remove_iface(handle, version, |router| {
            events.push(Event::RouterRemoved {
                iface: handle,
                addr: router.address(),
            })
        });
    }

    /// Pick the interface to send to `dst` from.
    pub fn select_src_iface(&self, dst: &IpAddress) -> Option<InterfaceHandle> {
        match dst {
            IpAddress::Ipv4(dst) => self.ipv4_select_src_iface(dst),
            IpAddress::Ipv6(dst) => self.ipv6_select_src_iface(dst),
        }
    }

    /// Run every timer that expired at or before `now`.
    ///
    /// Returns whether anything changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        let mut changed = false;

        while let Some(router) = self.routers.pop_expired(now) {
            self.events.push(Event::RouterRemoved {
                iface: router.iface(),
                addr: router.address(),
            });
            changed = true;
        }

        changed |= self.poll_ipv6(now);
        changed
    }

    /// The earliest moment [poll](#method.poll) has work to do.
    pub fn poll_at(&self) -> Option<Instant> {
        [
            self.routers.poll_at(),
            self.address_timers.poll_at(),
            self.dad_timers.poll_at(),
            self.prefix_timers.poll_at(),
            self.rs_timers.poll_at(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// How long the caller may wait before calling [poll](#method.poll).
    pub fn poll_delay(&self, now: Instant) -> Option<Duration> {
        self.poll_at().map(|at| now.until(at))
    }
}
