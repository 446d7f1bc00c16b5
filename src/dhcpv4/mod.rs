/*! A small DHCPv4 server.

Each [Server] hands out addresses from a contiguous pool on one interface. Every
address of the pool is a slot with a [LeaseState]; a slot moves from `Free` to
`Reserved` when it is offered, to `Allocated` when the client requests it, and back to
`Free` when the reservation or lease runs out or the client releases it. Addresses
found in use by someone else are `Declined` until an operator reclaims them.

Before offering an address the server can send an ICMP echo request to it, when
[ServerConfig::probe_timeout] is not zero. An answer marks the address declined and the
next free one is probed; silence until the timeout means the address is offered. Only
one probe is outstanding per server, and DISCOVER messages arriving meanwhile are
ignored.

Like the rest of this crate the server does no I/O of its own. Messages are handed to
[Servers::process], echo replies to [Servers::process_echo_reply], and everything the
server sends goes through a [Transport].
*/

use core::fmt;

use heapless::Vec;

use crate::config::DHCPV4_SERVER_INSTANCES;
use crate::iface::{InterfaceHandle, InterfaceSet};
use crate::time::{Duration, Instant};
use crate::wire::{EthernetAddress, Ipv4Address, Ipv4Cidr, DHCP_MAX_DNS_SERVER_COUNT};

mod server;

pub use self::server::Server;

/// Lease time offered when the client does not ask for one, in seconds.
pub const DEFAULT_LEASE_TIME: u32 = 86400;

/// How long an offered address stays reserved for the client it was offered to.
pub const ADDRESS_RESERVED_TIMEOUT: Duration = Duration::from_secs(5);

/// Lease time meaning "forever" (RFC 2131, section 3.3).
pub const INFINITE_LEASE_TIME: u32 = u32::MAX;

/// Error returned by [Servers::start].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartError {
    /// A server already runs on the interface.
    Already,
    /// Every server instance is in use.
    NoInstance,
    /// The interface has no IPv4 address or no netmask.
    NoAddress,
    /// The pool is empty, too large, outside the subnet or contains the server address.
    InvalidPool,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Already => write!(f, "server already running"),
            StartError::NoInstance => write!(f, "no free server instance"),
            StartError::NoAddress => write!(f, "interface has no IPv4 address or netmask"),
            StartError::InvalidPool => write!(f, "invalid address pool"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StartError {}

/// Error returned by operations on a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopError {
    /// No server runs on the interface.
    NotRunning,
}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopError::NotRunning => write!(f, "server not running"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StopError {}

/// Error returned by a [Transport].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// No buffer was available; the message is lost.
    Exhausted,
    /// The destination cannot be reached from the interface.
    Unreachable,
    /// The underlying socket is gone. The server stops.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Exhausted => write!(f, "transport buffers exhausted"),
            TransportError::Unreachable => write!(f, "destination unreachable"),
            TransportError::Closed => write!(f, "transport closed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransportError {}

/// Where a reply goes (RFC 2131, section 4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Destination {
    /// The relay agent the request came through, at the server port.
    Relay(Ipv4Address),
    /// The limited broadcast address, at the client port.
    Broadcast,
    /// The address the client already uses, at the client port.
    Unicast(Ipv4Address),
    /// The address being handed out, at the client port, sent to the client's hardware
    /// address. The transport has been told about the mapping through
    /// [Transport::set_neighbor] beforehand.
    Hardware {
        ip_addr: Ipv4Address,
        hardware_addr: EthernetAddress,
    },
}

/// The sockets below the server.
pub trait Transport {
    /// Send an encoded DHCP message from the server port of `iface`.
    fn send(
        &mut self,
        iface: InterfaceHandle,
        dst: Destination,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Send an ICMP echo request to `dst`.
    fn send_echo_request(
        &mut self,
        iface: InterfaceHandle,
        dst: Ipv4Address,
        ident: u16,
        seq_no: u16,
    ) -> Result<(), TransportError>;

    /// Record that `ip_addr` is at `hardware_addr`, so that a reply to an address the
    /// client does not answer ARP for yet can be delivered. Usually a forced
    /// [ArpCache::update](crate::iface::ArpCache::update).
    fn set_neighbor(
        &mut self,
        iface: InterfaceHandle,
        ip_addr: Ipv4Address,
        hardware_addr: EthernetAddress,
    );
}

/// Runtime configuration of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// First address of the pool.
    pub base_addr: Ipv4Address,
    /// Number of addresses in the pool, at most `DHCPV4_SERVER_ADDR_COUNT`.
    pub pool_size: usize,
    /// Lease time granted when the client does not ask for one, in seconds.
    pub lease_time: u32,
    /// How long to wait for an echo reply before offering an address. Zero disables
    /// probing.
    pub probe_timeout: Duration,
    /// Router option offered to clients that ask for it.
    pub router: Option<Ipv4Address>,
    /// DNS server option offered to clients that ask for it.
    pub dns_servers: Vec<Ipv4Address, DHCP_MAX_DNS_SERVER_COUNT>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            base_addr: Ipv4Address::UNSPECIFIED,
            pool_size: crate::config::DHCPV4_SERVER_ADDR_COUNT,
            lease_time: DEFAULT_LEASE_TIME,
            probe_timeout: Duration::ZERO,
            router: None,
            dns_servers: Vec::new(),
        }
    }
}

/// State of one pool address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LeaseState {
    Free,
    /// Offered, or being probed before the offer.
    Reserved,
    Allocated,
    /// In use by a host the server did not lease it to.
    Declined,
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseState::Free => write!(f, "free"),
            LeaseState::Reserved => write!(f, "reserved"),
            LeaseState::Allocated => write!(f, "allocated"),
            LeaseState::Declined => write!(f, "declined"),
        }
    }
}

/// A non-free pool address, as reported by [Servers::foreach_lease].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease<'a> {
    pub state: LeaseState,
    pub addr: Ipv4Address,
    /// The client identifier option, or the hardware type and address of the client.
    /// Empty for declined addresses.
    pub client_id: &'a [u8],
    /// When the reservation or lease ends. `None` for declined addresses, infinite
    /// leases and addresses being probed.
    pub expires_at: Option<Instant>,
}

/// Every DHCPv4 server instance.
#[derive(Debug)]
pub struct Servers {
    servers: [Option<Server>; DHCPV4_SERVER_INSTANCES],
}

impl Default for Servers {
    fn default() -> Self {
        Self::new()
    }
}

impl Servers {
    pub fn new() -> Servers {
        Servers {
            servers: core::array::from_fn(|_| None),
        }
    }

    fn get(&self, iface: InterfaceHandle) -> Option<&Server> {
        self.servers
            .iter()
            .flatten()
            .find(|server| server.iface() == iface)
    }

    fn get_mut(&mut self, iface: InterfaceHandle) -> Option<&mut Server> {
        self.servers
            .iter_mut()
            .flatten()
            .find(|server| server.iface() == iface)
    }

    /// Start a server on `iface`.
    ///
    /// The server answers from the interface address chosen for `config.base_addr`, and
    /// the whole pool must lie inside that address's subnet.
    pub fn start(
        &mut self,
        iface: InterfaceHandle,
        ifaces: &InterfaceSet,
        config: ServerConfig,
    ) -> Result<(), StartError> {
        if self.get(iface).is_some() {
            return Err(StartError::Already);
        }

        let server_addr = ifaces.ipv4_select_src_addr(Some(iface), &config.base_addr);
        let netmask = ifaces.ipv4_netmask(iface);
        let (false, Some(netmask)) = (server_addr.is_unspecified(), netmask) else {
            net_debug!("[{}]: DHCPv4 server needs an address and netmask", iface);
            return Err(StartError::NoAddress);
        };
        let subnet = Ipv4Cidr::from_netmask(server_addr, netmask)
            .map_err(|_| StartError::NoAddress)?;

        if !valid_pool(&config, &subnet, &server_addr) {
            net_debug!(
                "[{}]: invalid DHCPv4 pool {}+{} for {}",
                iface,
                config.base_addr,
                config.pool_size,
                subnet
            );
            return Err(StartError::InvalidPool);
        }

        let Some(slot) = self.servers.iter_mut().find(|slot| slot.is_none()) else {
            return Err(StartError::NoInstance);
        };

        net_debug!(
            "[{}]: DHCPv4 server started on {}, pool {}+{}",
            iface,
            server_addr,
            config.base_addr,
            config.pool_size
        );
        *slot = Some(Server::new(iface, server_addr, netmask, config));
        Ok(())
    }

    /// Stop the server on `iface`, forgetting every lease.
    pub fn stop(&mut self, iface: InterfaceHandle) -> Result<(), StopError> {
        let slot = self
            .servers
            .iter_mut()
            .find(|slot| slot.as_ref().map_or(false, |s| s.iface() == iface))
            .ok_or(StopError::NotRunning)?;
        *slot = None;
        net_debug!("[{}]: DHCPv4 server stopped", iface);
        Ok(())
    }

    pub fn is_running(&self, iface: InterfaceHandle) -> bool {
        self.get(iface).is_some()
    }

    /// Call `f` for every address of the pool that is not free.
    pub fn foreach_lease<F>(&self, iface: InterfaceHandle, mut f: F) -> Result<(), StopError>
    where
        F: FnMut(&Lease),
    {
        let server = self.get(iface).ok_or(StopError::NotRunning)?;
        for lease in server.leases() {
            f(&lease);
        }
        Ok(())
    }

    /// Return a declined address to the pool. Returns whether `addr` was declined.
    pub fn reclaim(&mut self, iface: InterfaceHandle, addr: &Ipv4Address) -> Result<bool, StopError> {
        let server = self.get_mut(iface).ok_or(StopError::NotRunning)?;
        Ok(server.reclaim(addr))
    }

    /// Process a DHCP message received on the server port of `iface`.
    pub fn process<T>(&mut self, now: Instant, iface: InterfaceHandle, payload: &[u8], transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        let Some(server) = self.get_mut(iface) else {
            net_trace!("[{}]: no DHCPv4 server, dropping message", iface);
            return;
        };
        if server.process(now, payload, transport).is_err() {
            self.socket_error(iface);
        }
    }

    /// Process an ICMP echo reply received on `iface`.
    pub fn process_echo_reply<T>(
        &mut self,
        now: Instant,
        iface: InterfaceHandle,
        src: Ipv4Address,
        ident: u16,
        seq_no: u16,
        transport: &mut T,
    ) where
        T: Transport + ?Sized,
    {
        let Some(server) = self.get_mut(iface) else {
            return;
        };
        if server
            .process_echo_reply(now, src, ident, seq_no, transport)
            .is_err()
        {
            self.socket_error(iface);
        }
    }

    /// Report that the server socket of `iface` failed. The server stops.
    pub fn socket_error(&mut self, iface: InterfaceHandle) {
        net_debug!("[{}]: DHCPv4 server socket error", iface);
        let _ = self.stop(iface);
    }

    /// Run expired reservations, leases and probes. Returns whether anything changed.
    pub fn poll<T>(&mut self, now: Instant, transport: &mut T) -> bool
    where
        T: Transport + ?Sized,
    {
        let mut changed = false;
        let mut closed: Vec<InterfaceHandle, DHCPV4_SERVER_INSTANCES> = Vec::new();
        for server in self.servers.iter_mut().flatten() {
            match server.poll(now, transport) {
                Ok(server_changed) => changed |= server_changed,
                Err(_) => {
                    let _ = closed.push(server.iface());
                }
            }
        }
        for iface in closed {
            self.socket_error(iface);
            changed = true;
        }
        changed
    }

    pub fn poll_at(&self) -> Option<Instant> {
        self.servers
            .iter()
            .flatten()
            .filter_map(|server| server.poll_at())
            .min()
    }
}

fn valid_pool(config: &ServerConfig, subnet: &Ipv4Cidr, server_addr: &Ipv4Address) -> bool {
    if config.pool_size == 0 || config.pool_size > crate::config::DHCPV4_SERVER_ADDR_COUNT {
        return false;
    }
    let network = subnet.network().address();
    let broadcast = subnet.broadcast();
    (0..config.pool_size).all(|i| match pool_addr(&config.base_addr, i) {
        Some(addr) => {
            subnet.contains_addr(&addr)
                && addr != *server_addr
                && addr != network
                && Some(addr) != broadcast
        }
        None => false,
    })
}

/// The `index`th address of a pool starting at `base`.
pub(crate) fn pool_addr(base: &Ipv4Address, index: usize) -> Option<Ipv4Address> {
    let index = u32::try_from(index).ok()?;
    u32::from(*base).checked_add(index).map(Ipv4Address::from)
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::iface::AddrType;
    use crate::phy::LinkFlags;
    use crate::tests::setup;

    const SERVER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);

    fn ifaces_with(addr: Option<Ipv4Address>) -> (InterfaceSet<'static>, InterfaceHandle) {
        let (mut ifaces, handle, _device) = setup(LinkFlags::default());
        if let Some(addr) = addr {
            ifaces.ipv4_addr_add(handle, addr, AddrType::Manual, 0).unwrap();
            ifaces
                .ipv4_set_netmask(handle, Ipv4Address::new(255, 255, 255, 0))
                .unwrap();
        }
        (ifaces, handle)
    }

    fn config(base: Ipv4Address, pool_size: usize) -> ServerConfig {
        ServerConfig {
            base_addr: base,
            pool_size,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_start_stop() {
        let (ifaces, handle) = ifaces_with(Some(SERVER_IP));
        let mut servers = Servers::new();
        let config = config(Ipv4Address::new(10, 0, 0, 5), 2);

        assert_eq!(servers.start(handle, &ifaces, config.clone()), Ok(()));
        assert!(servers.is_running(handle));
        assert_eq!(
            servers.start(handle, &ifaces, config),
            Err(StartError::Already)
        );
        assert_eq!(servers.stop(handle), Ok(()));
        assert_eq!(servers.stop(handle), Err(StopError::NotRunning));
        assert!(!servers.is_running(handle));
    }

    #[test]
    fn test_start_without_address() {
        let (ifaces, handle) = ifaces_with(None);
        let mut servers = Servers::new();
        assert_eq!(
            servers.start(handle, &ifaces, config(Ipv4Address::new(10, 0, 0, 5), 2)),
            Err(StartError::NoAddress)
        );
    }

    #[rstest]
    #[case::empty(Ipv4Address::new(10, 0, 0, 5), 0)]
    #[case::too_large(Ipv4Address::new(10, 0, 0, 5), crate::config::DHCPV4_SERVER_ADDR_COUNT + 1)]
    #[case::other_subnet(Ipv4Address::new(10, 0, 1, 5), 2)]
    #[case::crosses_subnet(Ipv4Address::new(10, 0, 0, 254), 2)]
    #[case::contains_server(Ipv4Address::new(10, 0, 0, 1), 2)]
    #[case::contains_network(Ipv4Address::new(10, 0, 0, 0), 1)]
    #[case::unspecified(Ipv4Address::UNSPECIFIED, 1)]
    fn test_start_invalid_pool(#[case] base: Ipv4Address, #[case] pool_size: usize) {
        let (ifaces, handle) = ifaces_with(Some(SERVER_IP));
        let mut servers = Servers::new();
        assert_eq!(
            servers.start(handle, &ifaces, config(base, pool_size)),
            Err(StartError::InvalidPool)
        );
    }

    #[test]
    fn test_no_instance() {
        let (mut ifaces, handle) = ifaces_with(Some(SERVER_IP));
        let mut servers = Servers::new();
        let mut handles = std::vec![handle];
        for i in 1..=DHCPV4_SERVER_INSTANCES {
            if let Ok(other) = ifaces.add(crate::iface::Config::new(EthernetAddress([
                0x02, 0, 0, 0, 1, i as u8,
            ]))) {
                let addr = Ipv4Address::new(10, i as u8, 0, 1);
                ifaces.ipv4_addr_add(other, addr, AddrType::Manual, 0).unwrap();
                ifaces
                    .ipv4_set_netmask(other, Ipv4Address::new(255, 255, 255, 0))
                    .unwrap();
                handles.push(other);
            }
        }
        for (i, h) in handles.iter().enumerate() {
            let base = Ipv4Address::new(10, i as u8, 0, 5);
            let result = servers.start(*h, &ifaces, config(base, 1));
            if i < DHCPV4_SERVER_INSTANCES {
                assert_eq!(result, Ok(()));
            } else {
                assert_eq!(result, Err(StartError::NoInstance));
            }
        }
    }

    #[test]
    fn test_not_running() {
        let (_ifaces, handle) = ifaces_with(Some(SERVER_IP));
        let mut servers = Servers::new();
        assert_eq!(
            servers.foreach_lease(handle, |_| {}),
            Err(StopError::NotRunning)
        );
        assert_eq!(
            servers.reclaim(handle, &Ipv4Address::new(10, 0, 0, 5)),
            Err(StopError::NotRunning)
        );
        assert_eq!(servers.poll_at(), None);
    }

    #[rstest]
    #[case(Ipv4Address::new(10, 0, 0, 5), 0, Some(Ipv4Address::new(10, 0, 0, 5)))]
    #[case(Ipv4Address::new(10, 0, 0, 255), 1, Some(Ipv4Address::new(10, 0, 1, 0)))]
    #[case(Ipv4Address::BROADCAST, 1, None)]
    fn test_pool_addr(
        #[case] base: Ipv4Address,
        #[case] index: usize,
        #[case] expected: Option<Ipv4Address>,
    ) {
        assert_eq!(pool_addr(&base, index), expected);
    }
}
