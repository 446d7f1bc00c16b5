/*! Low-level packet access and construction.

The `wire` module deals with the packet *representation*. It provides two levels
of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens `Packet` family of
   structures, e.g. [EthernetFrame] or [ArpPacket].
 * Second, in cases where the space of valid field values is much smaller than the space
   of possible field values, it provides a compact, high-level representation
   of packet data that can be parsed from and emitted into a sequence of octets.
   This happens through the `Repr` family of structs and enums, e.g. [ArpRepr] or [DhcpRepr].

Only the formats the address manager, the ARP cache and the DHCPv4 server read or
write are covered: Ethernet II, ARP for IPv4 over Ethernet, the IPv4 header, IPv6
addresses and BOOTP/DHCP.

[EthernetFrame]: struct.EthernetFrame.html
[ArpPacket]: struct.ArpPacket.html
[ArpRepr]: enum.ArpRepr.html
[DhcpRepr]: struct.DhcpRepr.html

The `Packet::new_checked` method is a shorthand for a combination of `Packet::new_unchecked`
and `Packet::check_len`. When parsing untrusted input, it is *necessary* to use
`Packet::new_checked()`; so long as the buffer is not modified, no accessor will fail.
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

mod arp;
pub(crate) mod dhcpv4;
mod ethernet;
pub(crate) mod ip;
mod ipv4;
mod ipv6;

use core::fmt;

pub use self::ethernet::{
    Address as EthernetAddress, EtherType as EthernetProtocol, Frame as EthernetFrame,
    Repr as EthernetRepr, HEADER_LEN as ETHERNET_HEADER_LEN,
};

pub use self::arp::{
    Hardware as ArpHardware, Operation as ArpOperation, Packet as ArpPacket, Repr as ArpRepr,
    ETHERNET_IPV4_LEN as ARP_ETHERNET_IPV4_LEN,
};

pub use self::ip::{
    checksum, common_prefix_len, Address as IpAddress, Cidr as IpCidr, Protocol as IpProtocol,
    Version as IpVersion,
};

pub use self::ipv4::{
    Address as Ipv4Address, AddressExt as Ipv4AddressExt, Cidr as Ipv4Cidr,
    Packet as Ipv4Packet, Repr as Ipv4Repr, HEADER_LEN as IPV4_HEADER_LEN,
};

pub use self::ipv6::{
    Address as Ipv6Address, AddressExt as Ipv6AddressExt, Cidr as Ipv6Cidr,
    MulticastScope as Ipv6MulticastScope, LINK_LOCAL_ALL_NODES as IPV6_LINK_LOCAL_ALL_NODES,
    LINK_LOCAL_ALL_ROUTERS as IPV6_LINK_LOCAL_ALL_ROUTERS,
};

pub use self::dhcpv4::{
    DhcpOption, DhcpOptionWriter, MessageType as DhcpMessageType, Packet as DhcpPacket,
    Repr as DhcpRepr, CLIENT_PORT as DHCP_CLIENT_PORT,
    MAX_DNS_SERVER_COUNT as DHCP_MAX_DNS_SERVER_COUNT, SERVER_PORT as DHCP_SERVER_PORT,
};

/// Parsing a packet failed.
///
/// Either it is malformed, or it is not supported by netif.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error;

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
