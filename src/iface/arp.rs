// Heads up! Before working on this file you should read, at least,
// RFC 826 and the parts of RFC 1122 that discuss ARP.

use core::fmt;

use heapless::{Deque, Vec};

use crate::config::{ARP_MAX_PENDING_PACKETS, ARP_TABLE_SIZE};
use crate::phy::{LinkLayer, Packet, PacketMeta};
use crate::time::{Duration, Instant};
use crate::timer::TimerList;
use crate::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    EthernetRepr, Ipv4Address, Ipv4Packet, ETHERNET_HEADER_LEN,
};

use super::{InterfaceHandle, InterfaceSet};

/// How long a request may stay unanswered before its entry is dropped.
pub const ARP_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Error returned by [ArpCache::prepare].
///
/// The packet handed in is dropped in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArpError {
    /// The destination is off-link and the interface has no gateway.
    GatewayUnset,
    /// No destination was given and the packet is not an IPv4 packet.
    NotIpv4,
    /// The interface is unknown or has no IPv4 configuration.
    NoConfig,
    /// The pending entry for the next hop already holds as many packets as it can.
    QueueFull,
    /// Every entry is waiting for a reply, or a request frame does not fit a packet.
    Exhausted,
}

impl fmt::Display for ArpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArpError::GatewayUnset => write!(f, "gateway not set"),
            ArpError::NotIpv4 => write!(f, "not an IPv4 packet"),
            ArpError::NoConfig => write!(f, "no IPv4 configuration"),
            ArpError::QueueFull => write!(f, "pending queue full"),
            ArpError::Exhausted => write!(f, "ARP cache exhausted"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ArpError {}

/// The outcome of [ArpCache::prepare].
#[derive(Debug, PartialEq, Eq)]
pub enum Prepared {
    /// The link-layer addresses are filled in; send the packet now.
    Ready(Packet),
    /// The next hop is unknown. Send this ARP request instead; the original packet
    /// waits in the cache and is sent when the reply arrives.
    Request(Packet),
    /// A request for the next hop is already outstanding and the packet was queued
    /// behind it.
    Queued,
}

/// A snapshot of one cache entry, as reported by [ArpCache::iter].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ArpState {
    pub iface: InterfaceHandle,
    pub ip_addr: Ipv4Address,
    /// `None` while the request is outstanding.
    pub hardware_addr: Option<EthernetAddress>,
}

#[derive(Debug)]
enum EntryState {
    Free,
    Pending {
        queue: Deque<Packet, ARP_MAX_PENDING_PACKETS>,
        started: Instant,
    },
    Resolved {
        hardware_addr: EthernetAddress,
    },
}

#[derive(Debug)]
struct Entry {
    iface: InterfaceHandle,
    ip_addr: Ipv4Address,
    state: EntryState,
}

impl Entry {
    const fn free() -> Entry {
        Entry {
            iface: InterfaceHandle::new(0),
            ip_addr: Ipv4Address::UNSPECIFIED,
            state: EntryState::Free,
        }
    }

    fn is(&self, iface: InterfaceHandle, ip_addr: &Ipv4Address) -> bool {
        self.iface == iface && self.ip_addr == *ip_addr
    }
}

/// The IPv4 neighbor cache, shared by every interface.
///
/// Entries live in a fixed arena and are in exactly one of three lists: free, pending
/// (a request is outstanding and packets wait for the answer) or the resolved table.
/// The table is kept in most-recently-used order and its tail is evicted when a new
/// entry is needed and none is free.
#[derive(Debug)]
pub struct ArpCache {
    entries: [Entry; ARP_TABLE_SIZE],
    free: Vec<usize, ARP_TABLE_SIZE>,
    pending: TimerList<usize, ARP_TABLE_SIZE>,
    table: Vec<usize, ARP_TABLE_SIZE>,
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ArpCache {
    pub fn new() -> ArpCache {
        ArpCache {
            entries: core::array::from_fn(|_| Entry::free()),
            free: (0..ARP_TABLE_SIZE).rev().collect(),
            pending: TimerList::new(),
            table: Vec::new(),
        }
    }

    fn find_pending(&self, iface: InterfaceHandle, ip_addr: &Ipv4Address) -> Option<usize> {
        self.entries.iter().position(|entry| {
            matches!(entry.state, EntryState::Pending { .. }) && entry.is(iface, ip_addr)
        })
    }

    fn find_resolved(&self, iface: InterfaceHandle, ip_addr: &Ipv4Address) -> Option<usize> {
        self.table
            .iter()
            .copied()
            .find(|index| self.entries[*index].is(iface, ip_addr))
    }

    /// Move a table entry to the head of the table.
    fn promote(&mut self, index: usize) {
        if let Some(pos) = self.table.iter().position(|i| *i == index) {
            self.table.remove(pos);
        }
        // The table never holds more indices than there are entries.
        let _ = self.table.insert(0, index);
    }

    /// Take a free entry, evicting the least recently used resolved one if needed.
    fn acquire(&mut self) -> Option<usize> {
        if let Some(index) = self.free.pop() {
            return Some(index);
        }
        let index = self.table.pop()?;
        let entry = &mut self.entries[index];
        net_debug!(
            "[{}] evicting {} on iface {}",
            index,
            entry.ip_addr,
            entry.iface
        );
        entry.state = EntryState::Free;
        Some(index)
    }

    fn release(&mut self, index: usize) {
        self.pending.cancel(index);
        if let Some(pos) = self.table.iter().position(|i| *i == index) {
            self.table.remove(pos);
        }
        if !matches!(self.entries[index].state, EntryState::Free) {
            self.entries[index].state = EntryState::Free;
            let _ = self.free.push(index);
        }
    }

    /// Fill in the link-layer addresses of an outgoing packet.
    ///
    /// The next hop is `request_ip`, or the IPv4 destination of the packet, if it is
    /// on-link and the interface gateway otherwise. Multicast and broadcast
    /// destinations map to their Ethernet group addresses and ARP frames pass through
    /// untouched.
    pub fn prepare(
        &mut self,
        now: Instant,
        ifaces: &InterfaceSet,
        mut packet: Packet,
        request_ip: Option<Ipv4Address>,
    ) -> Result<Prepared, ArpError> {
        if packet.ethernet().ethertype() == EthernetProtocol::Arp {
            return Ok(Prepared::Ready(packet));
        }

        let handle = packet.meta.iface;
        let hardware_addr = ifaces
            .get(handle)
            .filter(|iface| iface.has_ipv4())
            .map(|iface| iface.hardware_addr())
            .ok_or(ArpError::NoConfig)?;

        let header = ipv4_addrs(&packet);
        let dst = match (request_ip, header) {
            (Some(ip), _) => ip,
            (None, Some((_, dst))) => dst,
            (None, None) => return Err(ArpError::NotIpv4),
        };

        if dst.is_multicast() {
            packet.set_hardware_addrs(hardware_addr, multicast_hardware_addr(&dst));
            return Ok(Prepared::Ready(packet));
        }
        if ifaces.ipv4_is_broadcast(handle, &dst) {
            packet.set_hardware_addrs(hardware_addr, EthernetAddress::BROADCAST);
            return Ok(Prepared::Ready(packet));
        }

        let next_hop = if dst.is_link_local() || ifaces.ipv4_addr_mask_cmp(handle, &dst) {
            dst
        } else {
            match ifaces.ipv4_gateway(handle) {
                Some(gateway) if !gateway.is_unspecified() => gateway,
                _ => {
                    net_debug!("[{}]: no gateway to reach {}", handle, dst);
                    return Err(ArpError::GatewayUnset);
                }
            }
        };

        if let Some(index) = self.find_resolved(handle, &next_hop) {
            self.promote(index);
            if let EntryState::Resolved { hardware_addr: dst_hw } = self.entries[index].state {
                packet.set_hardware_addrs(hardware_addr, dst_hw);
            }
            return Ok(Prepared::Ready(packet));
        }

        packet.set_hardware_addrs(hardware_addr, EthernetAddress::BROADCAST);

        if let Some(index) = self.find_pending(handle, &next_hop) {
            return self.enqueue(index, packet).map(|()| Prepared::Queued);
        }

        let src = match header {
            Some((src, _)) if ifaces.ipv4_addr_lookup_by_iface(handle, &src).is_some() => src,
            _ => ifaces.ipv4_select_src_addr(Some(handle), &next_hop),
        };
        let request = ArpRepr::EthernetIpv4 {
            operation: ArpOperation::Request,
            source_hardware_addr: hardware_addr,
            source_protocol_addr: src,
            target_hardware_addr: EthernetAddress([0; 6]),
            target_protocol_addr: next_hop,
        };
        let request = arp_frame(packet.meta, EthernetAddress::BROADCAST, &request)
            .ok_or(ArpError::Exhausted)?;

        let Some(index) = self.acquire() else {
            net_debug!("no free ARP entry for {}", next_hop);
            return Err(ArpError::Exhausted);
        };

        let mut queue = Deque::new();
        // A fresh queue always has room for one packet.
        let _ = queue.push_back(packet);
        self.entries[index] = Entry {
            iface: handle,
            ip_addr: next_hop,
            state: EntryState::Pending {
                queue,
                started: now,
            },
        };
        let _ = self.pending.arm(index, now + ARP_REQUEST_TIMEOUT);

        net_trace!("[{}] resolving {} on iface {}", index, next_hop, handle);
        Ok(Prepared::Request(request))
    }

    fn enqueue(&mut self, index: usize, packet: Packet) -> Result<(), ArpError> {
        if let EntryState::Pending { queue, .. } = &mut self.entries[index].state {
            if queue.iter().any(|queued| queued.meta.id == packet.meta.id) {
                net_trace!("packet {} already waiting", packet.meta.id);
                return Ok(());
            }
            if let Err(_packet) = queue.push_back(packet) {
                net_debug!(
                    "[{}] pending queue full, dropping packet {}",
                    index,
                    _packet.meta.id
                );
                return Err(ArpError::QueueFull);
            }
        }
        Ok(())
    }

    /// Record that `ip_addr` is at `hardware_addr`.
    ///
    /// A pending entry is moved to the head of the table and its queued packets are
    /// sent, oldest first. Without a pending entry an existing table entry is refreshed
    /// for `gratuitous` and `force` updates, and `force` inserts a new one if needed.
    ///
    /// Returns the number of queued packets the link accepted.
    pub fn update<L>(
        &mut self,
        now: Instant,
        iface: InterfaceHandle,
        ip_addr: Ipv4Address,
        hardware_addr: EthernetAddress,
        gratuitous: bool,
        force: bool,
        link: &mut L,
    ) -> usize
    where
        L: LinkLayer + ?Sized,
    {
        let Some(index) = self.find_pending(iface, &ip_addr) else {
            if gratuitous || force {
                self.refresh(iface, ip_addr, hardware_addr, force);
            }
            return 0;
        };

        self.pending.cancel(index);
        let state = core::mem::replace(
            &mut self.entries[index].state,
            EntryState::Resolved { hardware_addr },
        );
        let _ = self.table.insert(0, index);

        let EntryState::Pending { mut queue, started } = state else {
            return 0;
        };
        net_debug!(
            "[{}] {} is at {} (after {})",
            index,
            ip_addr,
            hardware_addr,
            now - started
        );

        let mut sent = 0;
        while let Some(mut packet) = queue.pop_front() {
            packet.set_dst_hardware_addr(hardware_addr);
            match link.send(packet) {
                Ok(()) => sent += 1,
                Err(_err) => net_debug!("[{}] cannot send queued packet: {}", iface, _err),
            }
        }
        sent
    }

    fn refresh(
        &mut self,
        iface: InterfaceHandle,
        ip_addr: Ipv4Address,
        hardware_addr: EthernetAddress,
        insert: bool,
    ) {
        if let Some(index) = self.find_resolved(iface, &ip_addr) {
            self.entries[index].state = EntryState::Resolved { hardware_addr };
            self.promote(index);
            return;
        }
        if !insert {
            return;
        }
        let Some(index) = self.acquire() else {
            net_debug!("no free ARP entry for {}", ip_addr);
            return;
        };
        self.entries[index] = Entry {
            iface,
            ip_addr,
            state: EntryState::Resolved { hardware_addr },
        };
        let _ = self.table.insert(0, index);
        net_trace!("[{}] {} is at {}", index, ip_addr, hardware_addr);
    }

    /// Process an ARP frame received on `iface`.
    ///
    /// Requests for one of our addresses are answered through `link`; replies and
    /// announcements update the cache.
    pub fn input<L>(
        &mut self,
        now: Instant,
        ifaces: &InterfaceSet,
        iface: InterfaceHandle,
        frame: &[u8],
        link: &mut L,
    ) where
        L: LinkLayer + ?Sized,
    {
        let Ok(eth) = EthernetFrame::new_checked(frame) else {
            net_debug!("[{}]: truncated frame", iface);
            return;
        };
        if eth.ethertype() != EthernetProtocol::Arp {
            net_debug!("[{}]: not an ARP frame", iface);
            return;
        }
        let repr = match ArpPacket::new_checked(eth.payload()).and_then(|p| ArpRepr::parse(&p)) {
            Ok(repr) => repr,
            Err(_) => {
                net_debug!("[{}]: invalid ARP packet", iface);
                return;
            }
        };
        let ArpRepr::EthernetIpv4 {
            operation,
            source_hardware_addr: sender_hw,
            source_protocol_addr: sender,
            target_protocol_addr: target,
            ..
        } = repr;

        let Some(our_hw) = ifaces
            .get(iface)
            .filter(|i| i.has_ipv4())
            .map(|i| i.hardware_addr())
        else {
            net_trace!("[{}]: no IPv4, ignoring ARP", iface);
            return;
        };

        if sender.is_loopback() || sender.is_broadcast() || sender.is_multicast() {
            net_debug!("[{}]: invalid ARP sender {}", iface, sender);
            return;
        }
        if !sender_hw.is_unicast() || sender_hw == our_hw {
            net_debug!("[{}]: invalid ARP sender hardware address {}", iface, sender_hw);
            return;
        }
        if ifaces.ipv4_addr_lookup_by_iface(iface, &sender).is_some() {
            net_debug!(
                "[{}]: {} claims our address {}",
                iface,
                sender_hw,
                sender
            );
            return;
        }

        let target_is_ours = ifaces.ipv4_addr_lookup_by_iface(iface, &target).is_some();

        match operation {
            ArpOperation::Request if sender == target => {
                self.update(now, iface, sender, sender_hw, true, false, link);
            }
            ArpOperation::Request if target_is_ours => {
                if !sender.is_unspecified() {
                    self.update(now, iface, sender, sender_hw, false, true, link);
                }
                let reply = ArpRepr::EthernetIpv4 {
                    operation: ArpOperation::Reply,
                    source_hardware_addr: our_hw,
                    source_protocol_addr: target,
                    target_hardware_addr: sender_hw,
                    target_protocol_addr: sender,
                };
                let meta = PacketMeta { id: 0, iface };
                match arp_frame(meta, sender_hw, &reply) {
                    Some(reply) => {
                        if let Err(_err) = link.send(reply) {
                            net_debug!("[{}]: cannot send ARP reply: {}", iface, _err);
                        }
                    }
                    None => net_debug!("[{}]: ARP reply does not fit a frame", iface),
                }
            }
            ArpOperation::Reply if target_is_ours || sender == target => {
                self.update(now, iface, sender, sender_hw, sender == target, false, link);
            }
            _ => net_trace!("[{}]: ignoring ARP {}", iface, repr),
        }
    }

    /// Drop every entry, or the entries of one interface, with their queued packets.
    pub fn clear(&mut self, iface: Option<InterfaceHandle>) {
        for index in 0..ARP_TABLE_SIZE {
            let entry = &self.entries[index];
            if iface.map_or(true, |handle| handle == entry.iface) {
                self.release(index);
            }
        }
    }

    /// Drop the outstanding request for `ip_addr` and its queued packets.
    pub fn clear_pending(&mut self, iface: InterfaceHandle, ip_addr: &Ipv4Address) -> bool {
        match self.find_pending(iface, ip_addr) {
            Some(index) => {
                self.release(index);
                true
            }
            None => false,
        }
    }

    /// The hardware address `ip_addr` resolved to, if known.
    pub fn lookup(&self, iface: InterfaceHandle, ip_addr: &Ipv4Address) -> Option<EthernetAddress> {
        let index = self.find_resolved(iface, ip_addr)?;
        match self.entries[index].state {
            EntryState::Resolved { hardware_addr } => Some(hardware_addr),
            _ => None,
        }
    }

    pub fn is_pending(&self, iface: InterfaceHandle, ip_addr: &Ipv4Address) -> bool {
        self.find_pending(iface, ip_addr).is_some()
    }

    /// Resolved entries, most recently used first, followed by outstanding requests
    /// in the order they were sent.
    pub fn iter(&self) -> impl Iterator<Item = ArpState> + '_ {
        let resolved = self.table.iter().map(|index| {
            let entry = &self.entries[*index];
            ArpState {
                iface: entry.iface,
                ip_addr: entry.ip_addr,
                hardware_addr: match entry.state {
                    EntryState::Resolved { hardware_addr } => Some(hardware_addr),
                    _ => None,
                },
            }
        });
        let pending = self.pending.iter().map(|(index, _)| {
            let entry = &self.entries[index];
            ArpState {
                iface: entry.iface,
                ip_addr: entry.ip_addr,
                hardware_addr: None,
            }
        });
        resolved.chain(pending)
    }

    /// Send an announcement for each IPv4 address of `iface`.
    ///
    /// Returns the number of frames the link accepted.
    pub fn gratuitous<L>(ifaces: &InterfaceSet, iface: InterfaceHandle, link: &mut L) -> usize
    where
        L: LinkLayer + ?Sized,
    {
        let (Some(info), Some(ipv4)) = (ifaces.get(iface), ifaces.ipv4_config(iface)) else {
            return 0;
        };
        let mut sent = 0;
        for ifaddr in ipv4.unicast() {
            let announcement = ArpRepr::EthernetIpv4 {
                operation: ArpOperation::Request,
                source_hardware_addr: info.hardware_addr(),
                source_protocol_addr: ifaddr.address(),
                target_hardware_addr: EthernetAddress([0; 6]),
                target_protocol_addr: ifaddr.address(),
            };
            let meta = PacketMeta { id: 0, iface };
            let Some(frame) = arp_frame(meta, EthernetAddress::BROADCAST, &announcement) else {
                continue;
            };
            match link.send(frame) {
                Ok(()) => sent += 1,
                Err(_err) => net_debug!("[{}]: cannot announce {}: {}", iface, ifaddr.address(), _err),
            }
        }
        sent
    }

    /// Drop the requests that went unanswered for [ARP_REQUEST_TIMEOUT], with their
    /// queued packets. Returns whether anything was dropped.
    pub fn poll(&mut self, now: Instant) -> bool {
        let mut changed = false;
        while let Some(index) = self.pending.pop_expired(now) {
            let entry = &mut self.entries[index];
            net_debug!(
                "[{}] no reply from {} on iface {}, dropping {} packets",
                index,
                entry.ip_addr,
                entry.iface,
                match &entry.state {
                    EntryState::Pending { queue, .. } => queue.len(),
                    _ => 0,
                }
            );
            entry.state = EntryState::Free;
            let _ = self.free.push(index);
            changed = true;
        }
        changed
    }

    pub fn poll_at(&self) -> Option<Instant> {
        self.pending.poll_at()
    }
}

fn ipv4_addrs(packet: &Packet) -> Option<(Ipv4Address, Ipv4Address)> {
    let eth = packet.ethernet();
    if eth.ethertype() != EthernetProtocol::Ipv4 {
        return None;
    }
    let ip = Ipv4Packet::new_checked(eth.payload()).ok()?;
    Some((ip.src_addr(), ip.dst_addr()))
}

/// The Ethernet group address an IPv4 multicast address maps to (RFC 1112).
fn multicast_hardware_addr(addr: &Ipv4Address) -> EthernetAddress {
    let octets = addr.octets();
    EthernetAddress([0x01, 0x00, 0x5e, octets[1] & 0x7f, octets[2], octets[3]])
}

fn arp_frame(meta: PacketMeta, dst: EthernetAddress, repr: &ArpRepr) -> Option<Packet> {
    let ArpRepr::EthernetIpv4 {
        source_hardware_addr,
        ..
    } = *repr;
    let mut packet = Packet::zeroed(meta, ETHERNET_HEADER_LEN + repr.buffer_len()).ok()?;
    let mut frame = EthernetFrame::new_unchecked(packet.frame_mut());
    EthernetRepr {
        src_addr: source_hardware_addr,
        dst_addr: dst,
        ethertype: EthernetProtocol::Arp,
    }
    .emit(&mut frame);
    repr.emit(&mut ArpPacket::new_unchecked(frame.payload_mut()));
    Some(packet)
}
