use heapless::Vec;

use super::*;
use crate::config::{IFACE_MAX_IPV6_MADDR_COUNT, IFACE_MAX_IPV6_PREFIX_COUNT};
use crate::wire::{
    common_prefix_len, Ipv6AddressExt, Ipv6Cidr, Ipv6MulticastScope, IPV6_LINK_LOCAL_ALL_NODES,
};

/// How long a tentative address waits for a conflict before it becomes preferred.
const DAD_TIMEOUT: Duration = Duration::from_millis(100);

/// Spacing of router solicitations.
const RS_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of router solicitations sent before giving up.
const RS_COUNT: u8 = 3;

/// A prefix lifetime of all ones bits means infinity.
pub const PREFIX_INFINITE_LIFETIME: u32 = u32::MAX;

/// An on-link IPv6 prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Prefix {
    cidr: Ipv6Cidr,
    is_infinite: bool,
}

impl Prefix {
    pub fn cidr(&self) -> Ipv6Cidr {
        self.cidr
    }

    pub fn is_infinite(&self) -> bool {
        self.is_infinite
    }
}

/// IPv6 state of an interface.
#[derive(Debug, Clone)]
pub struct Ipv6Config {
    owner: Option<InterfaceHandle>,
    unicast: [Option<IfAddr<Ipv6Address>>; IFACE_MAX_IPV6_ADDR_COUNT],
    mcast: [Option<McastAddr<Ipv6Address>>; IFACE_MAX_IPV6_MADDR_COUNT],
    prefix: [Option<Prefix>; IFACE_MAX_IPV6_PREFIX_COUNT],
    hop_limit: u8,
    mcast_hop_limit: u8,
    base_reachable_time: Duration,
    reachable_time: Duration,
    rs_count: u8,
}

impl Ipv6Config {
    pub(super) const fn new() -> Self {
        Ipv6Config {
            owner: None,
            unicast: [None; IFACE_MAX_IPV6_ADDR_COUNT],
            mcast: [None; IFACE_MAX_IPV6_MADDR_COUNT],
            prefix: [None; IFACE_MAX_IPV6_PREFIX_COUNT],
            hop_limit: 64,
            mcast_hop_limit: 1,
            base_reachable_time: Duration::from_secs(30),
            reachable_time: Duration::from_secs(30),
            rs_count: 0,
        }
    }

    pub fn unicast(&self) -> impl Iterator<Item = &IfAddr<Ipv6Address>> + '_ {
        self.unicast.iter().filter_map(Option::as_ref)
    }

    pub fn mcast(&self) -> impl Iterator<Item = &McastAddr<Ipv6Address>> + '_ {
        self.mcast.iter().filter_map(Option::as_ref)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &Prefix> + '_ {
        self.prefix.iter().filter_map(Option::as_ref)
    }

    pub fn hop_limit(&self) -> u8 {
        self.hop_limit
    }

    pub fn mcast_hop_limit(&self) -> u8 {
        self.mcast_hop_limit
    }

    pub fn base_reachable_time(&self) -> Duration {
        self.base_reachable_time
    }

    pub fn reachable_time(&self) -> Duration {
        self.reachable_time
    }

    /// Router solicitations sent without an answer since the interface came up.
    pub fn rs_count(&self) -> u8 {
        self.rs_count
    }

    fn find_unicast(&self, addr: &Ipv6Address) -> Option<usize> {
        self.unicast
            .iter()
            .position(|slot| slot.map_or(false, |a| a.address == *addr))
    }

    fn find_mcast(&self, addr: &Ipv6Address) -> Option<usize> {
        self.mcast
            .iter()
            .position(|slot| slot.map_or(false, |m| m.address == *addr))
    }

    fn find_prefix(&self, cidr: &Ipv6Cidr) -> Option<usize> {
        self.prefix.iter().position(|slot| {
            slot.map_or(false, |p| {
                p.cidr.prefix_len() == cidr.prefix_len() && p.cidr.contains_addr(&cidr.address())
            })
        })
    }

    /// The longest prefix containing `addr`; the first one found on a tie.
    fn longest_prefix(&self, addr: &Ipv6Address) -> Option<usize> {
        let mut best: Option<(usize, u8)> = None;
        for (index, prefix) in self.prefix.iter().enumerate() {
            let Some(prefix) = prefix else { continue };
            if !prefix.cidr.contains_addr(addr) {
                continue;
            }
            if best.map_or(true, |(_, len)| prefix.cidr.prefix_len() > len) {
                best = Some((index, prefix.cidr.prefix_len()));
            }
        }
        best.map(|(index, _)| index)
    }

    /// The preferred, non link-local address sharing the most leading bits with
    /// `dst`, if it beats `best_so_far`. Mesh-local addresses need a common /64.
    fn best_match(&self, dst: &Ipv6Address, best_so_far: &mut Option<u8>) -> Option<Ipv6Address> {
        let mut src = None;
        for ifaddr in self.unicast() {
            if ifaddr.state != AddrState::Preferred || ifaddr.address.is_link_local() {
                continue;
            }
            let len = common_prefix_len(&dst.octets(), &ifaddr.address.octets());
            if ifaddr.is_mesh_local && len < 64 {
                continue;
            }
            if best_so_far.map_or(true, |best| len > best) {
                *best_so_far = Some(len);
                src = Some(ifaddr.address);
            }
        }
        src
    }

    fn link_local(&self, state: Option<AddrState>) -> Option<Ipv6Address> {
        self.unicast()
            .filter(|ifaddr| state.map_or(true, |state| ifaddr.state == state))
            .map(|ifaddr| ifaddr.address)
            .find(|addr| addr.is_link_local())
    }

    /// The first tentative or preferred address outside `fe80::/64`.
    fn global(&self) -> Option<Ipv6Address> {
        self.unicast()
            .filter(|a| matches!(a.state, AddrState::Tentative | AddrState::Preferred))
            .map(|a| a.address)
            .find(|addr| !addr.is_link_local())
    }
}

/// A reachable time picked uniformly from `[base / 2, base * 3 / 2)`.
fn calc_reachable_time(rand: &mut Rand, base: Duration) -> Duration {
    let base = base.total_millis().min(u32::MAX as u64 / 3) as u32;
    let min = base / 2;
    let max = base * 3 / 2;
    Duration::from_millis(rand.rand_range(min, max) as u64)
}

impl<'a> InterfaceSet<'a> {
    /// Bind an IPv6 configuration block to the interface, unless it has one already.
    pub fn config_ipv6_get(&mut self, handle: InterfaceHandle) -> Result<&Ipv6Config, Error> {
        let block = self.ipv6_block_get(handle)?;
        Ok(&self.ipv6_blocks[block])
    }

    /// Release the interface's IPv6 configuration block and cancel its timers.
    pub fn config_ipv6_put(&mut self, handle: InterfaceHandle) -> Result<(), Error> {
        let iface = self.iface_mut(handle)?;
        let block = iface.ipv6.take().ok_or(Error::Already)?;

        self.address_timers.retain(|key| key.block != block);
        self.dad_timers.retain(|key| key.block != block);
        self.prefix_timers.retain(|key| key.block != block);
        self.rs_timers.cancel(block);
        self.ipv6_blocks[block] = Ipv6Config::new();
        self.routers_flush(handle, IpVersion::Ipv6);
        net_debug!("[{}]: released IPv6 block {}", handle, block);
        Ok(())
    }

    pub fn ipv6_config(&self, handle: InterfaceHandle) -> Option<&Ipv6Config> {
        let block = self.get(handle)?.ipv6?;
        Some(&self.ipv6_blocks[block])
    }

    fn ipv6_config_mut(&mut self, handle: InterfaceHandle) -> Option<&mut Ipv6Config> {
        let block = self.get(handle)?.ipv6?;
        Some(&mut self.ipv6_blocks[block])
    }

    fn ipv6_block_get(&mut self, handle: InterfaceHandle) -> Result<usize, Error> {
        if let Some(block) = self.iface(handle)?.ipv6 {
            return Ok(block);
        }

        let block = self
            .ipv6_blocks
            .iter()
            .position(|b| b.owner.is_none())
            .ok_or_else(|| {
                net_debug!("[{}]: no free IPv6 configuration block", handle);
                Error::NoConfigBlock
            })?;

        let iface = self.iface_mut(handle)?;
        iface.ipv6 = Some(block);
        let config = iface.config;
        let base = config.base_reachable_time;
        let reachable_time = calc_reachable_time(&mut iface.rand, base);

        let ipv6 = &mut self.ipv6_blocks[block];
        *ipv6 = Ipv6Config::new();
        ipv6.owner = Some(handle);
        ipv6.hop_limit = config.ipv6_hop_limit;
        ipv6.mcast_hop_limit = config.ipv6_mcast_hop_limit;
        ipv6.base_reachable_time = base;
        ipv6.reachable_time = reachable_time;

        net_debug!("[{}]: bound IPv6 block {}", handle, block);
        Ok(block)
    }

    /// Add a unicast address. Adding an address the interface already has succeeds
    /// without changing it.
    ///
    /// A non-zero `vlifetime` in seconds deprecates the address when it runs out; zero
    /// makes it permanent. The interface joins the all-nodes and solicited-node
    /// groups the link needs, then duplicate address detection starts unless the
    /// interface does not do DAD, in which case the address is preferred at once.
    pub fn ipv6_addr_add(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        addr: Ipv6Address,
        addr_type: AddrType,
        vlifetime: u32,
    ) -> Result<(), Error> {
        if !addr.x_is_unicast() {
            return Err(Error::InvalidAddress);
        }

        let block = self.ipv6_block_get(handle)?;
        let ipv6 = &mut self.ipv6_blocks[block];
        if ipv6.find_unicast(&addr).is_some() {
            return Ok(());
        }
        let index = ipv6.unicast.iter().position(Option::is_none).ok_or_else(|| {
            net_debug!("[{}]: no free IPv6 address slot for {}", handle, addr);
            Error::Exhausted
        })?;

        ipv6.unicast[index] = Some(IfAddr::new(
            addr,
            addr_type,
            AddrState::Preferred,
            vlifetime == 0,
        ));
        let key = SlotKey { block, index };
        if vlifetime != 0 {
            net_debug!("[{}]: expiring {} in {} secs", handle, addr, vlifetime);
            self.arm_address_timer(now, key, vlifetime);
        }

        net_debug!(
            "[{}]: [{}] added IPv6 address {} type {:?}",
            handle,
            index,
            addr,
            addr_type
        );

        self.join_mcast_nodes(handle, &addr);
        self.start_dad_addr(now, handle, key);
        self.events.push(Event::AddrAdded {
            iface: handle,
            addr: IpAddress::Ipv6(addr),
        });
        Ok(())
    }

    fn arm_address_timer(&mut self, now: Instant, key: SlotKey, vlifetime: u32) {
        let deadline = now + Duration::from_secs(vlifetime as u64);
        if self.address_timers.arm(key, deadline).is_err() {
            net_debug!("address timer list full");
        }
    }

    /// Join the all-nodes group, and the solicited-node group of `addr` unless the
    /// link does not need it.
    fn join_mcast_nodes(&mut self, handle: InterfaceHandle, addr: &Ipv6Address) {
        let Some(link_flags) = self.get(handle).map(Interface::link_flags) else {
            return;
        };
        if !link_flags.contains(LinkFlags::MULTICAST) {
            return;
        }

        self.ipv6_mcast_join_group(handle, IPV6_LINK_LOCAL_ALL_NODES);
        if !link_flags.contains(LinkFlags::MULTICAST_SKIP_JOIN_SOLICIT_NODE) {
            self.ipv6_mcast_join_group(handle, addr.solicited_node());
        }
    }

    fn ipv6_mcast_join_group(&mut self, handle: InterfaceHandle, group: Ipv6Address) {
        let result = self
            .ipv6_maddr_add(handle, group)
            .and_then(|()| self.ipv6_maddr_join(handle, &group));
        if let Err(_err) = result {
            net_debug!("[{}]: cannot join {}: {}", handle, group, _err);
        }
    }

    /// Put the address in the tentative state and, if the interface is running, arm
    /// its DAD timer. Interfaces without DAD prefer the address at once.
    fn start_dad_addr(&mut self, now: Instant, handle: InterfaceHandle, key: SlotKey) {
        let Some(iface) = self.get(handle) else {
            return;
        };
        let skip = !iface.config.dad_enabled
            || iface
                .flags
                .intersects(Flags::IPV6_NO_ND | Flags::POINT_TO_POINT);
        let running = iface.flags.contains(Flags::RUNNING);

        let Some(ifaddr) = self.ipv6_blocks[key.block].unicast[key.index].as_mut() else {
            return;
        };
        if skip {
            ifaddr.state = AddrState::Preferred;
            return;
        }

        ifaddr.state = AddrState::Tentative;
        let addr = ifaddr.address;
        if !running {
            net_debug!("[{}]: interface is down, starting DAD for {} later", handle, addr);
            return;
        }

        net_debug!("[{}]: tentative IPv6 address {}", handle, addr);
        if self.dad_timers.arm(key, now + DAD_TIMEOUT).is_err() {
            net_debug!("DAD timer list full");
        }
        self.events.push(Event::DadStarted {
            iface: handle,
            addr,
        });
    }

    /// Remove a unicast address and cancel its timers.
    ///
    /// The solicited-node group of the address is left and removed unless another
    /// address of the interface maps to the same group.
    pub fn ipv6_addr_rm(&mut self, handle: InterfaceHandle, addr: &Ipv6Address) -> bool {
        let Some(block) = self.get(handle).and_then(|iface| iface.ipv6) else {
            return false;
        };
        let ipv6 = &mut self.ipv6_blocks[block];
        let Some(index) = ipv6.find_unicast(addr) else {
            return false;
        };
        let Some(_ifaddr) = ipv6.unicast[index].take() else {
            return false;
        };

        let key = SlotKey { block, index };
        self.address_timers.cancel(key);
        self.dad_timers.cancel(key);

        let group = addr.solicited_node();
        let shared = self.ipv6_blocks[block]
            .unicast()
            .any(|other| other.address.solicited_node() == group);
        if !shared {
            let _ = self.ipv6_maddr_leave(handle, &group);
            self.ipv6_maddr_rm(handle, &group);
        }

        net_debug!(
            "[{}]: [{}] removed IPv6 address {} type {:?}",
            handle,
            index,
            addr,
            _ifaddr.addr_type
        );
        self.events.push(Event::AddrRemoved {
            iface: handle,
            addr: IpAddress::Ipv6(*addr),
        });
        true
    }

    /// Find the interface owning `addr`.
    pub fn ipv6_addr_lookup(
        &self,
        addr: &Ipv6Address,
    ) -> Option<(InterfaceHandle, &IfAddr<Ipv6Address>)> {
        self.handles().find_map(|handle| {
            self.ipv6_addr_lookup_by_iface(handle, addr)
                .map(|ifaddr| (handle, ifaddr))
        })
    }

    pub fn ipv6_addr_lookup_by_iface(
        &self,
        handle: InterfaceHandle,
        addr: &Ipv6Address,
    ) -> Option<&IfAddr<Ipv6Address>> {
        let ipv6 = self.ipv6_config(handle)?;
        ipv6.find_unicast(addr)
            .and_then(|index| ipv6.unicast[index].as_ref())
    }

    /// Restart the valid lifetime of an address and make it preferred again.
    /// A `vlifetime` of zero makes it permanent.
    pub fn ipv6_addr_update_lifetime(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        addr: &Ipv6Address,
        vlifetime: u32,
    ) -> bool {
        let Some(block) = self.get(handle).and_then(|iface| iface.ipv6) else {
            return false;
        };
        let ipv6 = &mut self.ipv6_blocks[block];
        let Some(index) = ipv6.find_unicast(addr) else {
            return false;
        };
        let Some(ifaddr) = ipv6.unicast[index].as_mut() else {
            return false;
        };

        net_debug!("[{}]: updating expire time of {} by {} secs", handle, addr, vlifetime);
        ifaddr.state = AddrState::Preferred;
        ifaddr.is_infinite = vlifetime == 0;

        let key = SlotKey { block, index };
        if vlifetime == 0 {
            self.address_timers.cancel(key);
        } else {
            self.arm_address_timer(now, key, vlifetime);
        }
        true
    }

    /// Mark an address as belonging, or not, to a mesh-local prefix.
    pub fn ipv6_set_mesh_local(
        &mut self,
        handle: InterfaceHandle,
        addr: &Ipv6Address,
        mesh_local: bool,
    ) -> bool {
        let Some(ipv6) = self.ipv6_config_mut(handle) else {
            return false;
        };
        match ipv6
            .find_unicast(addr)
            .and_then(|index| ipv6.unicast[index].as_mut())
        {
            Some(ifaddr) => {
                ifaddr.is_mesh_local = mesh_local;
                true
            }
            None => false,
        }
    }

    /// Add a multicast group without joining it. Adding an existing group succeeds.
    pub fn ipv6_maddr_add(&mut self, handle: InterfaceHandle, addr: Ipv6Address) -> Result<(), Error> {
        if !addr.is_multicast() {
            return Err(Error::InvalidAddress);
        }

        let block = self.ipv6_block_get(handle)?;
        let ipv6 = &mut self.ipv6_blocks[block];
        if ipv6.find_mcast(&addr).is_some() {
            return Ok(());
        }
        let index = ipv6.mcast.iter().position(Option::is_none).ok_or_else(|| {
            net_debug!("[{}]: no free IPv6 multicast slot for {}", handle, addr);
            Error::Exhausted
        })?;
        ipv6.mcast[index] = Some(McastAddr::new(addr));

        net_debug!("[{}]: [{}] added IPv6 multicast {}", handle, index, addr);
        self.events.push(Event::MaddrAdded {
            iface: handle,
            addr: IpAddress::Ipv6(addr),
        });
        Ok(())
    }

    pub fn ipv6_maddr_rm(&mut self, handle: InterfaceHandle, addr: &Ipv6Address) -> bool {
        let Some(ipv6) = self.ipv6_config_mut(handle) else {
            return false;
        };
        let Some(index) = ipv6.find_mcast(addr) else {
            return false;
        };
        ipv6.mcast[index] = None;

        net_debug!("[{}]: [{}] removed IPv6 multicast {}", handle, index, addr);
        self.events.push(Event::MaddrRemoved {
            iface: handle,
            addr: IpAddress::Ipv6(*addr),
        });
        true
    }

    /// Find a multicast group, on `handle` only or on the first interface that has it.
    pub fn ipv6_maddr_lookup(
        &self,
        addr: &Ipv6Address,
        handle: Option<InterfaceHandle>,
    ) -> Option<(InterfaceHandle, &McastAddr<Ipv6Address>)> {
        self.scoped(handle).find_map(|h| {
            let ipv6 = self.ipv6_config(h)?;
            let index = ipv6.find_mcast(addr)?;
            ipv6.mcast[index].as_ref().map(|maddr| (h, maddr))
        })
    }

    /// Mark a group as joined. Joining a joined group succeeds without effect.
    pub fn ipv6_maddr_join(&mut self, handle: InterfaceHandle, addr: &Ipv6Address) -> Result<(), Error> {
        self.ipv6_maddr_set_joined(handle, addr, true)
    }

    /// Mark a group as left. Leaving a group not joined succeeds without effect.
    pub fn ipv6_maddr_leave(&mut self, handle: InterfaceHandle, addr: &Ipv6Address) -> Result<(), Error> {
        self.ipv6_maddr_set_joined(handle, addr, false)
    }

    fn ipv6_maddr_set_joined(
        &mut self,
        handle: InterfaceHandle,
        addr: &Ipv6Address,
        joined: bool,
    ) -> Result<(), Error> {
        let ipv6 = self.ipv6_config_mut(handle).ok_or(Error::NotFound)?;
        let maddr = ipv6
            .find_mcast(addr)
            .and_then(|index| ipv6.mcast[index].as_mut())
            .ok_or(Error::NotFound)?;
        if maddr.is_joined == joined {
            return Ok(());
        }
        maddr.is_joined = joined;
        self.notify_mcast(handle, IpAddress::Ipv6(*addr), joined);
        Ok(())
    }

    /// Add an on-link prefix with a lifetime in seconds;
    /// [PREFIX_INFINITE_LIFETIME] never expires. Adding a known prefix returns it
    /// unchanged.
    pub fn ipv6_prefix_add(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        cidr: Ipv6Cidr,
        lifetime: u32,
    ) -> Result<Prefix, Error> {
        let block = self.ipv6_block_get(handle)?;
        let ipv6 = &mut self.ipv6_blocks[block];
        if let Some(prefix) = ipv6.find_prefix(&cidr).and_then(|index| ipv6.prefix[index]) {
            return Ok(prefix);
        }
        let index = ipv6.prefix.iter().position(Option::is_none).ok_or_else(|| {
            net_debug!("[{}]: no free prefix slot for {}", handle, cidr);
            Error::Exhausted
        })?;

        let prefix = Prefix {
            cidr,
            is_infinite: lifetime == PREFIX_INFINITE_LIFETIME,
        };
        ipv6.prefix[index] = Some(prefix);
        if !prefix.is_infinite {
            self.arm_prefix_timer(now, SlotKey { block, index }, lifetime);
        }

        net_debug!(
            "[{}]: [{}] added prefix {} lifetime {}",
            handle,
            index,
            cidr,
            lifetime
        );
        self.events.push(Event::PrefixAdded {
            iface: handle,
            prefix: cidr,
        });
        Ok(prefix)
    }

    fn arm_prefix_timer(&mut self, now: Instant, key: SlotKey, lifetime: u32) {
        let deadline = now + Duration::from_secs(lifetime as u64);
        if self.prefix_timers.arm(key, deadline).is_err() {
            net_debug!("prefix timer list full");
        }
    }

    /// Remove a prefix together with every autoconfigured address inside it.
    pub fn ipv6_prefix_rm(&mut self, handle: InterfaceHandle, cidr: &Ipv6Cidr) -> bool {
        let Some(block) = self.get(handle).and_then(|iface| iface.ipv6) else {
            return false;
        };
        let Some(index) = self.ipv6_blocks[block].find_prefix(cidr) else {
            return false;
        };
        self.prefix_timers.cancel(SlotKey { block, index });
        self.prefix_remove(handle, block, index);
        true
    }

    fn prefix_remove(&mut self, handle: InterfaceHandle, block: usize, index: usize) {
        let Some(prefix) = self.ipv6_blocks[block].prefix[index].take() else {
            return;
        };

        let doomed: Vec<Ipv6Address, IFACE_MAX_IPV6_ADDR_COUNT> = self.ipv6_blocks[block]
            .unicast()
            .filter(|a| a.addr_type == AddrType::Autoconf && prefix.cidr.contains_addr(&a.address))
            .map(|a| a.address)
            .collect();
        for addr in doomed.iter() {
            self.ipv6_addr_rm(handle, addr);
        }

        net_debug!("[{}]: removed prefix {}", handle, prefix.cidr);
        self.events.push(Event::PrefixRemoved {
            iface: handle,
            prefix: prefix.cidr,
        });
    }

    /// The longest prefix of the interface containing `addr`.
    pub fn ipv6_prefix_get(&self, handle: InterfaceHandle, addr: &Ipv6Address) -> Option<&Prefix> {
        let ipv6 = self.ipv6_config(handle)?;
        ipv6.longest_prefix(addr)
            .and_then(|index| ipv6.prefix[index].as_ref())
    }

    /// The prefix of exactly `cidr`'s length containing its address.
    pub fn ipv6_prefix_lookup(&self, handle: InterfaceHandle, cidr: &Ipv6Cidr) -> Option<&Prefix> {
        let ipv6 = self.ipv6_config(handle)?;
        ipv6.find_prefix(cidr)
            .and_then(|index| ipv6.prefix[index].as_ref())
    }

    /// Restart the lifetime of a prefix. [PREFIX_INFINITE_LIFETIME] makes it permanent.
    pub fn ipv6_prefix_set_timer(
        &mut self,
        now: Instant,
        handle: InterfaceHandle,
        cidr: &Ipv6Cidr,
        lifetime: u32,
    ) -> bool {
        let Some(block) = self.get(handle).and_then(|iface| iface.ipv6) else {
            return false;
        };
        let ipv6 = &mut self.ipv6_blocks[block];
        let Some(index) = ipv6.find_prefix(cidr) else {
            return false;
        };
        let Some(prefix) = ipv6.prefix[index].as_mut() else {
            return false;
        };

        let key = SlotKey { block, index };
        prefix.is_infinite = lifetime == PREFIX_INFINITE_LIFETIME;
        if prefix.is_infinite {
            self.prefix_timers.cancel(key);
        } else {
            self.arm_prefix_timer(now, key, lifetime);
        }
        true
    }

    /// Stop the lifetime timer of a prefix; the prefix stays.
    pub fn ipv6_prefix_unset_timer(&mut self, handle: InterfaceHandle, cidr: &Ipv6Cidr) -> bool {
        let Some(block) = self.get(handle).and_then(|iface| iface.ipv6) else {
            return false;
        };
        match self.ipv6_blocks[block].find_prefix(cidr) {
            Some(index) => self.prefix_timers.cancel(SlotKey { block, index }),
            None => false,
        }
    }

    /// The interface, `handle` or any, with a prefix containing `addr`.
    pub fn ipv6_addr_onlink(
        &self,
        handle: Option<InterfaceHandle>,
        addr: &Ipv6Address,
    ) -> Option<InterfaceHandle> {
        self.scoped(handle).find(|h| {
            self.ipv6_config(*h)
                .map_or(false, |ipv6| ipv6.prefixes().any(|p| p.cidr.contains_addr(addr)))
        })
    }

    /// The first link-local address of the interface, optionally only one in `state`.
    pub fn ipv6_get_ll(&self, handle: InterfaceHandle, state: Option<AddrState>) -> Option<Ipv6Address> {
        self.ipv6_config(handle)?.link_local(state)
    }

    /// The first tentative or preferred global address, on `handle` or on any interface.
    pub fn ipv6_get_global_addr(
        &self,
        handle: Option<InterfaceHandle>,
    ) -> Option<(InterfaceHandle, Ipv6Address)> {
        self.scoped(handle)
            .find_map(|h| self.ipv6_config(h)?.global().map(|addr| (h, addr)))
    }

    /// Pick the source address for traffic to `dst`, from `handle` only or from any
    /// interface.
    ///
    /// Link-local destinations and multicast groups of at most link-local scope get
    /// a preferred link-local source. Other destinations get the preferred global
    /// address sharing the longest prefix with them; on a tie the first address found
    /// wins. The unspecified address is returned when nothing fits.
    pub fn ipv6_select_src_addr(&self, handle: Option<InterfaceHandle>, dst: &Ipv6Address) -> Ipv6Address {
        let needs_ll = dst.is_link_local()
            || (dst.is_multicast()
                && dst.x_multicast_scope() as u8 <= Ipv6MulticastScope::LinkLocal as u8);

        let src = if needs_ll {
            self.scoped(handle)
                .find_map(|h| self.ipv6_get_ll(h, Some(AddrState::Preferred)))
        } else {
            let mut best = None;
            let mut src = None;
            for h in self.scoped(handle) {
                if let Some(addr) = self
                    .ipv6_config(h)
                    .and_then(|ipv6| ipv6.best_match(dst, &mut best))
                {
                    src = Some(addr);
                }
            }
            src
        };

        src.unwrap_or(Ipv6Address::UNSPECIFIED)
    }

    /// The interface owning the source address selected for `dst`, or the default
    /// interface.
    pub fn ipv6_select_src_iface(&self, dst: &Ipv6Address) -> Option<InterfaceHandle> {
        let src = self.ipv6_select_src_addr(None, dst);
        if src.is_unspecified() {
            return self.default_iface();
        }
        self.ipv6_addr_lookup(&src)
            .map(|(handle, _)| handle)
            .or_else(|| self.default_iface())
    }

    /// Unicast hop limit of the interface; the configured default without an IPv6 block.
    pub fn ipv6_hop_limit(&self, handle: InterfaceHandle) -> Option<u8> {
        let iface = self.get(handle)?;
        Some(
            self.ipv6_config(handle)
                .map_or(iface.config.ipv6_hop_limit, Ipv6Config::hop_limit),
        )
    }

    pub fn ipv6_set_hop_limit(&mut self, handle: InterfaceHandle, hop_limit: u8) -> Result<(), Error> {
        let block = self.ipv6_block_get(handle)?;
        self.ipv6_blocks[block].hop_limit = hop_limit;
        Ok(())
    }

    pub fn ipv6_mcast_hop_limit(&self, handle: InterfaceHandle) -> Option<u8> {
        let iface = self.get(handle)?;
        Some(
            self.ipv6_config(handle)
                .map_or(iface.config.ipv6_mcast_hop_limit, Ipv6Config::mcast_hop_limit),
        )
    }

    pub fn ipv6_set_mcast_hop_limit(&mut self, handle: InterfaceHandle, hop_limit: u8) -> Result<(), Error> {
        let block = self.ipv6_block_get(handle)?;
        self.ipv6_blocks[block].mcast_hop_limit = hop_limit;
        Ok(())
    }

    /// Set the base reachable time and pick a new randomised reachable time from it.
    pub fn ipv6_set_base_reachable_time(
        &mut self,
        handle: InterfaceHandle,
        base: Duration,
    ) -> Result<Duration, Error> {
        let block = self.ipv6_block_get(handle)?;
        let iface = self.iface_mut(handle)?;
        let reachable_time = calc_reachable_time(&mut iface.rand, base);
        let ipv6 = &mut self.ipv6_blocks[block];
        ipv6.base_reachable_time = base;
        ipv6.reachable_time = reachable_time;
        Ok(reachable_time)
    }

    pub fn ipv6_reachable_time(&self, handle: InterfaceHandle) -> Option<Duration> {
        Some(self.ipv6_config(handle)?.reachable_time)
    }

    /// Start duplicate address detection on the interface.
    ///
    /// The link-local address derived from the hardware address is added first; every
    /// other address goes back to tentative and is checked again.
    pub fn start_dad(&mut self, now: Instant, handle: InterfaceHandle) {
        let block = match self.ipv6_block_get(handle) {
            Ok(block) => block,
            Err(_err) => {
                net_debug!("[{}]: cannot do DAD: {}", handle, _err);
                return;
            }
        };
        let Some(hardware_addr) = self.get(handle).map(Interface::hardware_addr) else {
            return;
        };

        let ll = Ipv6Address::link_local_from_eui64(&hardware_addr);
        let ll_existed = self.ipv6_blocks[block].find_unicast(&ll).is_some();
        if let Err(_err) = self.ipv6_addr_add(now, handle, ll, AddrType::Autoconf, 0) {
            net_debug!("[{}]: cannot add {}, DAD fails: {}", handle, ll, _err);
        }

        for index in 0..IFACE_MAX_IPV6_ADDR_COUNT {
            let addr = match self.ipv6_blocks[block].unicast[index] {
                Some(ifaddr) if ll_existed || ifaddr.address != ll => ifaddr.address,
                _ => continue,
            };
            self.join_mcast_nodes(handle, &addr);
            self.start_dad_addr(now, handle, SlotKey { block, index });
        }
    }

    /// A neighbor answered for a tentative address: drop the address.
    pub fn ipv6_dad_failed(&mut self, handle: InterfaceHandle, addr: &Ipv6Address) -> bool {
        let Some(block) = self.get(handle).and_then(|iface| iface.ipv6) else {
            return false;
        };
        let Some(index) = self.ipv6_blocks[block].find_unicast(addr) else {
            net_debug!("[{}]: cannot find {}", handle, addr);
            return false;
        };

        self.dad_timers.cancel(SlotKey { block, index });
        self.events.push(Event::DadFailed {
            iface: handle,
            addr: *addr,
        });
        self.ipv6_addr_rm(handle, addr)
    }

    /// Send a router solicitation and arm the retry timer.
    pub fn start_rs(&mut self, now: Instant, handle: InterfaceHandle) {
        let Some(iface) = self.get(handle) else {
            return;
        };
        if iface.flags.contains(Flags::IPV6_NO_ND) {
            return;
        }
        let Some(block) = iface.ipv6 else {
            return;
        };

        net_debug!("[{}]: router solicitation", handle);
        if self.rs_timers.arm(block, now + RS_TIMEOUT).is_err() {
            net_debug!("RS timer list full");
        }
        self.events.push(Event::RsSend { iface: handle });
    }

    pub fn stop_rs(&mut self, handle: InterfaceHandle) {
        if let Some(block) = self.get(handle).and_then(|iface| iface.ipv6) {
            self.rs_timers.cancel(block);
        }
    }

    pub(super) fn ipv6_iface_up(&mut self, now: Instant, handle: InterfaceHandle) {
        if let Some(ipv6) = self.ipv6_config_mut(handle) {
            ipv6.rs_count = 0;
        }
        self.start_dad(now, handle);
        self.start_rs(now, handle);
    }

    pub(super) fn ipv6_iface_down(&mut self, handle: InterfaceHandle) {
        let Some(block) = self.get(handle).and_then(|iface| iface.ipv6) else {
            return;
        };

        for index in 0..IFACE_MAX_IPV6_MADDR_COUNT {
            let addr = match self.ipv6_blocks[block].mcast[index] {
                Some(maddr) if maddr.is_joined => maddr.address,
                _ => continue,
            };
            let _ = self.ipv6_maddr_leave(handle, &addr);
        }

        self.rs_timers.cancel(block);
        self.dad_timers.retain(|key| key.block != block);
    }

    pub(super) fn poll_ipv6(&mut self, now: Instant) -> bool {
        let mut changed = false;

        while let Some(key) = self.address_timers.pop_expired(now) {
            let ipv6 = &mut self.ipv6_blocks[key.block];
            let (Some(handle), Some(ifaddr)) = (ipv6.owner, ipv6.unicast[key.index].as_mut()) else {
                continue;
            };
            net_debug!("[{}]: IPv6 address {} is deprecated", handle, ifaddr.address);
            ifaddr.state = AddrState::Deprecated;
            self.events.push(Event::AddrDeprecated {
                iface: handle,
                addr: ifaddr.address,
            });
            changed = true;
        }

        while let Some(key) = self.dad_timers.pop_expired(now) {
            let ipv6 = &mut self.ipv6_blocks[key.block];
            let (Some(handle), Some(ifaddr)) = (ipv6.owner, ipv6.unicast[key.index].as_mut()) else {
                continue;
            };
            net_debug!("[{}]: DAD succeeded for {}", handle, ifaddr.address);
            ifaddr.state = AddrState::Preferred;
            let addr = ifaddr.address;
            self.events.push(Event::DadSucceeded {
                iface: handle,
                addr,
            });
            self.events.push(Event::NeighborRemove {
                iface: handle,
                addr,
            });
            changed = true;
        }

        while let Some(key) = self.prefix_timers.pop_expired(now) {
            let Some(handle) = self.ipv6_blocks[key.block].owner else {
                continue;
            };
            net_debug!("[{}]: prefix {} expired", handle, key.index);
            self.prefix_remove(handle, key.block, key.index);
            changed = true;
        }

        while let Some(block) = self.rs_timers.pop_expired(now) {
            let ipv6 = &mut self.ipv6_blocks[block];
            let Some(handle) = ipv6.owner else {
                continue;
            };
            ipv6.rs_count += 1;
            net_debug!("[{}]: RS no response, count {}", handle, ipv6.rs_count);
            if ipv6.rs_count < RS_COUNT {
                self.start_rs(now, handle);
            } else {
                self.events.push(Event::RsExhausted { iface: handle });
            }
            changed = true;
        }

        changed
    }
}
