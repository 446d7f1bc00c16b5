use super::*;
use crate::config::{IFACE_MAX_IPV4_ADDR_COUNT, IFACE_MAX_IPV4_MADDR_COUNT};
use crate::wire::{common_prefix_len, Ipv4AddressExt, Ipv4Cidr};

/// IPv4 state of an interface.
#[derive(Debug, Clone)]
pub struct Ipv4Config {
    owner: Option<InterfaceHandle>,
    unicast: [Option<IfAddr<Ipv4Address>>; IFACE_MAX_IPV4_ADDR_COUNT],
    mcast: [Option<McastAddr<Ipv4Address>>; IFACE_MAX_IPV4_MADDR_COUNT],
    netmask: Option<Ipv4Address>,
    gateway: Option<Ipv4Address>,
    ttl: u8,
    mcast_ttl: u8,
}

impl Ipv4Config {
    pub(super) const fn new() -> Self {
        Ipv4Config {
            owner: None,
            unicast: [None; IFACE_MAX_IPV4_ADDR_COUNT],
            mcast: [None; IFACE_MAX_IPV4_MADDR_COUNT],
            netmask: None,
            gateway: None,
            ttl: 64,
            mcast_ttl: 1,
        }
    }

    fn bind(&mut self, owner: InterfaceHandle, config: &Config) {
        *self = Ipv4Config::new();
        self.owner = Some(owner);
        self.ttl = config.ipv4_ttl;
        self.mcast_ttl = config.ipv4_mcast_ttl;
    }

    pub fn unicast(&self) -> impl Iterator<Item = &IfAddr<Ipv4Address>> + '_ {
        self.unicast.iter().filter_map(Option::as_ref)
    }

    pub fn mcast(&self) -> impl Iterator<Item = &McastAddr<Ipv4Address>> + '_ {
        self.mcast.iter().filter_map(Option::as_ref)
    }

    pub fn netmask(&self) -> Option<Ipv4Address> {
        self.netmask
    }

    pub fn gateway(&self) -> Option<Ipv4Address> {
        self.gateway
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    pub fn mcast_ttl(&self) -> u8 {
        self.mcast_ttl
    }

    fn find_unicast(&self, addr: &Ipv4Address) -> Option<usize> {
        self.unicast
            .iter()
            .position(|slot| slot.map_or(false, |a| a.address == *addr))
    }

    fn find_mcast(&self, addr: &Ipv4Address) -> Option<usize> {
        self.mcast
            .iter()
            .position(|slot| slot.map_or(false, |m| m.address == *addr))
    }

    /// Whether `addr` is in the subnet of one of the unicast addresses. Without a
    /// netmask every address is on-link.
    fn mask_cmp(&self, addr: &Ipv4Address) -> bool {
        let mask = self.netmask.map_or(0, |netmask| netmask.to_bits());
        let subnet = addr.to_bits() & mask;
        self.unicast()
            .any(|ifaddr| ifaddr.address.to_bits() & mask == subnet)
    }

    /// The preferred, non link-local address sharing the most leading bits with
    /// `dst`, if it beats `best_so_far`.
    fn best_match(&self, dst: &Ipv4Address, best_so_far: &mut Option<u8>) -> Option<Ipv4Address> {
        let mut src = None;
        for ifaddr in self.unicast() {
            if ifaddr.state != AddrState::Preferred || ifaddr.address.is_link_local() {
                continue;
            }
            let len = common_prefix_len(&dst.octets(), &ifaddr.address.octets());
            if best_so_far.map_or(true, |best| len > best) {
                *best_so_far = Some(len);
                src = Some(ifaddr.address);
            }
        }
        src
    }

    fn link_local(&self, state: Option<AddrState>) -> Option<Ipv4Address> {
        self.unicast()
            .filter(|ifaddr| state.map_or(true, |state| ifaddr.state == state))
            .map(|ifaddr| ifaddr.address)
            .find(Ipv4Address::is_link_local)
    }
}

impl<'a> InterfaceSet<'a> {
    /// Bind an IPv4 configuration block to the interface, unless it has one already.
    pub fn config_ipv4_get(&mut self, handle: InterfaceHandle) -> Result<&Ipv4Config, Error> {
        let block = self.ipv4_block_get(handle)?;
        Ok(&self.ipv4_blocks[block])
    }

    /// Release the interface's IPv4 configuration block.
    pub fn config_ipv4_put(&mut self, handle: InterfaceHandle) -> Result<(), Error> {
        let iface = self.iface_mut(handle)?;
        let block = iface.ipv4.take().ok_or(Error::Already)?;
        self.ipv4_blocks[block] = Ipv4Config::new();
        self.routers_flush(handle, IpVersion::Ipv4);
        net_debug!("[{}]: released IPv4 block {}", handle, block);
        Ok(())
    }

    pub fn ipv4_config(&self, handle: InterfaceHandle) -> Option<&Ipv4Config> {
        let block = self.get(handle)?.ipv4?;
        Some(&self.ipv4_blocks[block])
    }

    fn ipv4_config_mut(&mut self, handle: InterfaceHandle) -> Option<&mut Ipv4Config> {
        let block = self.get(handle)?.ipv4?;
        Some(&mut self.ipv4_blocks[block])
    }

    fn ipv4_block_get(&mut self, handle: InterfaceHandle) -> Result<usize, Error> {
        let iface = self.iface(handle)?;
        if let Some(block) = iface.ipv4 {
            return Ok(block);
        }
        let config = iface.config;

        let block = self
            .ipv4_blocks
            .iter()
            .position(|b| b.owner.is_none())
            .ok_or_else(|| {
                net_debug!("[{}]: no free IPv4 configuration block", handle);
                Error::NoConfigBlock
            })?;
        self.ipv4_blocks[block].bind(handle, &config);
        self.iface_mut(handle)?.ipv4 = Some(block);
        net_debug!("[{}]: bound IPv4 block {}", handle, block);
        Ok(block)
    }

    /// Add a unicast address. Adding an address the interface already has succeeds
    /// without changing it.
    ///
    /// A `vlifetime` of zero marks the address as permanent; otherwise its lifetime is
    /// tracked by whoever configured it, e.g. a DHCP client. When every slot is in use a
    /// DHCP address replaces an `Overridable` one.
    pub fn ipv4_addr_add(
        &mut self,
        handle: InterfaceHandle,
        addr: Ipv4Address,
        addr_type: AddrType,
        vlifetime: u32,
    ) -> Result<(), Error> {
        if !addr.x_is_unicast() {
            return Err(Error::InvalidAddress);
        }

        let block = self.ipv4_block_get(handle)?;
        let ipv4 = &mut self.ipv4_blocks[block];
        if ipv4.find_unicast(&addr).is_some() {
            return Ok(());
        }

        let index = ipv4
            .unicast
            .iter()
            .position(Option::is_none)
            .or_else(|| {
                if addr_type != AddrType::Dhcp {
                    return None;
                }
                ipv4.unicast
                    .iter()
                    .position(|slot| slot.map_or(false, |a| a.addr_type == AddrType::Overridable))
            })
            .ok_or_else(|| {
                net_debug!("[{}]: no free IPv4 address slot for {}", handle, addr);
                Error::Exhausted
            })?;

        if let Some(old) = ipv4.unicast[index] {
            net_debug!("[{}]: {} overrides {}", handle, addr, old.address);
            self.events.push(Event::AddrRemoved {
                iface: handle,
                addr: IpAddress::Ipv4(old.address),
            });
        }
        ipv4.unicast[index] = Some(IfAddr::new(
            addr,
            addr_type,
            AddrState::Preferred,
            vlifetime == 0,
        ));

        net_debug!(
            "[{}]: [{}] added IPv4 address {} type {:?} lifetime {}",
            handle,
            index,
            addr,
            addr_type,
            vlifetime
        );
        self.events.push(Event::AddrAdded {
            iface: handle,
            addr: IpAddress::Ipv4(addr),
        });
        Ok(())
    }

    pub fn ipv4_addr_rm(&mut self, handle: InterfaceHandle, addr: &Ipv4Address) -> bool {
        let Some(ipv4) = self.ipv4_config_mut(handle) else {
            return false;
        };
        let Some(index) = ipv4.find_unicast(addr) else {
            return false;
        };
        ipv4.unicast[index] = None;

        net_debug!("[{}]: [{}] removed IPv4 address {}", handle, index, addr);
        self.events.push(Event::AddrRemoved {
            iface: handle,
            addr: IpAddress::Ipv4(*addr),
        });
        true
    }

    /// Find the interface owning `addr`.
    pub fn ipv4_addr_lookup(
        &self,
        addr: &Ipv4Address,
    ) -> Option<(InterfaceHandle, &IfAddr<Ipv4Address>)> {
        self.handles().find_map(|handle| {
            self.ipv4_addr_lookup_by_iface(handle, addr)
                .map(|ifaddr| (handle, ifaddr))
        })
    }

    pub fn ipv4_addr_lookup_by_iface(
        &self,
        handle: InterfaceHandle,
        addr: &Ipv4Address,
    ) -> Option<&IfAddr<Ipv4Address>> {
        let ipv4 = self.ipv4_config(handle)?;
        ipv4.find_unicast(addr)
            .and_then(|index| ipv4.unicast[index].as_ref())
    }

    /// Add a multicast group without joining it. Adding an existing group succeeds.
    pub fn ipv4_maddr_add(&mut self, handle: InterfaceHandle, addr: Ipv4Address) -> Result<(), Error> {
        if !addr.is_multicast() {
            return Err(Error::InvalidAddress);
        }

        let block = self.ipv4_block_get(handle)?;
        let ipv4 = &mut self.ipv4_blocks[block];
        if ipv4.find_mcast(&addr).is_some() {
            return Ok(());
        }
        let index = ipv4.mcast.iter().position(Option::is_none).ok_or_else(|| {
            net_debug!("[{}]: no free IPv4 multicast slot for {}", handle, addr);
            Error::Exhausted
        })?;
        ipv4.mcast[index] = Some(McastAddr::new(addr));

        net_debug!("[{}]: [{}] added IPv4 multicast {}", handle, index, addr);
        self.events.push(Event::MaddrAdded {
            iface: handle,
            addr: IpAddress::Ipv4(addr),
        });
        Ok(())
    }

    pub fn ipv4_maddr_rm(&mut self, handle: InterfaceHandle, addr: &Ipv4Address) -> bool {
        let Some(ipv4) = self.ipv4_config_mut(handle) else {
            return false;
        };
        let Some(index) = ipv4.find_mcast(addr) else {
            return false;
        };
        ipv4.mcast[index] = None;

        net_debug!("[{}]: [{}] removed IPv4 multicast {}", handle, index, addr);
        self.events.push(Event::MaddrRemoved {
            iface: handle,
            addr: IpAddress::Ipv4(*addr),
        });
        true
    }

    /// Find a multicast group, on `handle` only or on the first interface that has it.
    pub fn ipv4_maddr_lookup(
        &self,
        addr: &Ipv4Address,
        handle: Option<InterfaceHandle>,
    ) -> Option<(InterfaceHandle, &McastAddr<Ipv4Address>)> {
        self.scoped(handle).find_map(|h| {
            let ipv4 = self.ipv4_config(h)?;
            let index = ipv4.find_mcast(addr)?;
            ipv4.mcast[index].as_ref().map(|maddr| (h, maddr))
        })
    }

    /// Mark a group as joined. Joining a joined group succeeds without effect.
    pub fn ipv4_maddr_join(&mut self, handle: InterfaceHandle, addr: &Ipv4Address) -> Result<(), Error> {
        self.ipv4_maddr_set_joined(handle, addr, true)
    }

    /// Mark a group as left. Leaving a group not joined succeeds without effect.
    pub fn ipv4_maddr_leave(&mut self, handle: InterfaceHandle, addr: &Ipv4Address) -> Result<(), Error> {
        self.ipv4_maddr_set_joined(handle, addr, false)
    }

    fn ipv4_maddr_set_joined(
        &mut self,
        handle: InterfaceHandle,
        addr: &Ipv4Address,
        joined: bool,
    ) -> Result<(), Error> {
        let ipv4 = self.ipv4_config_mut(handle).ok_or(Error::NotFound)?;
        let maddr = ipv4
            .find_mcast(addr)
            .and_then(|index| ipv4.mcast[index].as_mut())
            .ok_or(Error::NotFound)?;
        if maddr.is_joined == joined {
            return Ok(());
        }
        maddr.is_joined = joined;
        self.notify_mcast(handle, IpAddress::Ipv4(*addr), joined);
        Ok(())
    }

    pub(super) fn notify_mcast(&mut self, handle: InterfaceHandle, addr: IpAddress, joined: bool) {
        net_debug!(
            "[{}]: {} multicast group {}",
            handle,
            if joined { "joined" } else { "left" },
            addr
        );
        self.events.push(if joined {
            Event::MaddrJoined {
                iface: handle,
                addr,
            }
        } else {
            Event::MaddrLeft {
                iface: handle,
                addr,
            }
        });
        self.registry.call_mcast_monitors(handle, &addr, joined);
    }

    /// Leave every joined IPv4 group of the interface.
    pub(super) fn ipv4_leave_all(&mut self, handle: InterfaceHandle) {
        for index in 0..IFACE_MAX_IPV4_MADDR_COUNT {
            let addr = match self.ipv4_config(handle).and_then(|ipv4| ipv4.mcast[index]) {
                Some(maddr) if maddr.is_joined => maddr.address,
                _ => continue,
            };
            let _ = self.ipv4_maddr_leave(handle, &addr);
        }
    }

    /// Whether `addr` is in the subnet of one of the interface's addresses.
    pub fn ipv4_addr_mask_cmp(&self, handle: InterfaceHandle, addr: &Ipv4Address) -> bool {
        self.ipv4_config(handle)
            .map_or(false, |ipv4| ipv4.mask_cmp(addr))
    }

    /// Whether `addr` is the broadcast address of the interface's subnet, or the
    /// limited broadcast address.
    pub fn ipv4_is_broadcast(&self, handle: InterfaceHandle, addr: &Ipv4Address) -> bool {
        if addr.is_broadcast() {
            return true;
        }
        let Some(ipv4) = self.ipv4_config(handle) else {
            return false;
        };
        let Some(netmask) = ipv4.netmask else {
            return false;
        };
        ipv4.unicast().any(|ifaddr| {
            Ipv4Cidr::from_netmask(ifaddr.address, netmask)
                .ok()
                .and_then(|cidr| cidr.broadcast())
                == Some(*addr)
        })
    }

    pub fn ipv4_set_netmask(&mut self, handle: InterfaceHandle, netmask: Ipv4Address) -> Result<(), Error> {
        if netmask.prefix_len().is_none() {
            return Err(Error::InvalidAddress);
        }
        let block = self.ipv4_block_get(handle)?;
        self.ipv4_blocks[block].netmask = Some(netmask);
        Ok(())
    }

    pub fn ipv4_netmask(&self, handle: InterfaceHandle) -> Option<Ipv4Address> {
        self.ipv4_config(handle)?.netmask
    }

    pub fn ipv4_set_gateway(&mut self, handle: InterfaceHandle, gateway: Ipv4Address) -> Result<(), Error> {
        let block = self.ipv4_block_get(handle)?;
        self.ipv4_blocks[block].gateway = if gateway.is_unspecified() {
            None
        } else {
            Some(gateway)
        };
        Ok(())
    }

    pub fn ipv4_gateway(&self, handle: InterfaceHandle) -> Option<Ipv4Address> {
        self.ipv4_config(handle)?.gateway
    }

    /// Unicast TTL of the interface; the configured default without an IPv4 block.
    pub fn ipv4_ttl(&self, handle: InterfaceHandle) -> Option<u8> {
        let iface = self.get(handle)?;
        Some(self.ipv4_config(handle).map_or(iface.config.ipv4_ttl, Ipv4Config::ttl))
    }

    pub fn ipv4_set_ttl(&mut self, handle: InterfaceHandle, ttl: u8) -> Result<(), Error> {
        let block = self.ipv4_block_get(handle)?;
        self.ipv4_blocks[block].ttl = ttl;
        Ok(())
    }

    pub fn ipv4_mcast_ttl(&self, handle: InterfaceHandle) -> Option<u8> {
        let iface = self.get(handle)?;
        Some(
            self.ipv4_config(handle)
                .map_or(iface.config.ipv4_mcast_ttl, Ipv4Config::mcast_ttl),
        )
    }

    pub fn ipv4_set_mcast_ttl(&mut self, handle: InterfaceHandle, ttl: u8) -> Result<(), Error> {
        let block = self.ipv4_block_get(handle)?;
        self.ipv4_blocks[block].mcast_ttl = ttl;
        Ok(())
    }

    /// The first link-local (169.254/16) address of the interface, optionally only
    /// one in `state`.
    pub fn ipv4_get_ll(&self, handle: InterfaceHandle, state: Option<AddrState>) -> Option<Ipv4Address> {
        self.ipv4_config(handle)?.link_local(state)
    }

    /// The first preferred, non link-local address of the interface.
    pub fn ipv4_get_global_addr(&self, handle: InterfaceHandle) -> Option<Ipv4Address> {
        self.ipv4_config(handle)?
            .unicast()
            .find(|a| a.state == AddrState::Preferred && !a.address.is_link_local())
            .map(|a| a.address)
    }

    /// Pick the source address for traffic to `dst`, from `handle` only or from any
    /// interface.
    ///
    /// Unicast destinations get the preferred address sharing the longest prefix with
    /// them; on a tie the first address found wins. Link-local and multicast
    /// destinations get a link-local source. Interfaces running link-local
    /// autoconfiguration fall back to their link-local address. The unspecified address
    /// is returned when nothing fits.
    pub fn ipv4_select_src_addr(&self, handle: Option<InterfaceHandle>, dst: &Ipv4Address) -> Ipv4Address {
        let src = if !dst.is_link_local() && !dst.is_multicast() {
            let mut best = None;
            let mut src = None;
            for h in self.scoped(handle) {
                if let Some(addr) = self
                    .ipv4_config(h)
                    .and_then(|ipv4| ipv4.best_match(dst, &mut best))
                {
                    src = Some(addr);
                }
            }
            src.or_else(|| {
                self.scoped(handle)
                    .filter(|h| self.get(*h).map_or(false, |i| i.config.ipv4_autoconf))
                    .find_map(|h| self.ipv4_get_ll(h, Some(AddrState::Preferred)))
            })
        } else {
            self.scoped(handle).find_map(|h| self.ipv4_get_ll(h, Some(AddrState::Preferred)))
        };

        src.unwrap_or(Ipv4Address::UNSPECIFIED)
    }

    /// The first interface with `dst` in one of its subnets, or the default interface.
    pub fn ipv4_select_src_iface(&self, dst: &Ipv4Address) -> Option<InterfaceHandle> {
        self.handles()
            .find(|h| self.ipv4_addr_mask_cmp(*h, dst))
            .or_else(|| self.default_iface())
    }
}
