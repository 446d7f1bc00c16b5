use crate::config::IFACE_MAX_ROUTER_COUNT;
use crate::time::{Duration, Instant};
use crate::timer::TimerList;
use crate::wire::{IpAddress, IpVersion};

use super::InterfaceHandle;

/// A router known to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Router {
    iface: InterfaceHandle,
    address: IpAddress,
    is_default: bool,
    is_infinite: bool,
}

impl Router {
    pub fn iface(&self) -> InterfaceHandle {
        self.iface
    }

    pub fn address(&self) -> IpAddress {
        self.address
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Whether the router has no lifetime timer.
    pub fn is_infinite(&self) -> bool {
        self.is_infinite
    }
}

/// The router pool shared by every interface.
///
/// At most one entry exists per interface, address family and address.
#[derive(Debug)]
pub struct Routers {
    slots: [Option<Router>; IFACE_MAX_ROUTER_COUNT],
    timers: TimerList<usize, IFACE_MAX_ROUTER_COUNT>,
}

impl Default for Routers {
    fn default() -> Self {
        Self::new()
    }
}

impl Routers {
    pub const fn new() -> Self {
        Routers {
            slots: [None; IFACE_MAX_ROUTER_COUNT],
            timers: TimerList::new(),
        }
    }

    fn find(&self, iface: InterfaceHandle, addr: &IpAddress) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.map_or(false, |r| r.iface == iface && r.address == *addr)
        })
    }

    /// Add or refresh a router. Returns `None` if the pool is full.
    ///
    /// A non-zero `lifetime` arms the expiry timer; zero makes the entry infinite.
    pub(crate) fn add(
        &mut self,
        now: Instant,
        iface: InterfaceHandle,
        address: IpAddress,
        is_default: bool,
        lifetime: u16,
    ) -> Option<(Router, bool)> {
        let (index, is_new) = match self.find(iface, &address) {
            Some(index) => (index, false),
            None => (self.slots.iter().position(Option::is_none)?, true),
        };

        let router = Router {
            iface,
            address,
            is_default,
            is_infinite: lifetime == 0,
        };
        self.slots[index] = Some(router);
        self.set_timer(now, index, lifetime);

        net_debug!(
            "[{}] iface {} router {} lifetime {} default {} {}",
            index,
            iface,
            address,
            lifetime,
            is_default,
            if is_new { "added" } else { "refreshed" }
        );
        Some((router, is_new))
    }

    fn set_timer(&mut self, now: Instant, index: usize, lifetime: u16) {
        if lifetime == 0 {
            self.timers.cancel(index);
            return;
        }
        let deadline = now + Duration::from_secs(lifetime as u64);
        if self.timers.arm(index, deadline).is_err() {
            net_debug!("router timer list full");
        }
    }

    pub(crate) fn update_lifetime(
        &mut self,
        now: Instant,
        iface: InterfaceHandle,
        address: &IpAddress,
        lifetime: u16,
    ) -> bool {
        let Some(index) = self.find(iface, address) else {
            return false;
        };
        net_debug!("updating expire time of {} by {} secs", address, lifetime);
        if let Some(router) = self.slots[index].as_mut() {
            router.is_infinite = lifetime == 0;
        }
        self.set_timer(now, index, lifetime);
        true
    }

    pub(crate) fn remove(&mut self, iface: InterfaceHandle, address: &IpAddress) -> Option<Router> {
        let index = self.find(iface, address)?;
        self.timers.cancel(index);
        self.slots[index].take()
    }

    /// Remove every router of `iface` in the `version` family, handing each to `f`.
    pub(crate) fn remove_iface<F>(&mut self, iface: InterfaceHandle, version: IpVersion, mut f: F)
    where
        F: FnMut(Router),
    {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.map_or(false, |r| r.iface == iface && r.address.version() == version) {
                if let Some(router) = slot.take() {
                    f(router);
                }
                self.timers.cancel(index);
            }
        }
    }

    pub fn lookup(&self, iface: InterfaceHandle, address: &IpAddress) -> Option<&Router> {
        self.find(iface, address)
            .and_then(|index| self.slots[index].as_ref())
    }

    /// The first default router of the given family, optionally on `iface` only.
    pub fn find_default(
        &self,
        iface: Option<InterfaceHandle>,
        version: IpVersion,
    ) -> Option<&Router> {
        self.iter().find(|r| {
            r.is_default
                && r.address.version() == version
                && iface.map_or(true, |iface| iface == r.iface)
        })
    }

    /// When the router was set to expire, if it has a lifetime.
    pub fn expires_at(&self, iface: InterfaceHandle, address: &IpAddress) -> Option<Instant> {
        self.find(iface, address)
            .and_then(|index| self.timers.deadline(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Router> + '_ {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub(crate) fn poll_at(&self) -> Option<Instant> {
        self.timers.poll_at()
    }

    /// Take the next router whose lifetime ended at or before `now`.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<Router> {
        while let Some(index) = self.timers.pop_expired(now) {
            if let Some(router) = self.slots[index].take() {
                net_debug!("router {} expired", router.address);
                return Some(router);
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::{Ipv4Address, Ipv6Address};

    const IFACE: InterfaceHandle = InterfaceHandle::new(0);
    const OTHER: InterfaceHandle = InterfaceHandle::new(1);

    fn v6(last: u16) -> IpAddress {
        IpAddress::Ipv6(Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, last))
    }

    fn v4(last: u8) -> IpAddress {
        IpAddress::Ipv4(Ipv4Address::new(192, 0, 2, last))
    }

    #[test]
    fn test_add_refreshes_existing() {
        let mut routers = Routers::new();
        let now = Instant::from_secs(0);
        let (_, is_new) = routers.add(now, IFACE, v6(1), true, 10).unwrap();
        assert!(is_new);
        let (_, is_new) = routers.add(now, IFACE, v6(1), true, 20).unwrap();
        assert!(!is_new);
        assert_eq!(routers.iter().count(), 1);
        assert_eq!(routers.expires_at(IFACE, &v6(1)), Some(Instant::from_secs(20)));
    }

    #[test]
    fn test_same_address_other_iface() {
        let mut routers = Routers::new();
        let now = Instant::from_secs(0);
        routers.add(now, IFACE, v4(1), true, 0).unwrap();
        routers.add(now, OTHER, v4(1), true, 0).unwrap();
        assert_eq!(routers.iter().count(), 2);
    }

    #[test]
    fn test_full() {
        let mut routers = Routers::new();
        let now = Instant::from_secs(0);
        for i in 0..IFACE_MAX_ROUTER_COUNT {
            assert!(routers.add(now, IFACE, v4(i as u8 + 1), false, 0).is_some());
        }
        assert!(routers.add(now, IFACE, v4(200), false, 0).is_none());
    }

    #[test]
    fn test_find_default() {
        let mut routers = Routers::new();
        let now = Instant::from_secs(0);
        routers.add(now, IFACE, v4(1), false, 0).unwrap();
        routers.add(now, OTHER, v4(2), true, 0).unwrap();
        routers.add(now, IFACE, v6(1), true, 30).unwrap();

        assert_eq!(
            routers.find_default(None, IpVersion::Ipv4).map(|r| r.address()),
            Some(v4(2))
        );
        assert!(routers.find_default(Some(IFACE), IpVersion::Ipv4).is_none());
        assert_eq!(
            routers.find_default(Some(IFACE), IpVersion::Ipv6).map(|r| r.address()),
            Some(v6(1))
        );
    }

    #[test]
    fn test_expiry_in_deadline_order() {
        let mut routers = Routers::new();
        let now = Instant::from_secs(0);
        routers.add(now, IFACE, v6(1), true, 30).unwrap();
        routers.add(now, IFACE, v6(2), true, 10).unwrap();
        routers.add(now, IFACE, v6(3), false, 0).unwrap();
        assert_eq!(routers.poll_at(), Some(Instant::from_secs(10)));

        let later = Instant::from_secs(60);
        assert_eq!(routers.pop_expired(later).map(|r| r.address()), Some(v6(2)));
        assert_eq!(routers.pop_expired(later).map(|r| r.address()), Some(v6(1)));
        assert_eq!(routers.pop_expired(later), None);
        assert_eq!(routers.iter().count(), 1);
        assert_eq!(routers.poll_at(), None);
    }

    #[test]
    fn test_remove_cancels_timer() {
        let mut routers = Routers::new();
        let now = Instant::from_secs(0);
        routers.add(now, IFACE, v6(1), true, 30).unwrap();
        assert!(routers.remove(IFACE, &v6(1)).is_some());
        assert_eq!(routers.poll_at(), None);
        assert!(routers.remove(IFACE, &v6(1)).is_none());
    }
}
