use core::fmt;

use heapless::Vec;

use super::{Error, InterfaceHandle};
use crate::config::IFACE_MAX_CALLBACK_COUNT;
use crate::phy::{LinkError, Packet};
use crate::wire::{EthernetAddress, IpAddress};

/// Caller-chosen identity of a registered callback.
///
/// Registering again under the same identifier replaces the callback and moves it
/// to the front of its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CallbackId(pub u32);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cb{}", self.0)
    }
}

/// Called when a link layer reports a change of its link address or status.
pub type LinkCallback = fn(InterfaceHandle, &EthernetAddress, Result<(), LinkError>);

/// Called when an interface joins (`true`) or leaves (`false`) a multicast group.
pub type McastCallback = fn(InterfaceHandle, &IpAddress, bool);

/// Called when the transmit timestamp of a packet is known.
pub type TimestampCallback = fn(&Packet);

#[derive(Debug, Clone, Copy)]
struct McastMonitor {
    iface: Option<InterfaceHandle>,
    cb: McastCallback,
}

#[derive(Debug, Clone, Copy)]
struct TimestampHandler {
    iface: Option<InterfaceHandle>,
    packet_id: Option<u32>,
    cb: TimestampCallback,
}

/// A list with prepend-on-register semantics.
#[derive(Debug)]
struct List<T> {
    entries: Vec<(CallbackId, T), IFACE_MAX_CALLBACK_COUNT>,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        List {
            entries: Vec::new(),
        }
    }
}

impl<T> List<T> {
    fn register(&mut self, id: CallbackId, value: T) -> Result<(), Error> {
        self.unregister(id);
        self.entries.insert(0, (id, value)).map_err(|_| {
            net_debug!("callback {}: no free slot", id);
            Error::Exhausted
        })
    }

    fn unregister(&mut self, id: CallbackId) -> bool {
        match self.entries.iter().position(|(k, _)| *k == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().map(|(_, value)| value)
    }
}

/// Callbacks interested in interface activity.
///
/// The registry belongs to an [InterfaceSet](struct.InterfaceSet.html), which
/// invokes the multicast monitors itself on every group join and leave.
#[derive(Debug, Default)]
pub struct Registry {
    link: List<LinkCallback>,
    mcast: List<McastMonitor>,
    timestamp: List<TimestampHandler>,
}

impl Registry {
    pub fn register_link_cb(&mut self, id: CallbackId, cb: LinkCallback) -> Result<(), Error> {
        self.link.register(id, cb)
    }

    pub fn unregister_link_cb(&mut self, id: CallbackId) -> bool {
        self.link.unregister(id)
    }

    /// Invoke every link callback, most recently registered first.
    pub fn call_link_cb(
        &self,
        iface: InterfaceHandle,
        hardware_addr: &EthernetAddress,
        status: Result<(), LinkError>,
    ) {
        for cb in self.link.iter() {
            cb(iface, hardware_addr, status);
        }
    }

    /// Register a multicast monitor, scoped to `iface` or to every interface.
    pub fn register_mcast_monitor(
        &mut self,
        id: CallbackId,
        iface: Option<InterfaceHandle>,
        cb: McastCallback,
    ) -> Result<(), Error> {
        self.mcast.register(id, McastMonitor { iface, cb })
    }

    pub fn unregister_mcast_monitor(&mut self, id: CallbackId) -> bool {
        self.mcast.unregister(id)
    }

    pub(crate) fn call_mcast_monitors(&self, iface: InterfaceHandle, addr: &IpAddress, joined: bool) {
        for mon in self.mcast.iter() {
            if mon.iface.map_or(true, |scope| scope == iface) {
                (mon.cb)(iface, addr, joined);
            }
        }
    }

    /// Register a timestamp callback, optionally scoped to an interface and to one
    /// packet identifier.
    pub fn register_timestamp_cb(
        &mut self,
        id: CallbackId,
        iface: Option<InterfaceHandle>,
        packet_id: Option<u32>,
        cb: TimestampCallback,
    ) -> Result<(), Error> {
        self.timestamp.register(
            id,
            TimestampHandler {
                iface,
                packet_id,
                cb,
            },
        )
    }

    pub fn unregister_timestamp_cb(&mut self, id: CallbackId) -> bool {
        self.timestamp.unregister(id)
    }

    /// Invoke the timestamp callbacks matching the packet's interface and identifier.
    pub fn call_timestamp_cb(&self, packet: &Packet) {
        for handler in self.timestamp.iter() {
            let iface_match = handler.iface.map_or(true, |iface| iface == packet.meta.iface);
            let packet_match = handler.packet_id.map_or(true, |id| id == packet.meta.id);
            if iface_match && packet_match {
                (handler.cb)(packet);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phy::PacketMeta;
    use std::cell::RefCell;
    use std::vec::Vec as StdVec;

    thread_local! {
        static CALLS: RefCell<StdVec<&'static str>> = const { RefCell::new(StdVec::new()) };
    }

    fn record(name: &'static str) {
        CALLS.with(|calls| calls.borrow_mut().push(name));
    }

    fn take_calls() -> StdVec<&'static str> {
        CALLS.with(|calls| calls.borrow_mut().drain(..).collect())
    }

    fn link_a(_: InterfaceHandle, _: &EthernetAddress, _: Result<(), LinkError>) {
        record("a");
    }

    fn link_b(_: InterfaceHandle, _: &EthernetAddress, _: Result<(), LinkError>) {
        record("b");
    }

    fn mcast(_: InterfaceHandle, _: &IpAddress, joined: bool) {
        record(if joined { "join" } else { "leave" });
    }

    fn stamp(_: &Packet) {
        record("stamp");
    }

    #[test]
    fn test_link_cb_prepend() {
        let mut registry = Registry::default();
        registry.register_link_cb(CallbackId(1), link_a).unwrap();
        registry.register_link_cb(CallbackId(2), link_b).unwrap();
        registry.call_link_cb(InterfaceHandle::default(), &EthernetAddress::BROADCAST, Ok(()));
        assert_eq!(take_calls(), ["b", "a"]);

        // re-registering moves to the front
        registry.register_link_cb(CallbackId(1), link_a).unwrap();
        registry.call_link_cb(InterfaceHandle::default(), &EthernetAddress::BROADCAST, Ok(()));
        assert_eq!(take_calls(), ["a", "b"]);

        assert!(registry.unregister_link_cb(CallbackId(2)));
        assert!(!registry.unregister_link_cb(CallbackId(2)));
        registry.call_link_cb(InterfaceHandle::default(), &EthernetAddress::BROADCAST, Ok(()));
        assert_eq!(take_calls(), ["a"]);
    }

    #[test]
    fn test_link_cb_full() {
        let mut registry = Registry::default();
        for i in 0..IFACE_MAX_CALLBACK_COUNT {
            registry.register_link_cb(CallbackId(i as u32), link_a).unwrap();
        }
        assert_eq!(
            registry.register_link_cb(CallbackId(999), link_a),
            Err(Error::Exhausted)
        );
    }

    #[test]
    fn test_mcast_monitor_scope() {
        let mut registry = Registry::default();
        let scoped = InterfaceHandle::new(1);
        registry
            .register_mcast_monitor(CallbackId(1), Some(scoped), mcast)
            .unwrap();
        let addr = IpAddress::Ipv4(crate::wire::Ipv4Address::new(224, 0, 0, 251));
        registry.call_mcast_monitors(InterfaceHandle::new(0), &addr, true);
        assert!(take_calls().is_empty());
        registry.call_mcast_monitors(scoped, &addr, false);
        assert_eq!(take_calls(), ["leave"]);
    }

    #[test]
    fn test_timestamp_filter() {
        let mut registry = Registry::default();
        registry
            .register_timestamp_cb(CallbackId(1), None, Some(7), stamp)
            .unwrap();
        let mut meta = PacketMeta::default();
        meta.id = 3;
        let packet = Packet::zeroed(meta, 60).unwrap();
        registry.call_timestamp_cb(&packet);
        assert!(take_calls().is_empty());

        meta.id = 7;
        let packet = Packet::zeroed(meta, 60).unwrap();
        registry.call_timestamp_cb(&packet);
        assert_eq!(take_calls(), ["stamp"]);
    }
}
