use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::{LinkError, LinkLayer, Packet};
use crate::iface::InterfaceHandle;

/// A loopback link layer.
///
/// Every packet sent through this device is kept and can be taken back out of it
/// in FIFO order. Enable and promiscuous-mode requests are recorded.
#[derive(Debug, Default)]
pub struct Loopback {
    sent: VecDeque<Packet>,
    enables: Vec<(InterfaceHandle, bool)>,
    promisc: Vec<(InterfaceHandle, bool)>,
    fail_enable: Option<LinkError>,
    fail_send: Option<LinkError>,
}

impl Loopback {
    /// Creates a loopback device.
    pub fn new() -> Loopback {
        Loopback::default()
    }

    /// Take the oldest sent packet.
    pub fn receive(&mut self) -> Option<Packet> {
        self.sent.pop_front()
    }

    /// Number of sent packets not yet received.
    pub fn pending(&self) -> usize {
        self.sent.len()
    }

    /// Every `enable` request seen so far, oldest first.
    pub fn enables(&self) -> &[(InterfaceHandle, bool)] {
        &self.enables
    }

    /// Every `set_promisc` request seen so far, oldest first.
    pub fn promisc_requests(&self) -> &[(InterfaceHandle, bool)] {
        &self.promisc
    }

    /// Make subsequent `enable` requests fail with `err`, or succeed with `None`.
    pub fn fail_enable(&mut self, err: Option<LinkError>) {
        self.fail_enable = err;
    }

    /// Make subsequent transmissions fail with `err`, or succeed with `None`.
    pub fn fail_send(&mut self, err: Option<LinkError>) {
        self.fail_send = err;
    }
}

impl LinkLayer for Loopback {
    fn enable(&mut self, iface: InterfaceHandle, state: bool) -> Result<(), LinkError> {
        self.enables.push((iface, state));
        match self.fail_enable {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_promisc(&mut self, iface: InterfaceHandle, state: bool) -> Result<(), LinkError> {
        self.promisc.push((iface, state));
        Ok(())
    }

    fn send(&mut self, packet: Packet) -> Result<(), LinkError> {
        if let Some(err) = self.fail_send {
            net_debug!("loopback: dropping packet {}: {}", packet.meta.id, err);
            return Err(err);
        }
        self.sent.push_back(packet);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::phy::PacketMeta;

    fn packet(id: u32) -> Packet {
        let meta = PacketMeta {
            id,
            ..PacketMeta::default()
        };
        Packet::zeroed(meta, 60).unwrap()
    }

    #[test]
    fn test_fifo() {
        let mut device = Loopback::new();
        device.send(packet(1)).unwrap();
        device.send(packet(2)).unwrap();
        assert_eq!(device.pending(), 2);
        assert_eq!(device.receive().map(|p| p.meta.id), Some(1));
        assert_eq!(device.receive().map(|p| p.meta.id), Some(2));
        assert_eq!(device.receive(), None);
    }

    #[test]
    fn test_failing_send() {
        let mut device = Loopback::new();
        device.fail_send(Some(LinkError::Down));
        assert_eq!(device.send(packet(1)), Err(LinkError::Down));
        assert_eq!(device.pending(), 0);
    }

    #[test]
    fn test_records_enable() {
        let mut device = Loopback::new();
        let iface = InterfaceHandle::default();
        device.enable(iface, true).unwrap();
        device.fail_enable(Some(LinkError::Io));
        assert_eq!(device.enable(iface, false), Err(LinkError::Io));
        assert_eq!(device.enables(), &[(iface, true), (iface, false)]);
    }
}
