/*! Access to the link layer.

The `phy` module describes what the bookkeeping in this crate needs from the
*network devices* below it: a way to enable and disable an interface, to switch
promiscuous reception, and to hand a finished frame to the driver. That contract is
the [LinkLayer](trait.LinkLayer.html) trait.

Frames travel as [Packet](struct.Packet.html)s: a fixed-capacity Ethernet frame
buffer plus a little [PacketMeta](struct.PacketMeta.html) naming the interface it
belongs to and an identifier the caller can use to recognise it later.

A capturing [Loopback](struct.Loopback.html) device is provided for testing.
*/

use core::fmt;

use heapless::Vec;

use crate::config::IFACE_MAX_FRAME_LEN;
use crate::iface::InterfaceHandle;
use crate::wire::{self, EthernetAddress, EthernetFrame, ETHERNET_HEADER_LEN};

#[cfg(feature = "alloc")]
mod loopback;

#[cfg(feature = "alloc")]
pub use self::loopback::Loopback;

bitflags::bitflags! {
    /// What a link layer is able to do.
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct LinkFlags: u8 {
        /// The link delivers multicast frames, so group membership matters.
        const MULTICAST = 0b0000_0001;
        /// The link does not need solicited-node groups to be joined explicitly.
        const MULTICAST_SKIP_JOIN_SOLICIT_NODE = 0b0000_0010;
        /// The link can receive frames not addressed to it.
        const PROMISC_MODE = 0b0000_0100;
        /// The link connects exactly two nodes.
        const POINT_TO_POINT = 0b0000_1000;
    }
}

impl Default for LinkFlags {
    fn default() -> Self {
        LinkFlags::MULTICAST
    }
}

/// Error returned by a link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The device is not running.
    Down,
    /// The transmit queue is full.
    Exhausted,
    /// The device does not support the request.
    Unsupported,
    /// The device reported a hardware or driver failure.
    Io,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Down => write!(f, "link down"),
            LinkError::Exhausted => write!(f, "link transmit queue exhausted"),
            LinkError::Unsupported => write!(f, "not supported by link"),
            LinkError::Io => write!(f, "link I/O failure"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {}

/// Metadata carried alongside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PacketMeta {
    /// Caller-chosen identifier of the packet.
    ///
    /// Two packets with the same identifier are considered the same packet, e.g. when
    /// a retransmission is queued behind an address resolution that is already
    /// waiting.
    pub id: u32,
    /// The interface the packet leaves through.
    pub iface: InterfaceHandle,
}

/// An Ethernet frame with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub meta: PacketMeta,
    frame: Vec<u8, IFACE_MAX_FRAME_LEN>,
}

impl Packet {
    /// Copy `frame` into a new packet.
    ///
    /// Fails if the frame is shorter than an Ethernet header or longer than
    /// `IFACE_MAX_FRAME_LEN`.
    pub fn from_slice(meta: PacketMeta, frame: &[u8]) -> wire::Result<Packet> {
        if frame.len() < ETHERNET_HEADER_LEN {
            return Err(wire::Error);
        }
        let frame = Vec::from_slice(frame).map_err(|_| wire::Error)?;
        Ok(Packet { meta, frame })
    }

    /// Create a zero-filled packet of `len` octets, to be filled through
    /// [frame_mut](#method.frame_mut).
    pub fn zeroed(meta: PacketMeta, len: usize) -> wire::Result<Packet> {
        if len < ETHERNET_HEADER_LEN {
            return Err(wire::Error);
        }
        let mut frame = Vec::new();
        frame.resize(len, 0).map_err(|_| wire::Error)?;
        Ok(Packet { meta, frame })
    }

    /// Return the frame octets.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Return the frame octets, mutably.
    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.frame
    }

    /// Return the Ethernet view of the frame.
    pub fn ethernet(&self) -> EthernetFrame<&[u8]> {
        EthernetFrame::new_unchecked(&self.frame[..])
    }

    /// Return the destination hardware address.
    pub fn dst_hardware_addr(&self) -> EthernetAddress {
        self.ethernet().dst_addr()
    }

    /// Rewrite the link-layer source and destination of the frame.
    pub fn set_hardware_addrs(&mut self, src: EthernetAddress, dst: EthernetAddress) {
        let mut frame = EthernetFrame::new_unchecked(&mut self.frame[..]);
        frame.set_src_addr(src);
        frame.set_dst_addr(dst);
    }

    /// Rewrite the link-layer destination of the frame only.
    pub fn set_dst_hardware_addr(&mut self, dst: EthernetAddress) {
        EthernetFrame::new_unchecked(&mut self.frame[..]).set_dst_addr(dst);
    }
}

/// The driver side of an interface.
///
/// All methods take the interface the request is about, so one implementation may
/// serve several interfaces.
pub trait LinkLayer {
    /// Enable or disable the interface in hardware.
    ///
    /// Links without an enable hook keep the default, which always succeeds.
    fn enable(&mut self, iface: InterfaceHandle, state: bool) -> Result<(), LinkError> {
        let _ = (iface, state);
        Ok(())
    }

    /// Switch promiscuous reception on or off.
    fn set_promisc(&mut self, iface: InterfaceHandle, state: bool) -> Result<(), LinkError> {
        let _ = (iface, state);
        Err(LinkError::Unsupported)
    }

    /// Transmit a finished frame on `packet.meta.iface`.
    fn send(&mut self, packet: Packet) -> Result<(), LinkError>;
}

impl<T: LinkLayer + ?Sized> LinkLayer for &mut T {
    fn enable(&mut self, iface: InterfaceHandle, state: bool) -> Result<(), LinkError> {
        (**self).enable(iface, state)
    }

    fn set_promisc(&mut self, iface: InterfaceHandle, state: bool) -> Result<(), LinkError> {
        (**self).set_promisc(iface, state)
    }

    fn send(&mut self, packet: Packet) -> Result<(), LinkError> {
        (**self).send(packet)
    }
}
