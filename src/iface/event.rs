use heapless::Deque;

use super::InterfaceHandle;
use crate::config::IFACE_MAX_EVENT_COUNT;
use crate::wire::{IpAddress, Ipv6Address, Ipv6Cidr};

/// A management event raised by an [InterfaceSet](struct.InterfaceSet.html).
///
/// Some events are notifications, others ask a protocol layer outside this crate
/// to act: `DadStarted` asks for neighbor solicitations to be sent for the
/// address, `RsSend` for a router solicitation, `NeighborRemove` for a neighbor
/// cache entry to be dropped, and the IPv4 autoconf events start or reset
/// link-local address configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    AdminUp { iface: InterfaceHandle },
    AdminDown { iface: InterfaceHandle },
    OperUp { iface: InterfaceHandle },
    OperDown { iface: InterfaceHandle },
    AddrAdded { iface: InterfaceHandle, addr: IpAddress },
    AddrRemoved { iface: InterfaceHandle, addr: IpAddress },
    AddrDeprecated { iface: InterfaceHandle, addr: Ipv6Address },
    MaddrAdded { iface: InterfaceHandle, addr: IpAddress },
    MaddrRemoved { iface: InterfaceHandle, addr: IpAddress },
    MaddrJoined { iface: InterfaceHandle, addr: IpAddress },
    MaddrLeft { iface: InterfaceHandle, addr: IpAddress },
    PrefixAdded { iface: InterfaceHandle, prefix: Ipv6Cidr },
    PrefixRemoved { iface: InterfaceHandle, prefix: Ipv6Cidr },
    RouterAdded { iface: InterfaceHandle, addr: IpAddress },
    RouterRemoved { iface: InterfaceHandle, addr: IpAddress },
    DadStarted { iface: InterfaceHandle, addr: Ipv6Address },
    DadSucceeded { iface: InterfaceHandle, addr: Ipv6Address },
    DadFailed { iface: InterfaceHandle, addr: Ipv6Address },
    NeighborRemove { iface: InterfaceHandle, addr: Ipv6Address },
    RsSend { iface: InterfaceHandle },
    RsExhausted { iface: InterfaceHandle },
    Ipv4AutoconfStart { iface: InterfaceHandle },
    Ipv4AutoconfReset { iface: InterfaceHandle },
}

/// Bounded FIFO of pending events. The oldest event is dropped on overflow.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: Deque<Event, IFACE_MAX_EVENT_COUNT>,
}

impl EventQueue {
    pub(crate) fn push(&mut self, event: Event) {
        net_trace!("event: {:?}", event);
        if self.events.is_full() {
            let _dropped = self.events.pop_front();
            net_debug!("event queue full, dropping {:?}", _dropped);
        }
        let _ = self.events.push_back(event);
    }

    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = EventQueue::default();
        let iface = InterfaceHandle::default();
        queue.push(Event::AdminUp { iface });
        queue.push(Event::OperUp { iface });
        assert_eq!(queue.pop(), Some(Event::AdminUp { iface }));
        assert_eq!(queue.pop(), Some(Event::OperUp { iface }));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut queue = EventQueue::default();
        for i in 0..IFACE_MAX_EVENT_COUNT + 1 {
            queue.push(Event::RsSend {
                iface: InterfaceHandle::new(i),
            });
        }
        assert_eq!(queue.len(), IFACE_MAX_EVENT_COUNT);
        assert_eq!(
            queue.pop(),
            Some(Event::RsSend {
                iface: InterfaceHandle::new(1)
            })
        );
    }
}
