mod ipv6;

use std::cell::RefCell;
use std::vec::Vec;

use rstest::*;

use super::*;
use crate::iface::CallbackId;
use crate::phy::Loopback;
use crate::tests::{drain_events, setup, setup_up, HW_ADDR_2};
use crate::wire::{Ipv6AddressExt, IPV6_LINK_LOCAL_ALL_NODES};

fn config_with(hardware_addr: EthernetAddress, flags: Flags) -> Config {
    let mut config = Config::new(hardware_addr);
    config.flags = flags;
    config
}

#[test]
fn test_add_rejects_non_unicast_hardware_addr() {
    let mut ifaces = InterfaceSet::new(vec![]);
    assert_eq!(
        ifaces.add(Config::new(EthernetAddress::BROADCAST)),
        Err(Error::InvalidAddress)
    );
    assert!(ifaces.is_empty());
}

#[test]
fn test_add_borrowed_storage_full() {
    let mut storage = [None, None];
    let mut ifaces = InterfaceSet::new(&mut storage[..]);
    let first = ifaces.add(Config::default()).unwrap();
    ifaces.add(Config::new(HW_ADDR_2)).unwrap();
    assert_eq!(ifaces.add(Config::default()), Err(Error::Exhausted));

    assert_eq!(ifaces.len(), 2);
    assert_eq!(ifaces.default_iface(), Some(first));
    assert_eq!(ifaces.by_hardware_addr(&HW_ADDR_2), Some(InterfaceHandle::new(1)));
}

#[test]
fn test_new_interface_is_down() {
    let (ifaces, handle, _device) = setup(LinkFlags::MULTICAST);
    let iface = ifaces.get(handle).unwrap();
    assert!(!iface.is_up());
    assert!(!iface.is_running());
    assert_eq!(iface.oper_state(), OperState::Down);
    assert!(iface.flags().contains(Flags::LOWER_UP));
    assert!(!iface.has_ipv4());
    assert!(!iface.has_ipv6());
}

#[test]
fn test_up_starts_dad_and_rs() {
    let (mut ifaces, handle, mut device) = setup(LinkFlags::MULTICAST);
    ifaces.up(Instant::ZERO, handle, &mut device).unwrap();

    let iface = ifaces.get(handle).unwrap();
    assert!(iface.is_up());
    assert!(iface.is_running());
    assert!(iface.flags().contains(Flags::RUNNING));
    assert_eq!(device.enables(), &[(handle, true)]);

    let ll = Ipv6Address::link_local_from_eui64(&iface.hardware_addr());
    let events = drain_events(&mut ifaces);
    assert_eq!(events[0], Event::AdminUp { iface: handle });
    assert_eq!(events[1], Event::OperUp { iface: handle });
    assert!(events.contains(&Event::DadStarted {
        iface: handle,
        addr: ll
    }));
    assert!(events.contains(&Event::AddrAdded {
        iface: handle,
        addr: IpAddress::Ipv6(ll)
    }));
    assert_eq!(events.last(), Some(&Event::RsSend { iface: handle }));

    // bringing it up again does nothing
    ifaces.up(Instant::ZERO, handle, &mut device).unwrap();
    assert!(drain_events(&mut ifaces).is_empty());
    assert_eq!(device.enables().len(), 1);
}

#[test]
fn test_up_fails_when_link_refuses() {
    let (mut ifaces, handle, mut device) = setup(LinkFlags::MULTICAST);
    device.fail_enable(Some(LinkError::Io));
    assert_eq!(
        ifaces.up(Instant::ZERO, handle, &mut device),
        Err(Error::Link(LinkError::Io))
    );
    assert!(!ifaces.get(handle).unwrap().is_up());
    assert!(drain_events(&mut ifaces).is_empty());
}

#[test]
fn test_down_leaves_groups() {
    let (mut ifaces, handle, mut device) = setup_up(LinkFlags::MULTICAST);
    ifaces.down(Instant::ZERO, handle, &mut device).unwrap();

    let events = drain_events(&mut ifaces);
    assert_eq!(events[0], Event::AdminDown { iface: handle });
    assert_eq!(events[1], Event::OperDown { iface: handle });
    assert!(events.contains(&Event::MaddrLeft {
        iface: handle,
        addr: IpAddress::Ipv6(IPV6_LINK_LOCAL_ALL_NODES)
    }));

    let iface = ifaces.get(handle).unwrap();
    assert!(!iface.is_running());
    assert_eq!(device.enables(), &[(handle, true), (handle, false)]);
    // no DAD or RS left running
    assert_eq!(ifaces.poll_at(), None);
}

#[test]
fn test_unknown_handle() {
    let (mut ifaces, _, mut device) = setup(LinkFlags::MULTICAST);
    let bogus = InterfaceHandle::new(7);
    assert_eq!(
        ifaces.up(Instant::ZERO, bogus, &mut device),
        Err(Error::NotFound)
    );
    assert_eq!(ifaces.carrier_on(Instant::ZERO, bogus), Err(Error::NotFound));
    assert!(ifaces.get(bogus).is_none());
}

#[test]
fn test_carrier_changes_oper_state() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);

    ifaces.carrier_off(Instant::ZERO, handle).unwrap();
    assert_eq!(ifaces.get(handle).unwrap().oper_state(), OperState::Down);
    assert!(ifaces.get(handle).unwrap().is_up());
    assert!(drain_events(&mut ifaces).contains(&Event::OperDown { iface: handle }));

    ifaces.carrier_on(Instant::ZERO, handle).unwrap();
    assert_eq!(ifaces.get(handle).unwrap().oper_state(), OperState::Up);
    assert!(drain_events(&mut ifaces).contains(&Event::OperUp { iface: handle }));
}

#[test]
fn test_dormant_and_device_ready() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);

    ifaces.dormant_on(Instant::ZERO, handle).unwrap();
    assert_eq!(ifaces.get(handle).unwrap().oper_state(), OperState::Dormant);
    ifaces.dormant_off(Instant::ZERO, handle).unwrap();
    assert_eq!(ifaces.get(handle).unwrap().oper_state(), OperState::Up);

    ifaces.set_device_ready(Instant::ZERO, handle, false).unwrap();
    let iface = ifaces.get(handle).unwrap();
    assert_eq!(iface.oper_state(), OperState::LowerLayerDown);
    assert!(!iface.is_device_ready());
}

#[rstest]
#[case::down(Flags::empty(), true, OperState::Down)]
#[case::not_ready(Flags::UP, false, OperState::LowerLayerDown)]
#[case::no_carrier(Flags::UP, true, OperState::Down)]
#[case::dormant(Flags::UP | Flags::LOWER_UP | Flags::DORMANT, true, OperState::Dormant)]
#[case::up(Flags::UP | Flags::LOWER_UP, true, OperState::Up)]
fn test_oper_state_of(#[case] flags: Flags, #[case] ready: bool, #[case] expected: OperState) {
    assert_eq!(oper_state_of(flags, ready), expected);
}

#[test]
fn test_post_init_skips_no_auto_start() {
    let mut ifaces = InterfaceSet::new(vec![]);
    let auto = ifaces.add(Config::default()).unwrap();
    let manual = ifaces
        .add(config_with(HW_ADDR_2, Flags::NO_AUTO_START))
        .unwrap();
    let mut device = Loopback::new();

    ifaces.post_init(Instant::ZERO, &mut device);
    assert!(ifaces.get(auto).unwrap().is_up());
    assert!(!ifaces.get(manual).unwrap().is_up());
}

#[test]
fn test_suspend_resume() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::MULTICAST);
    assert_eq!(ifaces.resume(handle), Err(Error::Already));
    ifaces.suspend(handle).unwrap();
    assert!(ifaces.is_suspended(handle));
    assert_eq!(ifaces.suspend(handle), Err(Error::Already));
    ifaces.resume(handle).unwrap();
    assert!(!ifaces.is_suspended(handle));
}

#[test]
fn test_promisc_unsupported() {
    let (mut ifaces, handle, mut device) = setup(LinkFlags::MULTICAST);
    assert_eq!(
        ifaces.set_promisc(handle, &mut device),
        Err(Error::NotSupported)
    );
    assert!(device.promisc_requests().is_empty());
}

#[test]
fn test_promisc() {
    let (mut ifaces, handle, mut device) = setup(LinkFlags::MULTICAST | LinkFlags::PROMISC_MODE);
    ifaces.set_promisc(handle, &mut device).unwrap();
    assert!(ifaces.is_promisc(handle));
    assert_eq!(ifaces.set_promisc(handle, &mut device), Err(Error::Already));

    ifaces.unset_promisc(handle, &mut device).unwrap();
    assert!(!ifaces.is_promisc(handle));
    ifaces.unset_promisc(handle, &mut device).unwrap();
    assert_eq!(device.promisc_requests(), &[(handle, true), (handle, false)]);
}

#[test]
fn test_point_to_point_link() {
    let (ifaces, handle, _device) = setup(LinkFlags::POINT_TO_POINT);
    assert!(ifaces
        .get(handle)
        .unwrap()
        .flags()
        .contains(Flags::POINT_TO_POINT));
}

#[test]
fn test_router_lifetime() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::MULTICAST);
    let addr = Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
    let router = ifaces
        .ipv6_router_add(Instant::ZERO, handle, addr, 30)
        .unwrap();
    assert!(router.is_default());
    assert!(!router.is_infinite());
    assert_eq!(
        drain_events(&mut ifaces),
        [Event::RouterAdded {
            iface: handle,
            addr: IpAddress::Ipv6(addr)
        }]
    );

    assert!(ifaces
        .router_find_default(Some(handle), IpVersion::Ipv6)
        .is_some());
    assert!(ifaces.router_find_default(None, IpVersion::Ipv4).is_none());
    assert_eq!(ifaces.poll_at(), Some(Instant::from_secs(30)));

    // refreshing does not announce the router again
    ifaces
        .ipv6_router_add(Instant::from_secs(10), handle, addr, 30)
        .unwrap();
    assert!(drain_events(&mut ifaces).is_empty());

    assert!(!ifaces.poll(Instant::from_secs(30)));
    assert!(ifaces.poll(Instant::from_secs(40)));
    assert_eq!(
        drain_events(&mut ifaces),
        [Event::RouterRemoved {
            iface: handle,
            addr: IpAddress::Ipv6(addr)
        }]
    );
    assert!(ifaces.router_lookup(handle, &IpAddress::Ipv6(addr)).is_none());
}

#[test]
fn test_router_update_and_remove() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::MULTICAST);
    let addr = IpAddress::Ipv4(Ipv4Address::new(192, 168, 1, 1));
    ifaces
        .ipv4_router_add(Instant::ZERO, handle, Ipv4Address::new(192, 168, 1, 1), true, 10)
        .unwrap();
    assert!(ifaces.router_update_lifetime(Instant::ZERO, handle, &addr, 0));
    assert!(ifaces.router_lookup(handle, &addr).unwrap().is_infinite());
    assert_eq!(ifaces.poll_at(), None);

    assert!(ifaces.router_rm(handle, &addr));
    assert!(!ifaces.router_rm(handle, &addr));
    assert!(!ifaces.router_update_lifetime(Instant::ZERO, handle, &addr, 5));
}

#[test]
fn test_poll_delay_follows_dad() {
    let (ifaces, _, _device) = setup_up(LinkFlags::MULTICAST);
    assert_eq!(ifaces.poll_at(), Some(Instant::from_millis(100)));
    assert_eq!(
        ifaces.poll_delay(Instant::from_millis(40)),
        Some(Duration::from_millis(60))
    );
    assert_eq!(
        ifaces.poll_delay(Instant::from_millis(400)),
        Some(Duration::ZERO)
    );
}

thread_local! {
    static MCAST_CALLS: RefCell<Vec<(InterfaceHandle, IpAddress, bool)>> = const { RefCell::new(Vec::new()) };
}

fn record_mcast(iface: InterfaceHandle, addr: &IpAddress, joined: bool) {
    MCAST_CALLS.with(|calls| calls.borrow_mut().push((iface, *addr, joined)));
}

#[test]
fn test_mcast_monitor_called() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::MULTICAST);
    ifaces
        .registry_mut()
        .register_mcast_monitor(CallbackId(1), Some(handle), record_mcast)
        .unwrap();

    let group = Ipv4Address::new(224, 0, 0, 251);
    ifaces.ipv4_maddr_add(handle, group).unwrap();
    ifaces.ipv4_maddr_join(handle, &group).unwrap();
    ifaces.ipv4_maddr_join(handle, &group).unwrap();
    ifaces.ipv4_maddr_leave(handle, &group).unwrap();

    let calls = MCAST_CALLS.with(|calls| calls.borrow_mut().drain(..).collect::<Vec<_>>());
    assert_eq!(
        calls,
        [
            (handle, IpAddress::Ipv4(group), true),
            (handle, IpAddress::Ipv4(group), false)
        ]
    );
}

#[test]
fn test_select_src_iface_default() {
    let (ifaces, handle, _device) = setup(LinkFlags::MULTICAST);
    let dst = IpAddress::Ipv4(Ipv4Address::new(8, 8, 8, 8));
    assert_eq!(ifaces.select_src_iface(&dst), Some(handle));
}
