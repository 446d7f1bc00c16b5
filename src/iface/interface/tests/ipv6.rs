use super::*;
use crate::config::{IFACE_MAX_IPV6_ADDR_COUNT, IPV6_CONFIG_BLOCK_COUNT};
use crate::wire::{Ipv6AddressExt, Ipv6Cidr};

const GLOBAL: Ipv6Address = Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
const ULA: Ipv6Address = Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);

fn ll_of(ifaces: &InterfaceSet, handle: InterfaceHandle) -> Ipv6Address {
    Ipv6Address::link_local_from_eui64(&ifaces.get(handle).unwrap().hardware_addr())
}

fn cidr(addr: Ipv6Address, prefix_len: u8) -> Ipv6Cidr {
    Ipv6Cidr::new(addr, prefix_len)
}

fn state_of(ifaces: &InterfaceSet, handle: InterfaceHandle, addr: &Ipv6Address) -> AddrState {
    ifaces
        .ipv6_addr_lookup_by_iface(handle, addr)
        .unwrap()
        .state()
}

/// An interface that is up and skips neighbor discovery, so every address is preferred.
fn setup_no_nd<'a>() -> (InterfaceSet<'a>, InterfaceHandle) {
    let mut config = Config::default();
    config.flags = Flags::IPV6_NO_ND;
    let mut ifaces = InterfaceSet::new(vec![]);
    let handle = ifaces.add(config).unwrap();
    ifaces
        .up(Instant::ZERO, handle, &mut Loopback::new())
        .unwrap();
    drain_events(&mut ifaces);
    (ifaces, handle)
}

#[rstest]
#[case::multicast(IPV6_LINK_LOCAL_ALL_NODES)]
#[case::unspecified(Ipv6Address::UNSPECIFIED)]
fn test_addr_add_rejects(#[case] addr: Ipv6Address) {
    let (mut ifaces, handle, _device) = setup(LinkFlags::MULTICAST);
    assert_eq!(
        ifaces.ipv6_addr_add(Instant::ZERO, handle, addr, AddrType::Manual, 0),
        Err(Error::InvalidAddress)
    );
}

#[test]
fn test_addr_add_while_down_waits_for_dad() {
    let (mut ifaces, handle, mut device) = setup(LinkFlags::MULTICAST);
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Manual, 0)
        .unwrap();
    assert_eq!(state_of(&ifaces, handle, &GLOBAL), AddrState::Tentative);
    assert_eq!(ifaces.poll_at(), None);

    let events = drain_events(&mut ifaces);
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::DadStarted { .. })));
    assert!(events.contains(&Event::MaddrJoined {
        iface: handle,
        addr: IpAddress::Ipv6(GLOBAL.solicited_node())
    }));

    ifaces.up(Instant::ZERO, handle, &mut device).unwrap();
    let events = drain_events(&mut ifaces);
    for addr in [ll_of(&ifaces, handle), GLOBAL] {
        assert!(events.contains(&Event::DadStarted {
            iface: handle,
            addr
        }));
    }
}

#[test]
fn test_dad_succeeds() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);
    let now = Instant::from_millis(10);
    ifaces
        .ipv6_addr_add(now, handle, GLOBAL, AddrType::Manual, 0)
        .unwrap();
    assert_eq!(state_of(&ifaces, handle, &GLOBAL), AddrState::Tentative);
    assert_eq!(
        drain_events(&mut ifaces).last(),
        Some(&Event::AddrAdded {
            iface: handle,
            addr: IpAddress::Ipv6(GLOBAL)
        })
    );

    // the link-local address started at zero
    assert!(ifaces.poll(Instant::from_millis(100)));
    assert_eq!(state_of(&ifaces, handle, &GLOBAL), AddrState::Tentative);
    assert_eq!(
        state_of(&ifaces, handle, &ll_of(&ifaces, handle)),
        AddrState::Preferred
    );
    drain_events(&mut ifaces);

    assert!(ifaces.poll(Instant::from_millis(110)));
    assert_eq!(state_of(&ifaces, handle, &GLOBAL), AddrState::Preferred);
    assert_eq!(
        drain_events(&mut ifaces),
        [
            Event::DadSucceeded {
                iface: handle,
                addr: GLOBAL
            },
            Event::NeighborRemove {
                iface: handle,
                addr: GLOBAL
            }
        ]
    );
}

#[test]
fn test_dad_failed() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Manual, 0)
        .unwrap();
    drain_events(&mut ifaces);

    assert!(ifaces.ipv6_dad_failed(handle, &GLOBAL));
    let events = drain_events(&mut ifaces);
    assert_eq!(
        events[0],
        Event::DadFailed {
            iface: handle,
            addr: GLOBAL
        }
    );
    assert!(events.contains(&Event::AddrRemoved {
        iface: handle,
        addr: IpAddress::Ipv6(GLOBAL)
    }));
    assert!(ifaces.ipv6_addr_lookup(&GLOBAL).is_none());
    assert!(!ifaces.ipv6_dad_failed(handle, &GLOBAL));

    // only the link-local address is left to finish
    ifaces.poll(Instant::from_millis(100));
    assert!(!drain_events(&mut ifaces).contains(&Event::DadSucceeded {
        iface: handle,
        addr: GLOBAL
    }));
}

#[rstest]
#[case::no_nd(Flags::IPV6_NO_ND, LinkFlags::MULTICAST, true)]
#[case::point_to_point(Flags::empty(), LinkFlags::MULTICAST | LinkFlags::POINT_TO_POINT, true)]
#[case::dad_disabled(Flags::empty(), LinkFlags::MULTICAST, false)]
fn test_addr_preferred_without_dad(
    #[case] flags: Flags,
    #[case] link_flags: LinkFlags,
    #[case] dad_enabled: bool,
) {
    let mut config = Config::default();
    config.flags = flags;
    config.link_flags = link_flags;
    config.dad_enabled = dad_enabled;
    let mut ifaces = InterfaceSet::new(vec![]);
    let handle = ifaces.add(config).unwrap();
    ifaces
        .up(Instant::ZERO, handle, &mut Loopback::new())
        .unwrap();

    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Manual, 0)
        .unwrap();
    assert_eq!(state_of(&ifaces, handle, &GLOBAL), AddrState::Preferred);
    assert!(!drain_events(&mut ifaces)
        .iter()
        .any(|e| matches!(e, Event::DadStarted { .. })));
}

#[test]
fn test_addr_lifetime() {
    let (mut ifaces, handle) = setup_no_nd();
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Dhcp, 60)
        .unwrap();
    assert!(!ifaces
        .ipv6_addr_lookup_by_iface(handle, &GLOBAL)
        .unwrap()
        .is_infinite());
    assert_eq!(ifaces.poll_at(), Some(Instant::from_secs(60)));
    drain_events(&mut ifaces);

    assert!(ifaces.poll(Instant::from_secs(60)));
    assert_eq!(state_of(&ifaces, handle, &GLOBAL), AddrState::Deprecated);
    assert_eq!(
        drain_events(&mut ifaces),
        [Event::AddrDeprecated {
            iface: handle,
            addr: GLOBAL
        }]
    );

    assert!(ifaces.ipv6_addr_update_lifetime(Instant::from_secs(61), handle, &GLOBAL, 30));
    assert_eq!(state_of(&ifaces, handle, &GLOBAL), AddrState::Preferred);
    assert_eq!(ifaces.poll_at(), Some(Instant::from_secs(91)));

    assert!(ifaces.ipv6_addr_update_lifetime(Instant::from_secs(62), handle, &GLOBAL, 0));
    assert!(ifaces
        .ipv6_addr_lookup_by_iface(handle, &GLOBAL)
        .unwrap()
        .is_infinite());
    assert_eq!(ifaces.poll_at(), None);
    assert!(!ifaces.ipv6_addr_update_lifetime(Instant::ZERO, handle, &ULA, 0));
}

#[test]
fn test_addr_add_exhausted() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    for n in 0..IFACE_MAX_IPV6_ADDR_COUNT {
        let addr = Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, n as u16 + 1);
        ifaces
            .ipv6_addr_add(Instant::ZERO, handle, addr, AddrType::Manual, 0)
            .unwrap();
    }
    assert_eq!(
        ifaces.ipv6_addr_add(Instant::ZERO, handle, ULA, AddrType::Manual, 0),
        Err(Error::Exhausted)
    );
    // no multicast on the link, so no groups were added
    assert_eq!(ifaces.ipv6_config(handle).unwrap().mcast().count(), 0);
}

#[test]
fn test_addr_add_idempotent() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Manual, 0)
        .unwrap();
    drain_events(&mut ifaces);
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Dhcp, 10)
        .unwrap();
    assert!(drain_events(&mut ifaces).is_empty());
    assert_eq!(
        ifaces
            .ipv6_addr_lookup_by_iface(handle, &GLOBAL)
            .unwrap()
            .addr_type(),
        AddrType::Manual
    );
}

#[test]
fn test_skip_solicited_node_join() {
    let (mut ifaces, handle, _device) =
        setup(LinkFlags::MULTICAST | LinkFlags::MULTICAST_SKIP_JOIN_SOLICIT_NODE);
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Manual, 0)
        .unwrap();

    let groups: Vec<_> = ifaces
        .ipv6_config(handle)
        .unwrap()
        .mcast()
        .map(|m| m.address())
        .collect();
    assert_eq!(groups, [IPV6_LINK_LOCAL_ALL_NODES]);
}

#[test]
fn test_addr_rm_keeps_shared_solicited_node() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::MULTICAST);
    let a = Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0x1, 0xabcd);
    let b = Ipv6Address::new(0x2001, 0xdb8, 1, 0, 0, 0, 0x1, 0xabcd);
    let group = a.solicited_node();
    assert_eq!(group, b.solicited_node());

    for addr in [a, b] {
        ifaces
            .ipv6_addr_add(Instant::ZERO, handle, addr, AddrType::Manual, 0)
            .unwrap();
    }

    assert!(ifaces.ipv6_addr_rm(handle, &a));
    assert!(ifaces.ipv6_maddr_lookup(&group, Some(handle)).is_some());

    assert!(ifaces.ipv6_addr_rm(handle, &b));
    assert!(ifaces.ipv6_maddr_lookup(&group, Some(handle)).is_none());
    assert!(ifaces
        .ipv6_maddr_lookup(&IPV6_LINK_LOCAL_ALL_NODES, Some(handle))
        .is_some());
    assert!(!ifaces.ipv6_addr_rm(handle, &b));
}

#[test]
fn test_maddr() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    let group = Ipv6Address::new(0xff05, 0, 0, 0, 0, 0, 0, 0xfb);

    assert_eq!(ifaces.ipv6_maddr_add(handle, GLOBAL), Err(Error::InvalidAddress));
    assert_eq!(ifaces.ipv6_maddr_join(handle, &group), Err(Error::NotFound));

    ifaces.ipv6_maddr_add(handle, group).unwrap();
    ifaces.ipv6_maddr_join(handle, &group).unwrap();
    ifaces.ipv6_maddr_join(handle, &group).unwrap();
    ifaces.ipv6_maddr_leave(handle, &group).unwrap();
    assert_eq!(
        drain_events(&mut ifaces),
        [
            Event::MaddrAdded {
                iface: handle,
                addr: IpAddress::Ipv6(group)
            },
            Event::MaddrJoined {
                iface: handle,
                addr: IpAddress::Ipv6(group)
            },
            Event::MaddrLeft {
                iface: handle,
                addr: IpAddress::Ipv6(group)
            }
        ]
    );

    assert!(ifaces.ipv6_maddr_rm(handle, &group));
    assert!(ifaces.ipv6_maddr_lookup(&group, None).is_none());
}

#[test]
fn test_mesh_local() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, ULA, AddrType::Manual, 0)
        .unwrap();
    assert!(ifaces.ipv6_set_mesh_local(handle, &ULA, true));
    assert!(ifaces
        .ipv6_addr_lookup_by_iface(handle, &ULA)
        .unwrap()
        .is_mesh_local());
    assert!(!ifaces.ipv6_set_mesh_local(handle, &GLOBAL, true));
}

#[test]
fn test_prefix_longest_match() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    let wide = cidr(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32);
    let narrow = cidr(Ipv6Address::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 0), 48);
    ifaces
        .ipv6_prefix_add(Instant::ZERO, handle, wide, PREFIX_INFINITE_LIFETIME)
        .unwrap();
    ifaces
        .ipv6_prefix_add(Instant::ZERO, handle, narrow, PREFIX_INFINITE_LIFETIME)
        .unwrap();

    let inside = Ipv6Address::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 5);
    let outside = Ipv6Address::new(0x2001, 0xdb8, 2, 0, 0, 0, 0, 5);
    assert_eq!(ifaces.ipv6_prefix_get(handle, &inside).map(Prefix::cidr), Some(narrow));
    assert_eq!(ifaces.ipv6_prefix_get(handle, &outside).map(Prefix::cidr), Some(wide));
    assert_eq!(ifaces.ipv6_prefix_get(handle, &ULA), None);

    assert!(ifaces.ipv6_prefix_lookup(handle, &narrow).is_some());
    assert!(ifaces
        .ipv6_prefix_lookup(handle, &cidr(narrow.address(), 64))
        .is_none());
}

#[test]
fn test_prefix_add_existing() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    let prefix = cidr(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 64);
    let first = ifaces
        .ipv6_prefix_add(Instant::ZERO, handle, prefix, PREFIX_INFINITE_LIFETIME)
        .unwrap();
    assert!(first.is_infinite());
    let again = ifaces
        .ipv6_prefix_add(Instant::ZERO, handle, prefix, 30)
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(ifaces.poll_at(), None);
    assert_eq!(
        drain_events(&mut ifaces),
        [Event::PrefixAdded {
            iface: handle,
            prefix
        }]
    );
}

#[test]
fn test_prefix_expiry_removes_autoconf_addrs() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    let prefix = cidr(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 64);
    let manual = Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2);
    ifaces
        .ipv6_prefix_add(Instant::ZERO, handle, prefix, 10)
        .unwrap();
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Autoconf, 0)
        .unwrap();
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, manual, AddrType::Manual, 0)
        .unwrap();
    drain_events(&mut ifaces);

    assert_eq!(ifaces.poll_at(), Some(Instant::from_secs(10)));
    assert!(ifaces.poll(Instant::from_secs(10)));
    assert_eq!(
        drain_events(&mut ifaces),
        [
            Event::AddrRemoved {
                iface: handle,
                addr: IpAddress::Ipv6(GLOBAL)
            },
            Event::PrefixRemoved {
                iface: handle,
                prefix
            }
        ]
    );
    assert!(ifaces.ipv6_addr_lookup(&GLOBAL).is_none());
    assert!(ifaces.ipv6_addr_lookup(&manual).is_some());
    assert!(ifaces.ipv6_prefix_lookup(handle, &prefix).is_none());
}

#[test]
fn test_prefix_rm_and_timers() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    let prefix = cidr(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 64);
    ifaces
        .ipv6_prefix_add(Instant::ZERO, handle, prefix, 10)
        .unwrap();

    assert!(ifaces.ipv6_prefix_set_timer(Instant::from_secs(5), handle, &prefix, 20));
    assert_eq!(ifaces.poll_at(), Some(Instant::from_secs(25)));
    assert!(ifaces.ipv6_prefix_unset_timer(handle, &prefix));
    assert_eq!(ifaces.poll_at(), None);
    assert!(!ifaces.ipv6_prefix_unset_timer(handle, &prefix));

    assert!(ifaces.ipv6_prefix_rm(handle, &prefix));
    assert!(!ifaces.ipv6_prefix_rm(handle, &prefix));
    assert!(!ifaces.ipv6_prefix_set_timer(Instant::ZERO, handle, &prefix, 20));
}

#[test]
fn test_addr_onlink() {
    let (mut ifaces, first, _device) = setup(LinkFlags::empty());
    let second = ifaces.add(Config::new(HW_ADDR_2)).unwrap();
    let prefix = cidr(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 64);
    ifaces
        .ipv6_prefix_add(Instant::ZERO, second, prefix, PREFIX_INFINITE_LIFETIME)
        .unwrap();

    assert_eq!(ifaces.ipv6_addr_onlink(None, &GLOBAL), Some(second));
    assert_eq!(ifaces.ipv6_addr_onlink(Some(first), &GLOBAL), None);
    assert_eq!(ifaces.ipv6_addr_onlink(None, &ULA), None);
}

#[test]
fn test_get_ll_and_global() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);
    let ll = ll_of(&ifaces, handle);
    assert_eq!(ifaces.ipv6_get_ll(handle, None), Some(ll));
    assert_eq!(ifaces.ipv6_get_ll(handle, Some(AddrState::Preferred)), None);
    assert_eq!(ifaces.ipv6_get_global_addr(None), None);

    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Manual, 0)
        .unwrap();
    // tentative global addresses count
    assert_eq!(ifaces.ipv6_get_global_addr(Some(handle)), Some((handle, GLOBAL)));

    ifaces.poll(Instant::from_millis(100));
    assert_eq!(ifaces.ipv6_get_ll(handle, Some(AddrState::Preferred)), Some(ll));
}

#[rstest]
#[case::link_local(Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 0x99), None)]
#[case::link_scope_group(IPV6_LINK_LOCAL_ALL_NODES, None)]
#[case::global(Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x99), Some(GLOBAL))]
#[case::ula(Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 0x99), Some(ULA))]
#[case::site_scope_group(Ipv6Address::new(0xff05, 0, 0, 0, 0, 0, 0, 0xfb), Some(ULA))]
fn test_select_src_addr(#[case] dst: Ipv6Address, #[case] expected: Option<Ipv6Address>) {
    let (mut ifaces, handle) = setup_no_nd();
    for addr in [GLOBAL, ULA] {
        ifaces
            .ipv6_addr_add(Instant::ZERO, handle, addr, AddrType::Manual, 0)
            .unwrap();
    }

    let expected = expected.unwrap_or_else(|| ll_of(&ifaces, handle));
    assert_eq!(ifaces.ipv6_select_src_addr(Some(handle), &dst), expected);
    assert_eq!(ifaces.ipv6_select_src_addr(None, &dst), expected);
}

#[rstest]
#[case::lower_first([
    Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 5),
    Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 6),
])]
#[case::higher_first([
    Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 6),
    Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 5),
])]
fn test_select_src_addr_tie(#[case] addrs: [Ipv6Address; 2]) {
    let (mut ifaces, handle) = setup_no_nd();
    for addr in addrs {
        ifaces
            .ipv6_addr_add(Instant::ZERO, handle, addr, AddrType::Manual, 0)
            .unwrap();
    }

    // both share 121 leading bits with the destination
    let dst = Ipv6Address::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0x63);
    assert_eq!(ifaces.ipv6_select_src_addr(Some(handle), &dst), addrs[0]);
    assert_eq!(ifaces.ipv6_select_src_addr(None, &dst), addrs[0]);
}

#[test]
fn test_select_src_addr_mesh_local() {
    let (mut ifaces, handle) = setup_no_nd();
    for addr in [GLOBAL, ULA] {
        ifaces
            .ipv6_addr_add(Instant::ZERO, handle, addr, AddrType::Manual, 0)
            .unwrap();
    }
    ifaces.ipv6_set_mesh_local(handle, &ULA, true);

    let same_mesh = Ipv6Address::new(0xfd00, 0, 0, 0, 0, 0, 0, 0x99);
    let other_mesh = Ipv6Address::new(0xfd00, 0, 0, 1, 0, 0, 0, 0x99);
    assert_eq!(ifaces.ipv6_select_src_addr(None, &same_mesh), ULA);
    assert_eq!(ifaces.ipv6_select_src_addr(None, &other_mesh), GLOBAL);
}

#[test]
fn test_select_src_addr_skips_tentative() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);
    ifaces
        .ipv6_addr_add(Instant::ZERO, handle, GLOBAL, AddrType::Manual, 0)
        .unwrap();
    assert_eq!(
        ifaces.ipv6_select_src_addr(None, &GLOBAL),
        Ipv6Address::UNSPECIFIED
    );
    assert_eq!(ifaces.ipv6_select_src_iface(&GLOBAL), Some(handle));
}

#[test]
fn test_select_src_iface() {
    let (mut ifaces, first) = setup_no_nd();
    let mut config = Config::new(HW_ADDR_2);
    config.flags = Flags::IPV6_NO_ND;
    let second = ifaces.add(config).unwrap();
    ifaces
        .ipv6_addr_add(Instant::ZERO, second, GLOBAL, AddrType::Manual, 0)
        .unwrap();

    assert_eq!(ifaces.ipv6_select_src_iface(&GLOBAL), Some(second));
    assert_eq!(
        ifaces.select_src_iface(&IpAddress::Ipv6(ULA)),
        Some(second)
    );
    assert_eq!(
        ifaces.ipv6_select_src_iface(&Ipv6Address::new(0xfe80, 0, 0, 0, 0, 0, 0, 9)),
        Some(first)
    );
}

#[test]
fn test_hop_limits() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    assert_eq!(ifaces.ipv6_hop_limit(handle), Some(64));
    assert_eq!(ifaces.ipv6_mcast_hop_limit(handle), Some(1));
    ifaces.ipv6_set_hop_limit(handle, 255).unwrap();
    ifaces.ipv6_set_mcast_hop_limit(handle, 4).unwrap();
    assert_eq!(ifaces.ipv6_hop_limit(handle), Some(255));
    assert_eq!(ifaces.ipv6_mcast_hop_limit(handle), Some(4));
}

#[test]
fn test_reachable_time() {
    let (mut ifaces, handle, _device) = setup(LinkFlags::empty());
    ifaces.config_ipv6_get(handle).unwrap();
    let reachable = ifaces.ipv6_reachable_time(handle).unwrap();
    assert!(reachable >= Duration::from_secs(15) && reachable < Duration::from_secs(45));

    let reachable = ifaces
        .ipv6_set_base_reachable_time(handle, Duration::from_secs(10))
        .unwrap();
    assert!(reachable >= Duration::from_secs(5) && reachable < Duration::from_secs(15));
    assert_eq!(ifaces.ipv6_reachable_time(handle), Some(reachable));
    assert_eq!(
        ifaces.ipv6_config(handle).unwrap().base_reachable_time(),
        Duration::from_secs(10)
    );
}

#[test]
fn test_router_solicitation_gives_up() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);
    ifaces.poll(Instant::from_millis(100));
    drain_events(&mut ifaces);

    for secs in 1..=2 {
        assert!(ifaces.poll(Instant::from_secs(secs)));
        assert_eq!(
            drain_events(&mut ifaces),
            [Event::RsSend { iface: handle }]
        );
    }
    assert!(ifaces.poll(Instant::from_secs(3)));
    assert_eq!(
        drain_events(&mut ifaces),
        [Event::RsExhausted { iface: handle }]
    );
    assert_eq!(ifaces.ipv6_config(handle).unwrap().rs_count(), 3);
    assert_eq!(ifaces.poll_at(), None);
}

#[test]
fn test_stop_rs() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);
    ifaces.stop_rs(handle);
    ifaces.poll(Instant::from_millis(100));
    assert_eq!(ifaces.poll_at(), None);
}

#[test]
fn test_no_nd_skips_rs() {
    let (mut ifaces, handle) = setup_no_nd();
    ifaces.start_rs(Instant::ZERO, handle);
    assert!(drain_events(&mut ifaces).is_empty());
    assert_eq!(ifaces.poll_at(), None);
}

#[test]
fn test_restart_reruns_dad() {
    let (mut ifaces, handle, mut device) = setup_up(LinkFlags::MULTICAST);
    let ll = ll_of(&ifaces, handle);
    ifaces.poll(Instant::from_millis(100));
    assert_eq!(state_of(&ifaces, handle, &ll), AddrState::Preferred);

    let now = Instant::from_secs(5);
    ifaces.down(now, handle, &mut device).unwrap();
    ifaces.up(now, handle, &mut device).unwrap();
    assert_eq!(state_of(&ifaces, handle, &ll), AddrState::Tentative);
    assert!(drain_events(&mut ifaces).contains(&Event::DadStarted {
        iface: handle,
        addr: ll
    }));
    assert_eq!(ifaces.ipv6_config(handle).unwrap().rs_count(), 0);
}

#[test]
fn test_config_put_cancels_timers() {
    let (mut ifaces, handle, _device) = setup_up(LinkFlags::MULTICAST);
    assert!(ifaces.poll_at().is_some());
    ifaces.config_ipv6_put(handle).unwrap();
    assert_eq!(ifaces.poll_at(), None);
    assert_eq!(ifaces.config_ipv6_put(handle), Err(Error::Already));
    assert!(ifaces.ipv6_addr_lookup(&ll_of(&ifaces, handle)).is_none());
}

#[test]
fn test_config_blocks_exhausted() {
    let mut ifaces = InterfaceSet::new(vec![]);
    let handles: Vec<_> = (0..=IPV6_CONFIG_BLOCK_COUNT)
        .map(|n| {
            ifaces
                .add(Config::new(EthernetAddress([0x02, 0, 0, 0, 2, n as u8])))
                .unwrap()
        })
        .collect();
    for handle in &handles[..IPV6_CONFIG_BLOCK_COUNT] {
        ifaces.config_ipv6_get(*handle).unwrap();
    }
    let last = handles[IPV6_CONFIG_BLOCK_COUNT];
    assert_eq!(
        ifaces.config_ipv6_get(last).map(|_| ()),
        Err(Error::NoConfigBlock)
    );
    assert_eq!(
        ifaces.ipv6_prefix_add(Instant::ZERO, last, cidr(GLOBAL, 64), 10),
        Err(Error::NoConfigBlock)
    );
}
