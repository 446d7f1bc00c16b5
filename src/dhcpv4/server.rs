use heapless::Vec;

use crate::config::{
    DHCPV4_CLIENT_ID_MAX_LEN, DHCPV4_PARAMETER_LIST_MAX_LEN, DHCPV4_SERVER_ADDR_COUNT,
};
use crate::iface::InterfaceHandle;
use crate::time::{Duration, Instant};
use crate::timer::TimerList;
use crate::wire::dhcpv4::field as dhcpv4_field;
use crate::wire::{DhcpMessageType, DhcpPacket, DhcpRepr, EthernetAddress, Ipv4Address, Ipv4Cidr};

use super::{
    pool_addr, Destination, Lease, LeaseState, ServerConfig, Transport, TransportError,
    ADDRESS_RESERVED_TIMEOUT, INFINITE_LEASE_TIME,
};

/// ICMP identifier of address probes.
const PROBE_IDENT: u16 = 0x6463;

/// The minimum datagram every DHCP client accepts (RFC 2131, section 2).
const MAX_REPLY_LEN: usize = 576;

const HARDWARE_TYPE_ETHERNET: u8 = 1;

type ClientId = Vec<u8, DHCPV4_CLIENT_ID_MAX_LEN>;

#[derive(Debug, Clone)]
struct Slot {
    addr: Ipv4Address,
    state: LeaseState,
    client_id: ClientId,
    /// An echo request for the address is outstanding.
    probing: bool,
}

/// What a reply needs to know about the message it answers.
#[derive(Debug, Clone)]
struct Client {
    id: ClientId,
    transaction_id: u32,
    hardware_addr: EthernetAddress,
    client_ip: Ipv4Address,
    relay_agent_ip: Ipv4Address,
    broadcast: bool,
    parameters: Vec<u8, DHCPV4_PARAMETER_LIST_MAX_LEN>,
    lease_time: Option<u32>,
}

impl Client {
    /// Identify the client by its identifier option, or by hardware type and address
    /// when it sent none.
    fn from_repr(repr: &DhcpRepr) -> Option<Client> {
        let id = match repr.client_identifier {
            Some(id) => Vec::from_slice(id).ok()?,
            None => {
                let mut id = Vec::new();
                id.push(HARDWARE_TYPE_ETHERNET).ok()?;
                id.extend_from_slice(repr.client_hardware_address.as_bytes())
                    .ok()?;
                id
            }
        };
        Some(Client {
            id,
            transaction_id: repr.transaction_id,
            hardware_addr: repr.client_hardware_address,
            client_ip: repr.client_ip,
            relay_agent_ip: repr.relay_agent_ip,
            broadcast: repr.broadcast,
            parameters: Vec::from_slice(repr.parameter_request_list.unwrap_or(&[])).ok()?,
            lease_time: repr.lease_duration,
        })
    }

    fn wants(&self, option: u8) -> bool {
        self.parameters.contains(&option)
    }
}

#[derive(Debug)]
struct Probe {
    slot: usize,
    seq_no: u16,
    deadline: Instant,
    /// The DISCOVER the offer answers once the probe is over.
    client: Client,
}

/// A DHCPv4 server bound to one interface.
#[derive(Debug)]
pub struct Server {
    iface: InterfaceHandle,
    server_addr: Ipv4Address,
    subnet: Ipv4Cidr,
    config: ServerConfig,
    slots: Vec<Slot, DHCPV4_SERVER_ADDR_COUNT>,
    timers: TimerList<usize, DHCPV4_SERVER_ADDR_COUNT>,
    probe: Option<Probe>,
    probe_seq: u16,
}

impl Server {
    pub(super) fn new(
        iface: InterfaceHandle,
        server_addr: Ipv4Address,
        netmask: Ipv4Address,
        config: ServerConfig,
    ) -> Server {
        let slots = (0..config.pool_size)
            .filter_map(|i| pool_addr(&config.base_addr, i))
            .map(|addr| Slot {
                addr,
                state: LeaseState::Free,
                client_id: Vec::new(),
                probing: false,
            })
            .take(DHCPV4_SERVER_ADDR_COUNT)
            .collect();
        let prefix_len = Ipv4Cidr::from_netmask(server_addr, netmask)
            .map(|cidr| cidr.prefix_len())
            .unwrap_or(32);
        Server {
            iface,
            server_addr,
            subnet: Ipv4Cidr::new(server_addr, prefix_len),
            config,
            slots,
            timers: TimerList::new(),
            probe: None,
            probe_seq: 0,
        }
    }

    pub fn iface(&self) -> InterfaceHandle {
        self.iface
    }

    /// The address the server answers from and identifies itself with.
    pub fn server_addr(&self) -> Ipv4Address {
        self.server_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(super) fn leases(&self) -> impl Iterator<Item = Lease<'_>> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state != LeaseState::Free)
            .map(|(index, slot)| Lease {
                state: slot.state,
                addr: slot.addr,
                client_id: &slot.client_id,
                expires_at: self.timers.deadline(index),
            })
    }

    fn find_addr(&self, addr: &Ipv4Address) -> Option<usize> {
        self.slots.iter().position(|slot| slot.addr == *addr)
    }

    /// The address reserved for or allocated to `id`.
    fn binding(&self, id: &ClientId) -> Option<usize> {
        self.slots.iter().position(|slot| {
            matches!(slot.state, LeaseState::Reserved | LeaseState::Allocated)
                && !slot.probing
                && slot.client_id == *id
        })
    }

    fn next_free(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.state == LeaseState::Free)
    }

    fn lease_time(&self, client: &Client) -> u32 {
        client.lease_time.unwrap_or(self.config.lease_time)
    }

    fn reserve(&mut self, now: Instant, index: usize, id: &ClientId) {
        let slot = &mut self.slots[index];
        slot.state = LeaseState::Reserved;
        slot.client_id = id.clone();
        slot.probing = false;
        let _ = self.timers.arm(index, now + ADDRESS_RESERVED_TIMEOUT);
    }

    fn set_state(&mut self, index: usize, state: LeaseState) {
        let slot = &mut self.slots[index];
        net_debug!(
            "[{}]: DHCPv4 {} {} -> {}",
            self.iface,
            slot.addr,
            slot.state,
            state
        );
        slot.state = state;
        slot.client_id.clear();
        slot.probing = false;
        self.timers.cancel(index);
        if self.probe.as_ref().map_or(false, |probe| probe.slot == index) {
            self.probe = None;
        }
    }

    pub(super) fn reclaim(&mut self, addr: &Ipv4Address) -> bool {
        match self.find_addr(addr) {
            Some(index) if self.slots[index].state == LeaseState::Declined => {
                self.set_state(index, LeaseState::Free);
                true
            }
            _ => false,
        }
    }

    /// Handle one message. Fails only when the transport is closed.
    pub(super) fn process<T>(
        &mut self,
        now: Instant,
        payload: &[u8],
        transport: &mut T,
    ) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        let packet = match DhcpPacket::new_checked(payload) {
            Ok(packet) => packet,
            Err(_) => {
                net_debug!("[{}]: DHCPv4 server: truncated message", self.iface);
                return Ok(());
            }
        };
        let repr = match DhcpRepr::parse(&packet) {
            Ok(repr) => repr,
            Err(_) => {
                net_debug!("[{}]: DHCPv4 server: invalid message", self.iface);
                return Ok(());
            }
        };
        let Some(client) = Client::from_repr(&repr) else {
            net_debug!("[{}]: DHCPv4 server: client identifier too long", self.iface);
            return Ok(());
        };

        net_trace!(
            "[{}]: DHCPv4 server: {:?} from {}",
            self.iface,
            repr.message_type,
            repr.client_hardware_address
        );

        match repr.message_type {
            DhcpMessageType::Discover => self.discover(now, &repr, client, transport),
            DhcpMessageType::Request => self.request(now, &repr, &client, transport),
            DhcpMessageType::Decline => {
                self.decline(&repr, &client);
                Ok(())
            }
            DhcpMessageType::Release => {
                self.release(&repr, &client);
                Ok(())
            }
            DhcpMessageType::Inform => self.inform(&client, transport),
            _ => {
                net_debug!(
                    "[{}]: DHCPv4 server: unexpected {:?}",
                    self.iface,
                    repr.message_type
                );
                Ok(())
            }
        }
    }

    fn discover<T>(
        &mut self,
        now: Instant,
        repr: &DhcpRepr,
        client: Client,
        transport: &mut T,
    ) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        if self.probe.is_some() {
            net_debug!("[{}]: DHCPv4 probe outstanding, ignoring DISCOVER", self.iface);
            return Ok(());
        }

        if let Some(index) = self.binding(&client.id) {
            if self.slots[index].state == LeaseState::Reserved {
                let _ = self.timers.arm(index, now + ADDRESS_RESERVED_TIMEOUT);
            }
            return self.offer(index, &client, transport);
        }

        let requested = repr
            .requested_ip
            .and_then(|addr| self.find_addr(&addr))
            .filter(|index| self.slots[*index].state == LeaseState::Free);
        let Some(index) = requested.or_else(|| self.next_free()) else {
            net_debug!(
                "[{}]: DHCPv4 no free address for {}",
                self.iface,
                client.hardware_addr
            );
            return Ok(());
        };

        self.reserve(now, index, &client.id);
        if self.config.probe_timeout == Duration::ZERO {
            return self.offer(index, &client, transport);
        }
        self.start_probe(now, index, client, transport)
    }

    fn start_probe<T>(
        &mut self,
        now: Instant,
        index: usize,
        client: Client,
        transport: &mut T,
    ) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        self.probe_seq = self.probe_seq.wrapping_add(1);
        let addr = self.slots[index].addr;
        match transport.send_echo_request(self.iface, addr, PROBE_IDENT, self.probe_seq) {
            Ok(()) => {
                net_debug!("[{}]: DHCPv4 probing {}", self.iface, addr);
                self.slots[index].probing = true;
                self.timers.cancel(index);
                self.probe = Some(Probe {
                    slot: index,
                    seq_no: self.probe_seq,
                    deadline: now + self.config.probe_timeout,
                    client,
                });
                Ok(())
            }
            Err(TransportError::Closed) => Err(TransportError::Closed),
            Err(_err) => {
                net_debug!(
                    "[{}]: DHCPv4 cannot probe {}: {}, offering anyway",
                    self.iface,
                    addr,
                    _err
                );
                self.offer(index, &client, transport)
            }
        }
    }

    /// Handle an ICMP echo reply. A reply to the outstanding probe declines the probed
    /// address and moves the probe on to the next free one.
    pub(super) fn process_echo_reply<T>(
        &mut self,
        now: Instant,
        src: Ipv4Address,
        ident: u16,
        seq_no: u16,
        transport: &mut T,
    ) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        let matches = self.probe.as_ref().map_or(false, |probe| {
            ident == PROBE_IDENT && seq_no == probe.seq_no && self.slots[probe.slot].addr == src
        });
        if !matches {
            net_trace!("[{}]: DHCPv4 ignoring echo reply from {}", self.iface, src);
            return Ok(());
        }
        let Some(probe) = self.probe.take() else {
            return Ok(());
        };

        net_debug!("[{}]: DHCPv4 {} is in use by another host", self.iface, src);
        self.set_state(probe.slot, LeaseState::Declined);

        let Some(next) = self.next_free() else {
            net_debug!(
                "[{}]: DHCPv4 no free address left for {}",
                self.iface,
                probe.client.hardware_addr
            );
            return Ok(());
        };
        self.reserve(now, next, &probe.client.id);
        self.start_probe(now, next, probe.client, transport)
    }

    fn request<T>(
        &mut self,
        now: Instant,
        repr: &DhcpRepr,
        client: &Client,
        transport: &mut T,
    ) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        // SELECTING
        if let Some(server_id) = repr.server_identifier {
            if server_id != self.server_addr {
                if let Some(index) = self
                    .binding(&client.id)
                    .filter(|index| self.slots[*index].state == LeaseState::Reserved)
                {
                    net_debug!("[{}]: DHCPv4 client chose server {}", self.iface, server_id);
                    self.set_state(index, LeaseState::Free);
                }
                return Ok(());
            }
            let reserved = repr.requested_ip.and_then(|addr| self.find_addr(&addr)).filter(|index| {
                let slot = &self.slots[*index];
                slot.state == LeaseState::Reserved && !slot.probing && slot.client_id == client.id
            });
            let Some(index) = reserved else {
                net_debug!(
                    "[{}]: DHCPv4 no reservation matches REQUEST from {}",
                    self.iface,
                    client.hardware_addr
                );
                return Ok(());
            };
            return self.ack(now, index, client, transport);
        }

        // INIT-REBOOT, then RENEWING or REBINDING
        let requested = match repr.requested_ip {
            Some(addr) => addr,
            None if !repr.client_ip.is_unspecified() => repr.client_ip,
            None => {
                net_debug!("[{}]: DHCPv4 REQUEST names no address", self.iface);
                return Ok(());
            }
        };
        if !self.subnet.contains_addr(&requested) {
            return self.nak(client, transport);
        }
        let Some(index) = self.binding(&client.id) else {
            net_debug!(
                "[{}]: DHCPv4 no binding for {}, ignoring REQUEST",
                self.iface,
                client.hardware_addr
            );
            return Ok(());
        };
        if self.slots[index].addr != requested {
            return self.nak(client, transport);
        }
        self.ack(now, index, client, transport)
    }

    fn decline(&mut self, repr: &DhcpRepr, client: &Client) {
        if repr.server_identifier != Some(self.server_addr) {
            net_debug!("[{}]: DHCPv4 DECLINE for another server", self.iface);
            return;
        }
        let held = repr
            .requested_ip
            .and_then(|addr| self.find_addr(&addr))
            .filter(|index| {
                let slot = &self.slots[*index];
                matches!(slot.state, LeaseState::Reserved | LeaseState::Allocated)
                    && slot.client_id == client.id
            });
        match held {
            Some(index) => self.set_state(index, LeaseState::Declined),
            None => net_debug!(
                "[{}]: DHCPv4 DECLINE of an address {} does not hold",
                self.iface,
                client.hardware_addr
            ),
        }
    }

    fn release(&mut self, repr: &DhcpRepr, client: &Client) {
        if repr.server_identifier != Some(self.server_addr) {
            net_debug!("[{}]: DHCPv4 RELEASE for another server", self.iface);
            return;
        }
        match self
            .binding(&client.id)
            .filter(|index| self.slots[*index].addr == repr.client_ip)
        {
            Some(index) => self.set_state(index, LeaseState::Free),
            None => net_debug!(
                "[{}]: DHCPv4 RELEASE of {} matches no lease",
                self.iface,
                repr.client_ip
            ),
        }
    }

    fn inform<T>(&mut self, client: &Client, transport: &mut T) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        if client.client_ip.is_unspecified() {
            net_debug!("[{}]: DHCPv4 INFORM without client address", self.iface);
            return Ok(());
        }
        self.send(
            DhcpMessageType::Ack,
            client,
            Ipv4Address::UNSPECIFIED,
            None,
            transport,
        )
    }

    fn offer<T>(&mut self, index: usize, client: &Client, transport: &mut T) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        let lease_time = self.lease_time(client);
        self.send(
            DhcpMessageType::Offer,
            client,
            self.slots[index].addr,
            Some(lease_time),
            transport,
        )
    }

    fn ack<T>(
        &mut self,
        now: Instant,
        index: usize,
        client: &Client,
        transport: &mut T,
    ) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        let lease_time = self.lease_time(client);
        let slot = &mut self.slots[index];
        slot.state = LeaseState::Allocated;
        slot.client_id = client.id.clone();
        let addr = slot.addr;
        if lease_time == INFINITE_LEASE_TIME {
            self.timers.cancel(index);
        } else {
            let _ = self
                .timers
                .arm(index, now + Duration::from_secs(lease_time.into()));
        }
        net_debug!(
            "[{}]: DHCPv4 {} allocated to {} for {}s",
            self.iface,
            addr,
            client.hardware_addr,
            lease_time
        );
        self.send(DhcpMessageType::Ack, client, addr, Some(lease_time), transport)
    }

    fn nak<T>(&mut self, client: &Client, transport: &mut T) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        self.send(
            DhcpMessageType::Nak,
            client,
            Ipv4Address::UNSPECIFIED,
            None,
            transport,
        )
    }

    fn send<T>(
        &self,
        message_type: DhcpMessageType,
        client: &Client,
        your_ip: Ipv4Address,
        lease_time: Option<u32>,
        transport: &mut T,
    ) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        let is_nak = message_type == DhcpMessageType::Nak;
        let dns_servers = Some(self.config.dns_servers.clone()).filter(|servers| {
            !is_nak && !servers.is_empty() && client.wants(dhcpv4_field::OPT_DOMAIN_NAME_SERVER)
        });
        let repr = DhcpRepr {
            message_type,
            transaction_id: client.transaction_id,
            secs: 0,
            client_hardware_address: client.hardware_addr,
            client_ip: if message_type == DhcpMessageType::Ack {
                client.client_ip
            } else {
                Ipv4Address::UNSPECIFIED
            },
            your_ip,
            server_ip: Ipv4Address::UNSPECIFIED,
            relay_agent_ip: client.relay_agent_ip,
            broadcast: client.broadcast,
            router: self
                .config
                .router
                .filter(|_| !is_nak && client.wants(dhcpv4_field::OPT_ROUTER)),
            // INFORM replies carry requested parameters only
            subnet_mask: (!is_nak
                && (!your_ip.is_unspecified() || client.wants(dhcpv4_field::OPT_SUBNET_MASK)))
                .then(|| self.subnet.netmask()),
            requested_ip: None,
            client_identifier: None,
            server_identifier: Some(self.server_addr),
            parameter_request_list: None,
            dns_servers,
            lease_duration: lease_time,
            renew_duration: lease_time.map(|t| fraction(t, 1, 2)),
            rebind_duration: lease_time.map(|t| fraction(t, 7, 8)),
        };

        let mut buffer = [0u8; MAX_REPLY_LEN];
        let len = repr.buffer_len();
        let Some(payload) = buffer.get_mut(..len) else {
            net_debug!("[{}]: DHCPv4 reply too long", self.iface);
            return Ok(());
        };
        if repr.emit(&mut DhcpPacket::new_unchecked(payload)).is_err() {
            net_debug!("[{}]: DHCPv4 cannot encode reply", self.iface);
            return Ok(());
        }

        let dst = destination(message_type, client, your_ip);
        if let Destination::Hardware {
            ip_addr,
            hardware_addr,
        } = dst
        {
            transport.set_neighbor(self.iface, ip_addr, hardware_addr);
        }
        net_debug!(
            "[{}]: DHCPv4 sending {:?} to {:?}",
            self.iface,
            message_type,
            dst
        );
        match transport.send(self.iface, dst, &buffer[..len]) {
            Ok(()) => Ok(()),
            Err(TransportError::Closed) => Err(TransportError::Closed),
            Err(_err) => {
                net_debug!("[{}]: DHCPv4 cannot send reply: {}", self.iface, _err);
                Ok(())
            }
        }
    }

    /// Run expired reservations and leases, then an expired probe.
    pub(super) fn poll<T>(&mut self, now: Instant, transport: &mut T) -> Result<bool, TransportError>
    where
        T: Transport + ?Sized,
    {
        let mut changed = false;
        while let Some(index) = self.timers.pop_expired(now) {
            let slot = &mut self.slots[index];
            net_debug!(
                "[{}]: DHCPv4 {} {} expired",
                self.iface,
                slot.state,
                slot.addr
            );
            slot.state = LeaseState::Free;
            slot.client_id.clear();
            changed = true;
        }

        if self.probe.as_ref().map_or(false, |probe| probe.deadline <= now) {
            if let Some(probe) = self.probe.take() {
                net_debug!(
                    "[{}]: DHCPv4 no answer from {}, offering it",
                    self.iface,
                    self.slots[probe.slot].addr
                );
                self.slots[probe.slot].probing = false;
                let _ = self.timers.arm(probe.slot, now + ADDRESS_RESERVED_TIMEOUT);
                self.offer(probe.slot, &probe.client, transport)?;
                changed = true;
            }
        }
        Ok(changed)
    }

    pub(super) fn poll_at(&self) -> Option<Instant> {
        let probe = self.probe.as_ref().map(|probe| probe.deadline);
        match (self.timers.poll_at(), probe) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// `time * num / den`, keeping an infinite time infinite.
fn fraction(time: u32, num: u64, den: u64) -> u32 {
    if time == INFINITE_LEASE_TIME {
        return time;
    }
    (u64::from(time) * num / den) as u32
}

/// Pick where a reply goes (RFC 2131, section 4.1).
fn destination(message_type: DhcpMessageType, client: &Client, your_ip: Ipv4Address) -> Destination {
    if !client.relay_agent_ip.is_unspecified() {
        Destination::Relay(client.relay_agent_ip)
    } else if message_type == DhcpMessageType::Nak {
        Destination::Broadcast
    } else if !client.client_ip.is_unspecified() {
        Destination::Unicast(client.client_ip)
    } else if client.broadcast || your_ip.is_unspecified() {
        Destination::Broadcast
    } else {
        Destination::Hardware {
            ip_addr: your_ip,
            hardware_addr: client.hardware_addr,
        }
    }
}
