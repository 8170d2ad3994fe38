//! A simulated banked endpoint FIFO controller
//!
//! Host-side methods (`host_*`) act like the bus; the [`Hardware`]
//! implementation acts like the registers. Banks hold whole packets.

extern crate std;

use std::{collections::VecDeque, vec::Vec};

use crate::{
    hardware::{DeviceEvents, EndpointConfig, Events, Hardware, Interrupts},
    MAX_ENDPOINTS,
};

struct Endpoint {
    config: Option<EndpointConfig>,
    events: Events,
    interrupts: Interrupts,
    stalled: bool,
    flow_error: bool,
    /// OUT and SETUP packets, one per bank
    rx: VecDeque<VecDeque<u8>>,
    /// The IN bank being written
    tx: Vec<u8>,
    /// IN banks waiting for the host
    in_flight: VecDeque<Vec<u8>>,
    fifo_resets: usize,
}

impl Endpoint {
    fn new() -> Self {
        Endpoint {
            config: None,
            events: Events::empty(),
            interrupts: Interrupts::empty(),
            stalled: false,
            flow_error: false,
            rx: VecDeque::new(),
            tx: Vec::new(),
            in_flight: VecDeque::new(),
            fifo_resets: 0,
        }
    }

    fn banks(&self) -> usize {
        self.config.map_or(1, |config| config.banks.count())
    }

    fn size(&self) -> usize {
        self.config.map_or(0, |config| config.size.len())
    }

    fn is_control(&self) -> bool {
        self.config.map_or(false, |config| config.is_control())
    }

    fn is_in(&self) -> bool {
        self.config.map_or(false, |config| config.is_in())
    }
}

pub struct Sim {
    selected: usize,
    endpoints: [Endpoint; MAX_ENDPOINTS],
    device_events: DeviceEvents,
    address: Option<u8>,
    attached: bool,
    vbus: bool,
}

impl Sim {
    pub fn new() -> Self {
        Sim {
            selected: 0,
            endpoints: core::array::from_fn(|_| Endpoint::new()),
            device_events: DeviceEvents::empty(),
            address: None,
            attached: false,
            vbus: true,
        }
    }

    fn ep(&self) -> &Endpoint {
        &self.endpoints[self.selected]
    }

    fn ep_mut(&mut self) -> &mut Endpoint {
        &mut self.endpoints[self.selected]
    }

    pub fn host_reset(&mut self) {
        self.device_events.insert(DeviceEvents::END_OF_RESET);
        self.address = None;
    }

    pub fn host_suspend(&mut self) {
        self.device_events.insert(DeviceEvents::SUSPEND);
    }

    /// Losing VBUS unpowers the pull-up
    pub fn host_vbus(&mut self, present: bool) {
        self.vbus = present;
        if !present {
            self.attached = false;
            self.address = None;
        }
        self.device_events.insert(DeviceEvents::VBUS);
    }

    /// A SETUP packet always lands, replacing whatever the bank held
    pub fn host_setup(&mut self, ep: usize, packet: [u8; 8]) {
        let ep = &mut self.endpoints[ep];
        ep.rx.clear();
        ep.rx.push_back(packet.into_iter().collect());
        ep.stalled = false;
        ep.events.insert(Events::SETUP);
    }

    /// Returns `false` if the device NAKed or stalled the packet
    pub fn host_out(&mut self, ep: usize, data: &[u8]) -> bool {
        let ep = &mut self.endpoints[ep];
        if ep.stalled || ep.rx.len() >= ep.banks() {
            return false;
        }
        ep.rx.push_back(data.iter().copied().collect());
        ep.events.insert(Events::OUT_READY);
        true
    }

    /// Returns `None` if the device NAKed or stalled the token
    pub fn host_in(&mut self, ep: usize) -> Option<Vec<u8>> {
        let ep = &mut self.endpoints[ep];
        if ep.stalled {
            return None;
        }
        let packet = ep.in_flight.pop_front()?;
        ep.events.insert(Events::IN_READY);
        Some(packet)
    }

    pub fn raise_flow_error(&mut self, ep: usize) {
        self.endpoints[ep].flow_error = true;
    }

    pub fn address(&self) -> Option<u8> {
        self.address
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_stalled(&self, ep: usize) -> bool {
        self.endpoints[ep].stalled
    }

    pub fn fifo_resets(&self, ep: usize) -> usize {
        self.endpoints[ep].fifo_resets
    }
}

impl Hardware for Sim {
    fn attach(&mut self) {
        self.attached = true;
    }

    fn detach(&mut self) {
        self.attached = false;
    }

    fn vbus_present(&self) -> bool {
        self.vbus
    }

    fn device_events(&self) -> DeviceEvents {
        self.device_events
    }

    fn acknowledge_device(&mut self, events: DeviceEvents) {
        self.device_events.remove(events);
    }

    fn set_address(&mut self, address: u8) {
        self.address = Some(address);
    }

    fn pending_endpoints(&self) -> u8 {
        let mut pending = 0;
        for (n, ep) in self.endpoints.iter().enumerate() {
            if ep.config.is_none() {
                continue;
            }
            let flow_error = ep.flow_error && ep.interrupts.contains(Interrupts::FLOW_ERROR);
            if ep.events.intersects(Events::enabled_by(ep.interrupts)) || flow_error {
                pending |= 1 << n;
            }
        }
        pending
    }

    fn select(&mut self, ep: usize) {
        self.selected = ep;
    }

    fn configure(&mut self, config: &EndpointConfig) -> bool {
        let ep = self.ep_mut();
        *ep = Endpoint::new();
        ep.config = Some(*config);
        if config.is_in() {
            ep.events.insert(Events::IN_READY);
        }
        true
    }

    fn reset_fifo(&mut self, ep: usize) {
        let ep = &mut self.endpoints[ep];
        ep.rx.clear();
        ep.tx.clear();
        ep.in_flight.clear();
        ep.events
            .remove(Events::IN_READY | Events::OUT_READY | Events::SETUP);
        if ep.is_in() {
            ep.events.insert(Events::IN_READY);
        }
        ep.fifo_resets += 1;
    }

    fn events(&self) -> Events {
        self.ep().events
    }

    fn acknowledge(&mut self, events: Events) {
        let ep = self.ep_mut();
        let cleared = ep.events & events;
        ep.events.remove(events);
        if ep.is_control() {
            if cleared.contains(Events::IN_READY) {
                let packet = core::mem::take(&mut ep.tx);
                ep.in_flight.push_back(packet);
            }
            if cleared.intersects(Events::OUT_READY | Events::SETUP) {
                ep.rx.pop_front();
            }
        }
    }

    fn release_bank(&mut self) {
        let ep = self.ep_mut();
        if ep.is_control() {
            return;
        }
        if ep.is_in() {
            let packet = core::mem::take(&mut ep.tx);
            ep.in_flight.push_back(packet);
            if ep.in_flight.len() < ep.banks() {
                ep.events.insert(Events::IN_READY);
            }
        } else {
            ep.rx.pop_front();
            if !ep.rx.is_empty() {
                ep.events.insert(Events::OUT_READY);
            }
        }
    }

    fn busy_banks(&self) -> usize {
        let ep = self.ep();
        if ep.is_control() || !ep.is_in() {
            ep.rx.len()
        } else {
            ep.in_flight.len()
        }
    }

    fn byte_count(&self) -> usize {
        let ep = self.ep();
        match ep.rx.front() {
            Some(packet) if !ep.is_in() || ep.is_control() => packet.len(),
            _ if ep.is_in() => ep.tx.len(),
            _ => 0,
        }
    }

    fn read_byte(&mut self) -> u8 {
        self.ep_mut()
            .rx
            .front_mut()
            .and_then(VecDeque::pop_front)
            .unwrap_or(0)
    }

    fn write_byte(&mut self, byte: u8) {
        let ep = self.ep_mut();
        if ep.tx.len() < ep.size() {
            ep.tx.push(byte);
        } else {
            ep.flow_error = true;
        }
    }

    fn interrupts(&self) -> Interrupts {
        self.ep().interrupts
    }

    fn set_interrupts(&mut self, interrupts: Interrupts) {
        self.ep_mut().interrupts = interrupts;
    }

    fn set_stall(&mut self, stall: bool) {
        self.ep_mut().stalled = stall;
    }

    fn is_stalled(&self) -> bool {
        self.ep().stalled
    }

    fn flow_error(&self) -> bool {
        self.ep().flow_error
    }

    fn clear_flow_error(&mut self) {
        self.ep_mut().flow_error = false;
    }
}
