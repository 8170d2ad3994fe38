//! Internal USB driver
//!
//! The driver owns the hardware and every endpoint. On each interrupt,
//! [`poll()`](Driver::poll) moves bytes between the hardware banks and the
//! endpoint queues, and reports what happened as a [`Token`] per endpoint.
//! Foreground code reaches the same queues through [`DataLink`].

use crate::{
    buffer::Allocator,
    endpoint::{EndpointContext, Flags},
    hardware::{DeviceEvents, EndpointConfig, Events, Hardware, Interrupts},
    link::{DataLink, Token},
    queue::ByteQueue,
    ral,
    request::ControlRequest,
    state::EndpointState,
    MAX_ENDPOINTS,
};
use usb_device::{endpoint::EndpointType, UsbError};

/// When a partially filled IN bank is handed to the host
///
/// Full banks always go out as soon as they fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ShortPacketPolicy {
    /// Send a short (or zero-length) packet only once a flush is pending
    /// and the queue has drained.
    ///
    /// A writer can queue a transfer in pieces without the host seeing a
    /// premature short packet.
    #[default]
    OnFlush,
    /// Send whatever the bank holds after every drain.
    ///
    /// If the writer falls behind the engine, the host sees a short packet
    /// and considers the transfer finished.
    Immediate,
}

/// What one call to [`poll()`](Driver::poll) serviced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Activity {
    /// The host reset the bus; every endpoint was reinitialized
    pub reset: bool,
    pub suspend: bool,
    pub wakeup: bool,
    /// VBUS appeared or went away
    pub vbus: bool,
    /// Tokens produced for each endpoint, indexed by endpoint number
    pub tokens: [Token; MAX_ENDPOINTS],
}

impl Activity {
    /// Returns `true` if there's anything for a handler to see
    pub fn is_empty(&self) -> bool {
        !self.reset && self.tokens.iter().all(Token::is_empty)
    }
}

/// A USB driver
///
/// After you create a `Driver`, allocate endpoint 0 as a control endpoint,
/// allocate any other endpoints, then [`attach()`](Driver::attach). The
/// hardware configures the endpoints on the first bus reset.
pub struct Driver<'a, H> {
    hw: H,
    buffer_allocator: Allocator<'a>,
    endpoints: EndpointState<'a>,
    policy: ShortPacketPolicy,
    /// Set by `attach()`, cleared by `detach()`
    attached: bool,
}

impl<'a, P: crate::Peripherals> Driver<'a, ral::Instance<P>> {
    /// Create a driver for the registers owned by `peripherals`
    pub fn with_peripherals(peripherals: P, buffer: Allocator<'a>) -> Self {
        Driver::new(ral::Instance::new(peripherals), buffer)
    }
}

impl<'a, H: Hardware> Driver<'a, H> {
    /// Create a new `Driver`
    ///
    /// Endpoint queues allocated with [`allocate_ep()`](Driver::allocate_ep)
    /// are carved from `buffer`.
    pub fn new(hw: H, buffer: Allocator<'a>) -> Self {
        Driver {
            hw,
            buffer_allocator: buffer,
            endpoints: EndpointState::new(),
            policy: ShortPacketPolicy::default(),
            attached: false,
        }
    }

    pub fn set_short_packet_policy(&mut self, policy: ShortPacketPolicy) {
        self.policy = policy;
    }

    pub fn short_packet_policy(&self) -> ShortPacketPolicy {
        self.policy
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    fn check_allocation(&self, ep: usize, config: &EndpointConfig) -> Result<(), UsbError> {
        if ep >= MAX_ENDPOINTS || self.endpoints.is_active(ep) {
            return Err(UsbError::InvalidEndpoint);
        }
        match config.kind {
            EndpointType::Isochronous { .. } => Err(UsbError::Unsupported),
            EndpointType::Control if config.banks.count() > 1 => Err(UsbError::Unsupported),
            kind if ep == 0 && kind != EndpointType::Control => Err(UsbError::Unsupported),
            _ => Ok(()),
        }
    }

    /// Allocate an endpoint with a `queue_len` byte queue from endpoint memory
    pub fn allocate_ep(
        &mut self,
        ep: usize,
        config: EndpointConfig,
        queue_len: usize,
    ) -> Result<(), UsbError> {
        self.check_allocation(ep, &config)?;
        let buffer = self
            .buffer_allocator
            .allocate(queue_len)
            .ok_or(UsbError::EndpointMemoryOverflow)?;
        self.allocate_ep_with(ep, config, ByteQueue::new(buffer))
    }

    /// Allocate an endpoint that uses an application-supplied queue
    pub fn allocate_ep_with(
        &mut self,
        ep: usize,
        config: EndpointConfig,
        queue: ByteQueue<'a>,
    ) -> Result<(), UsbError> {
        self.check_allocation(ep, &config)?;
        self.endpoints
            .register(EndpointContext::new(ep, config, queue))
            .map_err(|_| UsbError::InvalidEndpoint)?;
        debug!("EP{} ALLOCATED {} BYTES", ep, self.queue(ep).map_or(0, ByteQueue::capacity));
        Ok(())
    }

    /// Swap the queue of an allocated endpoint, returning the old queue
    ///
    /// The endpoint's transfer state is reset.
    pub fn set_queue(&mut self, ep: usize, queue: ByteQueue<'a>) -> Option<ByteQueue<'a>> {
        let ep = self.endpoints.endpoint_mut(ep)?;
        let old = ep.replace_queue(queue);
        ep.reset();
        Some(old)
    }

    pub fn is_allocated(&self, ep: usize) -> bool {
        self.endpoints.is_active(ep)
    }

    pub fn endpoint(&self, ep: usize) -> Option<&EndpointContext<'a>> {
        self.endpoints.endpoint(ep)
    }

    pub fn queue(&self, ep: usize) -> Option<&ByteQueue<'a>> {
        self.endpoints.endpoint(ep).map(EndpointContext::queue)
    }

    /// Connect to the host, and again whenever VBUS returns
    pub fn attach(&mut self) {
        self.attached = true;
        self.hw.attach();
    }

    pub fn detach(&mut self) {
        self.attached = false;
        self.hw.detach();
    }

    /// Reinitialize every allocated endpoint
    ///
    /// Queues are emptied, flags cleared, and the hardware layout and
    /// default interrupt sources are programmed again.
    pub fn bus_reset(&mut self) {
        for ep in self.endpoints.endpoints_mut() {
            ep.reset();
            self.hw.select(ep.number());
            if !self.hw.configure(ep.config()) {
                warn!("EP{} CONFIGURATION REJECTED", ep.number());
            }
            self.hw.set_interrupts(ep.config().default_interrupts());
        }
        debug!("RESET");
    }

    /// Service the controller
    ///
    /// Call this from the USB interrupt handler, or use
    /// [`Device::on_interrupt()`](crate::Device::on_interrupt).
    pub fn poll(&mut self) -> Activity {
        let mut activity = Activity::default();

        let events = self.hw.device_events();
        if events.contains(DeviceEvents::END_OF_RESET) {
            self.hw.acknowledge_device(DeviceEvents::END_OF_RESET);
            self.bus_reset();
            activity.reset = true;
        }
        if events.contains(DeviceEvents::SUSPEND) {
            self.hw.acknowledge_device(DeviceEvents::SUSPEND);
            activity.suspend = true;
            debug!("SUSPEND");
        }
        if events.contains(DeviceEvents::WAKEUP) {
            self.hw.acknowledge_device(DeviceEvents::WAKEUP);
            activity.wakeup = true;
            debug!("WAKEUP");
        }
        if events.contains(DeviceEvents::VBUS) {
            self.hw.acknowledge_device(DeviceEvents::VBUS);
            activity.vbus = true;
            let present = self.hw.vbus_present();
            if present && self.attached {
                self.hw.attach();
            }
            debug!("VBUS {}", present);
        }

        let pending = self.hw.pending_endpoints();
        for (ep, token) in activity.tokens.iter_mut().enumerate() {
            if pending & (1 << ep) != 0 {
                *token = self.service(ep);
            }
        }
        activity
    }

    /// Service the pending events of one endpoint
    fn service(&mut self, ep: usize) -> Token {
        let policy = self.policy;
        let Some(ctx) = self.endpoints.endpoint_mut(ep) else {
            return Token::empty();
        };
        let hw = &mut self.hw;
        hw.select(ep);

        let interrupts = hw.interrupts();
        let events = hw.events() & Events::enabled_by(interrupts);
        let mut token = Token::empty();

        if ctx.is_control()
            && events.contains(Events::IN_READY | Events::OUT_READY)
            && ctx.flags().contains(Flags::DIR_IN)
        {
            abort_in(hw, ctx);
            return Token::IN | Token::OUT;
        }

        if events.contains(Events::SETUP) {
            handle_setup(hw, ctx);
            token |= Token::SETUP;
        } else if events.contains(Events::IN_READY) {
            drain(hw, ctx, policy);
            token |= Token::IN;
        } else if events.contains(Events::OUT_READY) {
            fill(hw, ctx);
            token |= Token::OUT;
        }

        if events.contains(Events::STALLED) {
            hw.acknowledge(Events::STALLED);
            token |= Token::STALL;
        }
        if events.contains(Events::NAK_IN) {
            hw.acknowledge(Events::NAK_IN);
            token |= Token::NAK | Token::IN;
        }
        if events.contains(Events::NAK_OUT) {
            hw.acknowledge(Events::NAK_OUT);
            token |= Token::NAK | Token::OUT;
        }
        if interrupts.contains(Interrupts::FLOW_ERROR) && hw.flow_error() {
            hw.clear_flow_error();
            warn!("EP{} FLOW ERROR", ep);
            token |= Token::FLOW_ERROR;
        }

        trace!("EP{} TOKEN {=u8}", ep, token.bits());
        token
    }
}

/// Copy a SETUP packet into the endpoint's queue
///
/// A SETUP starts a new control transfer, so any IN transfer or flush in
/// progress is dropped.
fn handle_setup<H: Hardware>(hw: &mut H, ep: &mut EndpointContext) {
    let count = hw.byte_count();

    let mut interrupts = hw.interrupts() - Interrupts::IN;
    if ep.flags().test_and_clear(Flags::THROTTLED) {
        interrupts |= Interrupts::OUT;
    }
    hw.set_interrupts(interrupts);
    ep.flags()
        .remove(Flags::FLUSH | Flags::DIR_IN | Flags::DIR_OUT);
    if ep.is_control() {
        hw.set_stall(false);
    }

    let number = ep.number();
    let queue = ep.queue_mut();
    queue.reset();
    if queue.capacity() < count {
        warn!("EP{} SETUP OF {} BYTES EXCEEDS QUEUE", number, count);
        hw.set_stall(true);
    } else {
        for _ in 0..count {
            let byte = hw.read_byte();
            // Capacity was checked above.
            let _ = queue.push(byte);
        }
    }
    // Frees the bank even after a stall; otherwise the event never clears.
    hw.acknowledge(Events::SETUP);
}

/// Move OUT data from the hardware banks into the queue
///
/// If the queue fills while a bank still holds data, the OUT interrupt is
/// disabled and the hardware NAKs the host until a reader makes room.
fn fill<H: Hardware>(hw: &mut H, ep: &mut EndpointContext) {
    ep.flags().insert(Flags::DIR_OUT);
    loop {
        if hw.byte_count() > 0 {
            if ep.queue().is_full() {
                ep.flags().insert(Flags::THROTTLED);
                let interrupts = hw.interrupts() - Interrupts::OUT;
                hw.set_interrupts(interrupts);
                trace!("EP{} THROTTLED", ep.number());
                break;
            }
            let byte = hw.read_byte();
            if ep.queue_mut().push(byte).is_ok() {
                ep.count_rx();
            }
        } else if ep.is_control() {
            ep.finish_rx_packet();
            hw.acknowledge(Events::OUT_READY);
            break;
        } else if hw.busy_banks() > 0 {
            ep.finish_rx_packet();
            hw.acknowledge(Events::OUT_READY);
            hw.release_bank();
        } else {
            hw.acknowledge(Events::OUT_READY);
            break;
        }
    }
}

/// Move IN data from the queue into the hardware banks
fn drain<H: Hardware>(hw: &mut H, ep: &mut EndpointContext, policy: ShortPacketPolicy) {
    let size = ep.max_packet_len();
    let banks = ep.config().banks.count();

    while !ep.queue().is_empty() {
        if hw.byte_count() < size {
            if let Some(byte) = ep.queue_mut().pop() {
                hw.write_byte(byte);
            }
        } else if !ep.is_control() && hw.busy_banks() + 1 < banks {
            send_packet(hw, ep);
        } else {
            break;
        }
    }

    let flushing = ep.flags().contains(Flags::FLUSH);
    let drained = ep.queue().is_empty();
    let release = match policy {
        ShortPacketPolicy::Immediate => true,
        ShortPacketPolicy::OnFlush => hw.byte_count() == size || (flushing && drained),
    };
    if release {
        send_packet(hw, ep);
    }
    if drained {
        let interrupts = hw.interrupts() - Interrupts::IN;
        hw.set_interrupts(interrupts);
        ep.flags().remove(Flags::FLUSH | Flags::DIR_IN);
    }
}

/// The host switched direction in the middle of an IN transfer
///
/// Everything queued or banked for the transfer is discarded, and the
/// endpoint waits for the next SETUP.
fn abort_in<H: Hardware>(hw: &mut H, ep: &mut EndpointContext) {
    debug!("EP{} IN ABORTED", ep.number());
    hw.acknowledge(Events::IN_READY | Events::OUT_READY);
    let interrupts = hw.interrupts() - Interrupts::IN;
    hw.set_interrupts(interrupts);
    while hw.busy_banks() > 0 {
        hw.acknowledge(Events::OUT_READY);
    }
    hw.reset_fifo(ep.number());
    ep.reset();
    hw.set_interrupts(interrupts | Interrupts::IN | Interrupts::OUT);
}

/// Hand the current IN bank to the hardware
fn send_packet<H: Hardware>(hw: &mut H, ep: &EndpointContext) {
    hw.acknowledge(Events::IN_READY);
    if !ep.is_control() {
        hw.release_bank();
    }
}

impl<H: Hardware> DataLink for Driver<'_, H> {
    fn write(&mut self, ep: usize, buf: &[u8]) -> usize {
        let Some(ctx) = self.endpoints.endpoint_mut(ep) else {
            warn!("EP{} WRITE TO UNALLOCATED ENDPOINT", ep);
            return 0;
        };
        let accepted = ctx.queue_mut().extend(buf);
        if accepted > 0 {
            ctx.flags().insert(Flags::DIR_IN);
            self.hw.select(ep);
            let interrupts = self.hw.interrupts() | Interrupts::IN;
            self.hw.set_interrupts(interrupts);
        }
        trace!("EP{} WRITE {}/{}", ep, accepted, buf.len());
        accepted
    }

    fn read(&mut self, ep: usize, buf: &mut [u8]) -> usize {
        let Some(ctx) = self.endpoints.endpoint_mut(ep) else {
            warn!("EP{} READ FROM UNALLOCATED ENDPOINT", ep);
            return 0;
        };
        let count = ctx.queue_mut().drain_into(buf);
        if !ctx.queue().is_full() && ctx.flags().test_and_clear(Flags::THROTTLED) {
            self.hw.select(ep);
            let interrupts = self.hw.interrupts() | Interrupts::OUT;
            self.hw.set_interrupts(interrupts);
        }
        trace!("EP{} READ {}", ep, count);
        count
    }

    fn flush(&mut self, ep: usize) {
        let Some(ctx) = self.endpoints.endpoint_mut(ep) else {
            warn!("EP{} FLUSH OF UNALLOCATED ENDPOINT", ep);
            return;
        };
        ctx.flags().insert(Flags::FLUSH | Flags::DIR_IN);
        self.hw.select(ep);
        let interrupts = self.hw.interrupts() | Interrupts::IN;
        self.hw.set_interrupts(interrupts);
    }

    fn flush_complete(&self, ep: usize) -> bool {
        self.endpoints
            .endpoint(ep)
            .map_or(true, |ctx| !ctx.flags().contains(Flags::FLUSH))
    }

    fn data_ready(&self, ep: usize) -> bool {
        self.endpoints
            .endpoint(ep)
            .map_or(false, |ctx| ctx.flags().contains(Flags::DATA_READY))
    }

    fn set_stall(&mut self, ep: usize, stall: bool) {
        if self.endpoints.is_active(ep) {
            self.hw.select(ep);
            self.hw.set_stall(stall);
            debug!("EP{} STALL {}", ep, stall);
        }
    }

    fn interrupts(&mut self, ep: usize) -> Interrupts {
        if !self.endpoints.is_active(ep) {
            return Interrupts::empty();
        }
        self.hw.select(ep);
        self.hw.interrupts()
    }

    fn set_interrupts(&mut self, ep: usize, interrupts: Interrupts) {
        if self.endpoints.is_active(ep) {
            self.hw.select(ep);
            self.hw.set_interrupts(interrupts);
        }
    }

    fn max_packet_len(&self, ep: usize) -> usize {
        self.endpoints
            .endpoint(ep)
            .map_or(0, EndpointContext::max_packet_len)
    }

    fn set_address(&mut self, address: u8) {
        self.hw.set_address(address);
        debug!("ADDRESS {}", address);
    }

    fn request(&self, ep: usize) -> Option<ControlRequest> {
        let queue = self.endpoints.endpoint(ep)?.queue();
        ControlRequest::parse(queue.as_linear()?)
    }

    fn reset_queue(&mut self, ep: usize) {
        if let Some(ctx) = self.endpoints.endpoint_mut(ep) {
            ctx.queue_mut().reset();
        }
    }

    fn acknowledge_in(&mut self, ep: usize) {
        if let Some(ctx) = self.endpoints.endpoint(ep) {
            self.hw.select(ep);
            send_packet(&mut self.hw, ctx);
        }
    }
}
