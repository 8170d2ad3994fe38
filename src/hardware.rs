//! The peripheral seam
//!
//! [`Hardware`] describes what the driver needs from a banked endpoint
//! FIFO controller. Endpoint operations act on the endpoint chosen by the
//! most recent [`select()`](Hardware::select). The register-backed
//! implementation lives at the bottom of this module.

use crate::ral;
use usb_device::{endpoint::EndpointType, UsbDirection};

bitflags::bitflags! {
    /// Pending endpoint events, as the controller reports them
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Events: u8 {
        /// The current bank can accept IN data
        const IN_READY = 1 << 0;
        /// A STALL handshake was sent
        const STALLED = 1 << 1;
        /// An OUT packet landed in a bank
        const OUT_READY = 1 << 2;
        /// A SETUP packet landed in the bank
        const SETUP = 1 << 3;
        const NAK_OUT = 1 << 4;
        /// Read / write allowed on the current bank
        const RW_ALLOWED = 1 << 5;
        const NAK_IN = 1 << 6;
        /// Bank hand-off control
        const FIFO_CONTROL = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Per-endpoint interrupt sources
    ///
    /// Disabling `IN` means "NAK every IN token"; disabling `OUT` means
    /// "NAK every OUT token". Only software re-enables them.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Interrupts: u8 {
        const IN = 1 << 0;
        const STALLED = 1 << 1;
        const OUT = 1 << 2;
        const SETUP = 1 << 3;
        const NAK_OUT = 1 << 4;
        const NAK_IN = 1 << 6;
        const FLOW_ERROR = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Device-level bus events
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DeviceEvents: u8 {
        const SUSPEND = 1 << 0;
        const START_OF_FRAME = 1 << 2;
        const END_OF_RESET = 1 << 3;
        const WAKEUP = 1 << 4;
        const END_OF_RESUME = 1 << 5;
        const UPSTREAM_RESUME = 1 << 6;
        /// VBUS appeared or went away
        const VBUS = 1 << 7;
    }
}

impl Events {
    /// The events that the given interrupt sources report
    pub fn enabled_by(interrupts: Interrupts) -> Events {
        let mut events = Events::empty();
        events.set(Events::IN_READY, interrupts.contains(Interrupts::IN));
        events.set(Events::STALLED, interrupts.contains(Interrupts::STALLED));
        events.set(Events::OUT_READY, interrupts.contains(Interrupts::OUT));
        events.set(Events::SETUP, interrupts.contains(Interrupts::SETUP));
        events.set(Events::NAK_OUT, interrupts.contains(Interrupts::NAK_OUT));
        events.set(Events::NAK_IN, interrupts.contains(Interrupts::NAK_IN));
        events
    }
}

/// Maximum packet size of an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketSize {
    Bytes8 = 0,
    Bytes16 = 1,
    Bytes32 = 2,
    Bytes64 = 3,
    Bytes128 = 4,
    Bytes256 = 5,
    Bytes512 = 6,
}

impl PacketSize {
    pub const fn len(self) -> usize {
        1 << (self as usize + 3)
    }

    /// Returns `None` unless `len` is a supported power of two
    pub const fn from_len(len: usize) -> Option<Self> {
        Some(match len {
            8 => PacketSize::Bytes8,
            16 => PacketSize::Bytes16,
            32 => PacketSize::Bytes32,
            64 => PacketSize::Bytes64,
            128 => PacketSize::Bytes128,
            256 => PacketSize::Bytes256,
            512 => PacketSize::Bytes512,
            _ => return None,
        })
    }
}

/// Number of hardware banks behind an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Banks {
    Single = 0,
    Double = 1,
}

impl Banks {
    pub const fn count(self) -> usize {
        self as usize + 1
    }
}

/// Hardware layout of one endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub kind: EndpointType,
    /// Ignored for control endpoints, which move data both ways
    pub direction: UsbDirection,
    pub size: PacketSize,
    pub banks: Banks,
}

impl EndpointConfig {
    /// A single-banked control endpoint
    pub const fn control(size: PacketSize) -> Self {
        EndpointConfig {
            kind: EndpointType::Control,
            direction: UsbDirection::Out,
            size,
            banks: Banks::Single,
        }
    }

    pub const fn bulk(direction: UsbDirection, size: PacketSize, banks: Banks) -> Self {
        EndpointConfig {
            kind: EndpointType::Bulk,
            direction,
            size,
            banks,
        }
    }

    pub const fn interrupt(direction: UsbDirection, size: PacketSize) -> Self {
        EndpointConfig {
            kind: EndpointType::Interrupt,
            direction,
            size,
            banks: Banks::Single,
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind == EndpointType::Control
    }

    /// Returns `true` if the endpoint ever sends IN data
    pub fn is_in(&self) -> bool {
        self.is_control() || self.direction == UsbDirection::In
    }

    /// Returns `true` if the endpoint ever receives OUT data
    pub fn is_out(&self) -> bool {
        self.is_control() || self.direction == UsbDirection::Out
    }

    /// The interrupt sources enabled after a bus reset
    pub fn default_interrupts(&self) -> Interrupts {
        if self.is_control() {
            Interrupts::SETUP | Interrupts::OUT
        } else if self.direction == UsbDirection::Out {
            Interrupts::OUT
        } else {
            Interrupts::empty()
        }
    }

    fn type_bits(&self) -> u8 {
        match self.kind {
            EndpointType::Control => 0,
            EndpointType::Isochronous { .. } => 1,
            EndpointType::Bulk => 2,
            EndpointType::Interrupt => 3,
        }
    }
}

/// A banked endpoint FIFO controller
pub trait Hardware {
    /// Enable bus-event interrupts and connect the pull-up, making the
    /// device visible to the host
    fn attach(&mut self);
    fn detach(&mut self);
    /// Returns `true` while the host powers VBUS
    fn vbus_present(&self) -> bool;
    fn device_events(&self) -> DeviceEvents;
    fn acknowledge_device(&mut self, events: DeviceEvents);
    /// Program and enable the device address
    fn set_address(&mut self, address: u8);
    /// Bitmask of endpoints with an enabled, pending event
    fn pending_endpoints(&self) -> u8;

    fn select(&mut self, ep: usize);
    /// Enable and lay out the selected endpoint
    ///
    /// Returns `false` if the controller rejected the layout.
    fn configure(&mut self, config: &EndpointConfig) -> bool;
    /// Reset the FIFO of endpoint `ep`, discarding every bank
    fn reset_fifo(&mut self, ep: usize);
    fn events(&self) -> Events;
    /// Clear the given events
    ///
    /// On control endpoints, clearing `IN_READY` sends the bank and
    /// clearing `OUT_READY` or `SETUP` frees it.
    fn acknowledge(&mut self, events: Events);
    /// Hand the current bank over and switch to the next one
    ///
    /// IN banks go to the host; OUT banks are freed for the host. Not used
    /// on control endpoints.
    fn release_bank(&mut self);
    /// Banks the hardware considers busy
    fn busy_banks(&self) -> usize;
    /// Bytes in the current bank
    fn byte_count(&self) -> usize;
    fn read_byte(&mut self) -> u8;
    fn write_byte(&mut self, byte: u8);
    fn interrupts(&self) -> Interrupts;
    fn set_interrupts(&mut self, interrupts: Interrupts);
    fn set_stall(&mut self, stall: bool);
    fn is_stalled(&self) -> bool;
    /// Returns `true` if the selected endpoint overflowed or underflowed
    fn flow_error(&self) -> bool;
    fn clear_flow_error(&mut self);
}

impl<P> Hardware for ral::Instance<P> {
    fn attach(&mut self) {
        ral::modify_reg!(crate::ral, self, USBCON, USBE: 1, OTGPADE: 1, VBUSTE: 1, FRZCLK: 0);
        ral::write_reg!(crate::ral, self, UDIEN, EORSTE: 1, SUSPE: 1, WAKEUPE: 1);
        ral::modify_reg!(crate::ral, self, UDCON, DETACH: 0);
    }

    fn detach(&mut self) {
        ral::modify_reg!(crate::ral, self, UDCON, DETACH: 1);
        ral::write_reg!(crate::ral, self, UDIEN, 0);
    }

    fn vbus_present(&self) -> bool {
        ral::read_reg!(crate::ral, self, USBSTA, VBUS == 1)
    }

    fn device_events(&self) -> DeviceEvents {
        let udint = ral::read_reg!(crate::ral, self, UDINT);
        let mut events = DeviceEvents::from_bits_truncate(udint) - DeviceEvents::VBUS;
        events.set(
            DeviceEvents::VBUS,
            ral::read_reg!(crate::ral, self, USBINT, VBUSTI == 1),
        );
        events
    }

    fn acknowledge_device(&mut self, events: DeviceEvents) {
        // Flags clear on zero; ones are ignored. Bit 7 is reserved.
        let udint = (events - DeviceEvents::VBUS).bits();
        ral::write_reg!(crate::ral, self, UDINT, !udint & 0x7F);
        if events.contains(DeviceEvents::VBUS) {
            ral::modify_reg!(crate::ral, self, USBINT, VBUSTI: 0);
        }
    }

    fn set_address(&mut self, address: u8) {
        // The address must be in place before ADDEN, in a separate write.
        ral::write_reg!(crate::ral, self, UDADDR, UADD: address);
        ral::modify_reg!(crate::ral, self, UDADDR, ADDEN: 1);
    }

    fn pending_endpoints(&self) -> u8 {
        ral::read_reg!(crate::ral, self, UEINT, EPINT)
    }

    fn select(&mut self, ep: usize) {
        ral::write_reg!(crate::ral, self, UENUM, EPNUM: ep as u8);
    }

    fn configure(&mut self, config: &EndpointConfig) -> bool {
        let direction = (config.direction == UsbDirection::In && !config.is_control()) as u8;
        ral::modify_reg!(crate::ral, self, UECONX, EPEN: 1);
        ral::write_reg!(crate::ral, self, UECFG0X, EPTYPE: config.type_bits(), EPDIR: direction);
        ral::write_reg!(
            crate::ral,
            self,
            UECFG1X,
            EPSIZE: config.size as u8,
            EPBK: config.banks as u8,
            ALLOC: 1
        );
        ral::read_reg!(crate::ral, self, UESTA0X, CFGOK == 1)
    }

    fn reset_fifo(&mut self, ep: usize) {
        ral::write_reg!(crate::ral, self, UERST, EPRST: 1u8 << ep);
        ral::write_reg!(crate::ral, self, UERST, 0);
    }

    fn events(&self) -> Events {
        Events::from_bits_truncate(ral::read_reg!(crate::ral, self, UEINTX))
    }

    fn acknowledge(&mut self, events: Events) {
        ral::write_reg!(crate::ral, self, UEINTX, !events.bits());
    }

    fn release_bank(&mut self) {
        ral::write_reg!(crate::ral, self, UEINTX, !Events::FIFO_CONTROL.bits());
    }

    fn busy_banks(&self) -> usize {
        ral::read_reg!(crate::ral, self, UESTA0X, NBUSYBK) as usize
    }

    fn byte_count(&self) -> usize {
        let high = ral::read_reg!(crate::ral, self, UEBCHX, BYCT) as usize;
        let low = ral::read_reg!(crate::ral, self, UEBCLX) as usize;
        (high << 8) | low
    }

    fn read_byte(&mut self) -> u8 {
        ral::read_reg!(crate::ral, self, UEDATX)
    }

    fn write_byte(&mut self, byte: u8) {
        ral::write_reg!(crate::ral, self, UEDATX, byte);
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts::from_bits_truncate(ral::read_reg!(crate::ral, self, UEIENX))
    }

    fn set_interrupts(&mut self, interrupts: Interrupts) {
        ral::write_reg!(crate::ral, self, UEIENX, interrupts.bits());
    }

    fn set_stall(&mut self, stall: bool) {
        if stall {
            ral::modify_reg!(crate::ral, self, UECONX, STALLRQ: 1);
        } else {
            ral::modify_reg!(crate::ral, self, UECONX, STALLRQC: 1);
        }
    }

    fn is_stalled(&self) -> bool {
        ral::read_reg!(crate::ral, self, UECONX, STALLRQ == 1)
    }

    fn flow_error(&self) -> bool {
        ral::read_reg!(crate::ral, self, UESTA0X, OVERFI == 1)
            || ral::read_reg!(crate::ral, self, UESTA0X, UNDERFI == 1)
    }

    fn clear_flow_error(&mut self) {
        ral::modify_reg!(crate::ral, self, UESTA0X, OVERFI: 0, UNDERFI: 0);
    }
}
