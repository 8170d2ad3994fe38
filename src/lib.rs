//! A USB full-speed device driver for banked endpoint FIFO controllers
//!
//! `banked-usbd` drives controllers that expose one register window onto
//! the currently selected endpoint, with one or two packet banks behind
//! each endpoint FIFO. It moves bytes between those banks and per-endpoint
//! queues in the USB interrupt, and runs the endpoint 0 control state
//! machine, and your class handlers, in the foreground.
//!
//! The pieces:
//!
//! - [`Driver`] services the hardware and implements [`DataLink`], the
//!   byte-level contract that handlers use.
//! - [`Device`] shares a `Driver` between the USB interrupt and the
//!   foreground.
//! - [`Dispatcher`] delivers the captured [`Token`]s to one [`Handler`]
//!   per endpoint.
//! - [`Control`] is the endpoint 0 handler. It answers the standard
//!   requests from a [`Descriptors`] table.
//!
//! The register map is the ATmega32U4 USB controller. To interface the
//! library, you must define a safe implementation of [`Peripherals`]. For
//! a different part with the same banked model, implement [`Hardware`].
//!
//! # Critical sections
//!
//! The driver uses [`critical-section`] to share state with the interrupt.
//! Your application links one implementation; on AVR, that's typically
//! `avr-device` with its `critical-section-impl` feature.
//!
//! # VBUS
//!
//! After [`attach()`](Driver::attach), the driver watches VBUS. When VBUS
//! returns, [`poll()`](Driver::poll) reconnects the pull-up. A detached
//! driver stays detached.
//!
//! [`critical-section`]: https://crates.io/crates/critical-section

#![no_std]

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod buffer;
mod bus;
mod control;
mod dispatch;
mod driver;
mod endpoint;
mod hardware;
mod link;
mod queue;
mod ral;
mod request;
mod state;

pub mod descriptor;

#[cfg(test)]
mod sim;

pub use buffer::{Allocator, EndpointMemory};
pub use bus::Device;
pub use control::{Control, State as ControlState};
pub use descriptor::Descriptors;
pub use dispatch::Dispatcher;
pub use driver::{Activity, Driver, ShortPacketPolicy};
pub use endpoint::{AtomicFlags, EndpointContext, Flags};
pub use hardware::{
    Banks, DeviceEvents, EndpointConfig, Events, Hardware, Interrupts, PacketSize,
};
pub use link::{DataLink, Handler, Token};
pub use queue::ByteQueue;
pub use ral::Instance;
pub use request::ControlRequest;

/// Endpoints supported by the controller, endpoint 0 included
pub const MAX_ENDPOINTS: usize = 7;

/// A type that owns the USB controller's register block
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the
/// registers required for all USB operation. The pointer returned by
/// [`usb()`](Peripherals::usb) is assumed to be valid for the life of the
/// object, and will be cast to a register definition.
///
/// # Example
///
/// A safe implementation of `Peripherals` for the ATmega32U4, whose USB
/// registers start at `USBCON`, `0xD8`.
///
/// ```
/// use banked_usbd::Peripherals;
///
/// struct Usb {
///     _private: (),
/// }
///
/// impl Usb {
///     /// Call once
///     unsafe fn steal() -> Self {
///         Usb { _private: () }
///     }
/// }
///
/// unsafe impl Peripherals for Usb {
///     fn usb(&self) -> *const () {
///         0xD8 as *const ()
///     }
/// }
///
/// let usb = unsafe { Usb::steal() };
/// assert_eq!(usb.usb(), 0xD8 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB registers, starting at the general
    /// control register (`USBCON`)
    fn usb(&self) -> *const ();
}
