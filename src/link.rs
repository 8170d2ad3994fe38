//! The data-link contract
//!
//! Higher layers, like the control state machine and class handlers, move
//! data through a [`DataLink`]. The interrupt-time engine tells them what
//! happened on the bus with a [`Token`].

use crate::{hardware::Interrupts, request::ControlRequest};

bitflags::bitflags! {
    /// Protocol events serviced on one endpoint
    ///
    /// A token is produced once per serviced interrupt event, per endpoint.
    /// `NAK` is set together with `IN` or `OUT`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Token: u8 {
        const IN = 1 << 0;
        const OUT = 1 << 1;
        const SETUP = 1 << 2;
        const STALL = 1 << 3;
        const NAK = 1 << 4;
        /// The hardware reported a FIFO overflow or underflow
        const FLOW_ERROR = 1 << 5;
    }
}

/// Byte-level access to endpoints
///
/// None of these calls block. Endpoints are addressed by number.
/// Operations on an endpoint that isn't allocated do nothing.
pub trait DataLink {
    /// Queue bytes for transmission, returning how many were accepted
    ///
    /// Accepts no more than the queue's free space. If anything was
    /// accepted, the IN interrupt is enabled so the engine starts draining.
    fn write(&mut self, ep: usize, buf: &[u8]) -> usize;
    /// Take received bytes out of the queue
    fn read(&mut self, ep: usize, buf: &mut [u8]) -> usize;
    /// Ask the engine to terminate the current IN transfer once the queue
    /// drains
    fn flush(&mut self, ep: usize);
    /// Returns `true` once the engine has finished the last flush
    fn flush_complete(&self, ep: usize) -> bool;
    /// Returns `true` if the most recent OUT packet was short
    fn data_ready(&self, ep: usize) -> bool;
    fn set_stall(&mut self, ep: usize, stall: bool);
    /// Maximum packet size, or zero if the endpoint isn't allocated
    fn max_packet_len(&self, ep: usize) -> usize;
    /// The endpoint's enabled interrupt sources
    fn interrupts(&mut self, ep: usize) -> Interrupts;
    fn set_interrupts(&mut self, ep: usize, interrupts: Interrupts);
    fn set_address(&mut self, address: u8);

    /// The SETUP packet sitting at the front of the endpoint's queue
    fn request(&self, ep: usize) -> Option<ControlRequest>;
    /// Rewind the endpoint's queue
    fn reset_queue(&mut self, ep: usize);
    /// Hand the current IN bank to the hardware, even if it's empty
    fn acknowledge_in(&mut self, ep: usize);
}

/// Reacts to the tokens produced for an endpoint
///
/// Handlers run in the foreground, never in interrupt context.
pub trait Handler<L: ?Sized> {
    fn handle(&mut self, link: &mut L, ep: usize, token: Token);
    /// The bus was reset; forget any transfer in progress
    fn reset(&mut self) {}
}
