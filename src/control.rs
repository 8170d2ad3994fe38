//! Endpoint 0 control transfers
//!
//! [`Control`] answers the standard requests a host sends during
//! enumeration. It runs as a [`Handler`] in the foreground. It never
//! waits on the hardware; instead, it parks in a state until the token it
//! needs arrives.

use usb_device::{
    control::{Request, RequestType},
    descriptor::descriptor_type,
};

use crate::{
    descriptor::{Descriptors, CONFIGURATION_LEN},
    hardware::Interrupts,
    link::{DataLink, Handler, Token},
    request::ControlRequest,
};

/// Status reported by GET_STATUS: bus powered, no remote wakeup
const STATUS: [u8; 2] = [0, 0];

/// Where the control state machine is in a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Idle, expecting a request
    Setup,
    /// A response is queued; waiting for it to drain
    AwaitFlush,
    /// An address is latched; waiting for the status stage to be queued
    AwaitInForAddress,
    /// The status stage is queued; the address applies once it's sent
    AwaitStatusForAddress,
}

/// The control state machine
///
/// Class and vendor requests go to the `next` handler, if there is one.
/// Otherwise they stall.
pub struct Control<'d, L: ?Sized> {
    descriptors: Descriptors<'d>,
    state: State,
    address: u8,
    configuration: u8,
    /// Response bytes that didn't fit in the queue
    pending: &'d [u8],
    /// The response ends on a packet boundary, short of wLength
    zlp: bool,
    next: Option<&'d mut dyn Handler<L>>,
}

impl<'d, L: ?Sized> Control<'d, L> {
    pub fn new(descriptors: Descriptors<'d>) -> Self {
        Control {
            descriptors,
            state: State::Setup,
            address: 0,
            configuration: 0,
            pending: &[],
            zlp: false,
            next: None,
        }
    }

    /// Delegate class and vendor requests to `next`
    pub fn with_next(mut self, next: &'d mut dyn Handler<L>) -> Self {
        self.next = Some(next);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The value of the last SET_CONFIGURATION, or zero
    pub fn configuration(&self) -> u8 {
        self.configuration
    }
}

impl<'d, L: DataLink + ?Sized> Control<'d, L> {
    fn setup(&mut self, link: &mut L, ep: usize) {
        let Some(request) = link.request(ep) else {
            warn!("EP{} SETUP WITHOUT A REQUEST", ep);
            return;
        };
        debug!(
            "EP{} REQUEST {=u8:#x} {=u8} VALUE {=u16:#x} LENGTH {=u16}",
            ep, request.request_type, request.request, request.value, request.length
        );

        if request.kind() != RequestType::Standard {
            match self.next.as_deref_mut() {
                Some(next) => next.handle(link, ep, Token::SETUP),
                None => self.stall(link, ep),
            }
            return;
        }

        link.reset_queue(ep);
        match request.request {
            Request::GET_DESCRIPTOR => self.get_descriptor(link, ep, &request),
            Request::SET_ADDRESS => {
                self.address = (request.value & 0x7F) as u8;
                let interrupts = link.interrupts(ep) | Interrupts::IN;
                link.set_interrupts(ep, interrupts);
                self.state = State::AwaitInForAddress;
            }
            Request::SET_CONFIGURATION => {
                self.configuration = request.value as u8;
                link.flush(ep);
                debug!("CONFIGURATION {}", self.configuration);
            }
            Request::GET_STATUS => self.respond(link, ep, &STATUS, request.length),
            _ => self.stall(link, ep),
        }
    }

    fn get_descriptor(&mut self, link: &mut L, ep: usize, request: &ControlRequest) {
        let (kind, _) = request.descriptor_type_index();
        match kind {
            descriptor_type::DEVICE => {
                let device = self.descriptors.device();
                self.respond(link, ep, device, request.length)
            }
            descriptor_type::CONFIGURATION => {
                let configuration = if usize::from(request.length) == CONFIGURATION_LEN {
                    self.descriptors.configuration_header()
                } else {
                    self.descriptors.configuration()
                };
                self.respond(link, ep, configuration, request.length)
            }
            descriptor_type::STRING => {
                // No string table yet; the host gives up on its own.
                trace!("EP{} STRING DESCRIPTOR UNAVAILABLE", ep);
            }
            _ => self.stall(link, ep),
        }
    }

    /// Queue a response, no longer than the host asked for
    ///
    /// A response that's shorter than `length` and fills its last packet
    /// is followed by a zero-length packet.
    fn respond(&mut self, link: &mut L, ep: usize, response: &'d [u8], length: u16) {
        let response = &response[..response.len().min(usize::from(length))];
        let max_packet = link.max_packet_len(ep);
        self.zlp = !response.is_empty()
            && response.len() < usize::from(length)
            && max_packet > 0
            && response.len() % max_packet == 0;
        let accepted = link.write(ep, response);
        self.pending = &response[accepted..];
        if self.pending.is_empty() {
            link.flush(ep);
        }
        self.state = State::AwaitFlush;
    }

    fn stall(&mut self, link: &mut L, ep: usize) {
        warn!("EP{} STALL", ep);
        link.set_stall(ep, true);
        self.state = State::Setup;
    }

    fn await_flush(&mut self, link: &mut L, ep: usize, token: Token) {
        if token.contains(Token::IN | Token::OUT) {
            // The host ended the data stage early.
            self.pending = &[];
            self.zlp = false;
            self.state = State::Setup;
        } else if !self.pending.is_empty() {
            let pending = self.pending;
            let accepted = link.write(ep, pending);
            self.pending = &pending[accepted..];
            if self.pending.is_empty() {
                link.flush(ep);
            }
        } else if link.flush_complete(ep) {
            if core::mem::take(&mut self.zlp) {
                link.flush(ep);
            } else {
                self.state = State::Setup;
            }
        }
    }

    /// Queue the zero-length status stage, still at address 0
    fn await_in_for_address(&mut self, link: &mut L, ep: usize, token: Token) {
        if token.contains(Token::IN) {
            link.acknowledge_in(ep);
            let interrupts = link.interrupts(ep) | Interrupts::IN;
            link.set_interrupts(ep, interrupts);
            self.state = State::AwaitStatusForAddress;
        } else {
            debug!("EP{} ADDRESS {} ABANDONED", ep, self.address);
            self.state = State::Setup;
        }
    }

    /// The bank is free again, so the host has the status stage
    fn await_status_for_address(&mut self, link: &mut L, ep: usize, token: Token) {
        if token.contains(Token::IN) {
            link.set_address(self.address);
            link.reset_queue(ep);
        } else {
            debug!("EP{} ADDRESS {} ABANDONED", ep, self.address);
        }
        self.state = State::Setup;
    }
}

impl<'d, L: DataLink + ?Sized> Handler<L> for Control<'d, L> {
    fn handle(&mut self, link: &mut L, ep: usize, token: Token) {
        if token.contains(Token::SETUP) {
            // A new request replaces whatever transfer was in progress.
            self.pending = &[];
            self.zlp = false;
            self.state = State::Setup;
            self.setup(link, ep);
            return;
        }
        match self.state {
            State::Setup => {
                if let Some(next) = self.next.as_deref_mut() {
                    next.handle(link, ep, token);
                }
            }
            State::AwaitFlush => self.await_flush(link, ep, token),
            State::AwaitInForAddress => self.await_in_for_address(link, ep, token),
            State::AwaitStatusForAddress => self.await_status_for_address(link, ep, token),
        }
    }

    fn reset(&mut self) {
        self.state = State::Setup;
        self.pending = &[];
        self.zlp = false;
        self.address = 0;
        self.configuration = 0;
        if let Some(next) = self.next.as_deref_mut() {
            next.reset();
        }
    }
}
