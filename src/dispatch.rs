//! Foreground delivery of tokens to endpoint handlers

use crate::{
    bus::Device,
    driver::Driver,
    hardware::Hardware,
    link::{Handler, Token},
    MAX_ENDPOINTS,
};

/// Runs endpoint handlers outside of interrupt context
///
/// Register one [`Handler`] per endpoint, then call
/// [`dispatch()`](Dispatcher::dispatch) from the main loop. Each call
/// delivers at most one batch of captured tokens, and calls each handler
/// at most once.
///
/// ```
/// use banked_usbd::{Dispatcher, DataLink, Handler, Token};
///
/// struct Echo;
///
/// impl<L: DataLink + ?Sized> Handler<L> for Echo {
///     fn handle(&mut self, link: &mut L, ep: usize, token: Token) {
///         if token.contains(Token::OUT) {
///             let mut buf = [0; 64];
///             let len = link.read(ep, &mut buf);
///             link.write(ep, &buf[..len]);
///         }
///     }
/// }
///
/// # struct Link;
/// # impl DataLink for Link {
/// #   fn write(&mut self, _: usize, _: &[u8]) -> usize { 0 }
/// #   fn read(&mut self, _: usize, _: &mut [u8]) -> usize { 0 }
/// #   fn flush(&mut self, _: usize) {}
/// #   fn flush_complete(&self, _: usize) -> bool { true }
/// #   fn data_ready(&self, _: usize) -> bool { false }
/// #   fn set_stall(&mut self, _: usize, _: bool) {}
/// #   fn max_packet_len(&self, _: usize) -> usize { 64 }
/// #   fn interrupts(&mut self, _: usize) -> banked_usbd::Interrupts { banked_usbd::Interrupts::empty() }
/// #   fn set_interrupts(&mut self, _: usize, _: banked_usbd::Interrupts) {}
/// #   fn set_address(&mut self, _: u8) {}
/// #   fn request(&self, _: usize) -> Option<banked_usbd::ControlRequest> { None }
/// #   fn reset_queue(&mut self, _: usize) {}
/// #   fn acknowledge_in(&mut self, _: usize) {}
/// # }
/// let mut echo = Echo;
/// let mut dispatcher = Dispatcher::<Link>::new();
/// assert!(dispatcher.set_handler(3, &mut echo));
/// assert!(!dispatcher.set_handler(7, &mut Echo));
/// ```
pub struct Dispatcher<'h, L: ?Sized> {
    handlers: [Option<&'h mut dyn Handler<L>>; MAX_ENDPOINTS],
}

impl<'h, L: ?Sized> Dispatcher<'h, L> {
    pub fn new() -> Self {
        Dispatcher {
            handlers: core::array::from_fn(|_| None),
        }
    }

    /// Bind a handler to an endpoint, replacing any handler already bound
    ///
    /// Returns `false` if the endpoint number is out of range.
    pub fn set_handler(&mut self, ep: usize, handler: &'h mut dyn Handler<L>) -> bool {
        match self.handlers.get_mut(ep) {
            Some(slot) => {
                *slot = Some(handler);
                true
            }
            None => false,
        }
    }

    /// Unbind and return an endpoint's handler
    pub fn clear_handler(&mut self, ep: usize) -> Option<&'h mut dyn Handler<L>> {
        self.handlers.get_mut(ep).and_then(Option::take)
    }

    /// Deliver one batch of tokens
    ///
    /// On `reset`, every handler is reset before any token is delivered.
    pub fn deliver(&mut self, link: &mut L, reset: bool, tokens: &[Token]) {
        if reset {
            for handler in self.handlers.iter_mut().flatten() {
                handler.reset();
            }
        }
        for (ep, (handler, &token)) in self.handlers.iter_mut().zip(tokens).enumerate() {
            if token.is_empty() {
                continue;
            }
            match handler {
                Some(handler) => handler.handle(link, ep, token),
                None => {
                    trace!("EP{} NO HANDLER", ep);
                }
            }
        }
    }
}

impl<'h, 'a, H: Hardware> Dispatcher<'h, Driver<'a, H>> {
    /// Deliver the tokens captured by [`Device::on_interrupt()`]
    ///
    /// Returns `false` if nothing was pending.
    pub fn dispatch(&mut self, device: &Device<'a, H>) -> bool {
        device
            .take_pending(|driver, reset, tokens| self.deliver(driver, reset, tokens))
            .is_some()
    }
}

impl<L: ?Sized> Default for Dispatcher<'_, L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::vec::Vec;

    use super::Dispatcher;
    use crate::{
        buffer::Allocator,
        bus::Device,
        control::{Control, State},
        descriptor::{
            tests::{acm_configuration, DEVICE},
            Descriptors,
        },
        driver::Driver,
        hardware::{Banks, EndpointConfig, PacketSize},
        link::{DataLink, Handler, Token},
        request::ControlRequest,
        sim::Sim,
    };
    use usb_device::UsbDirection;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(usize, Token)>,
        resets: usize,
    }

    impl<L: ?Sized> Handler<L> for Recorder {
        fn handle(&mut self, _: &mut L, ep: usize, token: Token) {
            self.calls.push((ep, token));
        }
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    struct NullLink;

    #[test]
    fn deliver_once_per_endpoint() {
        let (mut a, mut b) = (Recorder::default(), Recorder::default());
        {
            let mut dispatcher = Dispatcher::<NullLink>::new();
            assert!(dispatcher.set_handler(0, &mut a));
            assert!(dispatcher.set_handler(2, &mut b));

            let mut tokens = [Token::empty(); 7];
            tokens[0] = Token::SETUP;
            tokens[2] = Token::IN | Token::NAK;
            tokens[4] = Token::OUT;
            dispatcher.deliver(&mut NullLink, true, &tokens);
            dispatcher.deliver(&mut NullLink, false, &[Token::IN]);
        }
        assert_eq!(a.calls, [(0, Token::SETUP), (0, Token::IN)]);
        assert_eq!(a.resets, 1);
        assert_eq!(b.calls, [(2, Token::IN | Token::NAK)]);
        assert_eq!(b.resets, 1);
    }

    #[test]
    fn clear_handler() {
        let mut a = Recorder::default();
        let mut dispatcher = Dispatcher::<NullLink>::new();
        assert!(dispatcher.clear_handler(1).is_none());
        dispatcher.set_handler(1, &mut a);
        assert!(dispatcher.clear_handler(1).is_some());
        dispatcher.deliver(&mut NullLink, false, &[Token::empty(), Token::OUT]);
        assert!(dispatcher.clear_handler(9).is_none());
    }

    /// Echoes OUT data back on an IN endpoint
    struct Loopback {
        rx: usize,
        tx: usize,
    }

    impl<L: DataLink + ?Sized> Handler<L> for Loopback {
        fn handle(&mut self, link: &mut L, _: usize, token: Token) {
            if token.contains(Token::OUT) {
                let mut buf = [0; 64];
                let len = link.read(self.rx, &mut buf);
                link.write(self.tx, &buf[..len]);
                if link.data_ready(self.rx) {
                    link.flush(self.tx);
                }
            }
        }
    }

    fn setup(device: &Device<'_, Sim>, request: ControlRequest) {
        device.with_driver_mut(|driver| driver.hardware_mut().host_setup(0, request.to_bytes()));
    }

    fn host_in(device: &Device<'_, Sim>, ep: usize) -> Option<Vec<u8>> {
        device.with_driver_mut(|driver| driver.hardware_mut().host_in(ep))
    }

    /// Interrupts and dispatches until the host has a whole response
    fn read<'a>(device: &Device<'a, Sim>, dispatcher: &mut Dispatcher<'_, Driver<'a, Sim>>) -> Vec<u8> {
        let mut received = Vec::new();
        for _ in 0..16 {
            device.on_interrupt();
            dispatcher.dispatch(device);
            while let Some(packet) = host_in(device, 0) {
                received.extend_from_slice(&packet);
            }
        }
        received
    }

    #[test]
    fn enumeration() {
        let (mut memory, mut buf) = ([0; 512], [0; 128]);
        let configuration = acm_configuration(&mut buf);
        let descriptors = Descriptors::new(&DEVICE, configuration).unwrap();

        let mut driver = Driver::new(Sim::new(), Allocator::new(&mut memory));
        driver
            .allocate_ep(0, EndpointConfig::control(PacketSize::Bytes64), 128)
            .unwrap();
        let bulk_in = EndpointConfig::bulk(UsbDirection::In, PacketSize::Bytes64, Banks::Double);
        let bulk_out = EndpointConfig::bulk(UsbDirection::Out, PacketSize::Bytes64, Banks::Double);
        driver.allocate_ep(2, bulk_in, 128).unwrap();
        driver.allocate_ep(3, bulk_out, 128).unwrap();
        let device = Device::new(driver);

        let mut control = Control::new(descriptors);
        let mut loopback = Loopback { rx: 3, tx: 2 };
        let mut dispatcher = Dispatcher::new();
        dispatcher.set_handler(0, &mut control);
        dispatcher.set_handler(3, &mut loopback);

        device.attach();
        assert!(!dispatcher.dispatch(&device));

        device.with_driver_mut(|driver| driver.hardware_mut().host_reset());
        device.on_interrupt();
        assert!(dispatcher.dispatch(&device));

        let get_descriptor = |kind: u8, length: u16| ControlRequest {
            request_type: 0x80,
            request: 6,
            value: u16::from(kind) << 8,
            index: 0,
            length,
        };
        let no_data = |request: u8, value: u16| ControlRequest {
            request_type: 0x00,
            request,
            value,
            index: 0,
            length: 0,
        };

        setup(&device, get_descriptor(1, 64));
        assert_eq!(read(&device, &mut dispatcher), DEVICE);

        setup(&device, no_data(5, 12));
        assert!(read(&device, &mut dispatcher).is_empty());
        assert_eq!(device.with_driver(|driver| driver.hardware().address()), Some(12));

        setup(&device, get_descriptor(2, 9));
        assert_eq!(read(&device, &mut dispatcher), &configuration[..9]);
        setup(&device, get_descriptor(2, 255));
        assert_eq!(read(&device, &mut dispatcher), configuration);

        setup(&device, no_data(9, 1));
        assert!(read(&device, &mut dispatcher).is_empty());

        // Class traffic on the data endpoints
        device.with_driver_mut(|driver| driver.hardware_mut().host_out(3, b"hello"));
        device.on_interrupt();
        assert!(dispatcher.dispatch(&device));
        device.on_interrupt();
        assert!(dispatcher.dispatch(&device));
        assert_eq!(host_in(&device, 2).unwrap(), b"hello");

        drop(dispatcher);
        assert_eq!(control.state(), State::Setup);
        assert_eq!(control.configuration(), 1);
    }
}
