//! Interrupt-safe access to the driver

use core::{
    cell::RefCell,
    sync::atomic::{AtomicBool, Ordering},
};
use critical_section::Mutex;

use crate::{
    driver::Driver,
    hardware::{Hardware, Interrupts},
    link::{DataLink, Token},
    MAX_ENDPOINTS,
};

struct Inner<'a, H> {
    driver: Driver<'a, H>,
    /// Tokens captured since the last dispatch
    pending: [Token; MAX_ENDPOINTS],
    reset: bool,
}

/// A driver shared between the USB interrupt and the foreground
///
/// Call [`on_interrupt()`](Device::on_interrupt) from the USB interrupt
/// handler. It services the hardware, captures the tokens, and signals the
/// foreground. A [`Dispatcher`](crate::Dispatcher) later hands the tokens
/// to the endpoint handlers.
///
/// `Device` is meant to live in a `static`, so every method takes `&self`.
pub struct Device<'a, H> {
    inner: Mutex<RefCell<Inner<'a, H>>>,
    signal: AtomicBool,
}

impl<'a, H: Hardware> Device<'a, H> {
    /// Wrap a driver
    ///
    /// Allocate all endpoints before wrapping the driver, or use
    /// [`with_driver_mut()`](Device::with_driver_mut).
    pub fn new(driver: Driver<'a, H>) -> Self {
        Device {
            inner: Mutex::new(RefCell::new(Inner {
                driver,
                pending: [Token::empty(); MAX_ENDPOINTS],
                reset: false,
            })),
            signal: AtomicBool::new(false),
        }
    }

    fn with_inner<R>(&self, func: impl FnOnce(&mut Inner<'a, H>) -> R) -> R {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            func(&mut inner)
        })
    }

    /// Interrupt-safe, immutable access to the driver
    pub fn with_driver<R>(&self, func: impl FnOnce(&Driver<'a, H>) -> R) -> R {
        self.with_inner(|inner| func(&inner.driver))
    }

    /// Interrupt-safe, mutable access to the driver
    pub fn with_driver_mut<R>(&self, func: impl FnOnce(&mut Driver<'a, H>) -> R) -> R {
        self.with_inner(|inner| func(&mut inner.driver))
    }

    pub fn attach(&self) {
        self.with_driver_mut(|driver| driver.attach());
    }

    pub fn detach(&self) {
        self.with_driver_mut(|driver| driver.detach());
    }

    /// Service the USB interrupt
    ///
    /// Tokens accumulate until the next dispatch. A bus reset discards any
    /// tokens that were still waiting.
    pub fn on_interrupt(&self) {
        self.with_inner(|inner| {
            let activity = inner.driver.poll();
            if activity.reset {
                inner.reset = true;
                inner.pending = [Token::empty(); MAX_ENDPOINTS];
            }
            for (pending, token) in inner.pending.iter_mut().zip(activity.tokens) {
                *pending |= token;
            }
            if !activity.is_empty() {
                self.signal.store(true, Ordering::Relaxed);
            }
        })
    }

    /// Returns `true` if there are tokens waiting for a dispatch
    pub fn is_pending(&self) -> bool {
        self.signal.load(Ordering::Relaxed)
    }

    /// Take the captured batch and act on it, inside one critical section
    ///
    /// Returns `None` if nothing was captured. New tokens can't be captured
    /// until `func` returns.
    pub(crate) fn take_pending<R>(
        &self,
        func: impl FnOnce(&mut Driver<'a, H>, bool, &[Token; MAX_ENDPOINTS]) -> R,
    ) -> Option<R> {
        self.with_inner(|inner| {
            if !self.signal.load(Ordering::Relaxed) {
                return None;
            }
            self.signal.store(false, Ordering::Relaxed);
            let reset = core::mem::take(&mut inner.reset);
            let tokens = core::mem::replace(&mut inner.pending, [Token::empty(); MAX_ENDPOINTS]);
            Some(func(&mut inner.driver, reset, &tokens))
        })
    }

    /// See [`DataLink::write`]
    pub fn write(&self, ep: usize, buf: &[u8]) -> usize {
        self.with_driver_mut(|driver| driver.write(ep, buf))
    }

    /// See [`DataLink::read`]
    pub fn read(&self, ep: usize, buf: &mut [u8]) -> usize {
        self.with_driver_mut(|driver| driver.read(ep, buf))
    }

    pub fn flush(&self, ep: usize) {
        self.with_driver_mut(|driver| driver.flush(ep));
    }

    pub fn flush_complete(&self, ep: usize) -> bool {
        self.with_driver(|driver| driver.flush_complete(ep))
    }

    pub fn data_ready(&self, ep: usize) -> bool {
        self.with_driver(|driver| driver.data_ready(ep))
    }

    pub fn set_stall(&self, ep: usize, stall: bool) {
        self.with_driver_mut(|driver| driver.set_stall(ep, stall));
    }

    pub fn set_interrupts(&self, ep: usize, interrupts: Interrupts) {
        self.with_driver_mut(|driver| driver.set_interrupts(ep, interrupts));
    }

    pub fn set_address(&self, address: u8) {
        self.with_driver_mut(|driver| driver.set_address(address));
    }
}
