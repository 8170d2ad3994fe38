//! Per-endpoint state

use core::sync::atomic::{AtomicU8, Ordering};

use crate::{hardware::EndpointConfig, queue::ByteQueue};

bitflags::bitflags! {
    /// Endpoint status bits shared between interrupt and foreground code
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// A flush is outstanding
        const FLUSH = 1 << 0;
        /// An IN transfer is in progress
        const DIR_IN = 1 << 1;
        /// An OUT transfer is in progress
        const DIR_OUT = 1 << 2;
        /// The most recent OUT packet was short
        const DATA_READY = 1 << 3;
        /// OUT interrupts were disabled because the queue filled
        const THROTTLED = 1 << 4;
    }
}

/// An atomic [`Flags`] byte
///
/// Every update is a single read-modify-write, so the byte may be read
/// without a critical section.
#[derive(Default)]
pub struct AtomicFlags(AtomicU8);

impl AtomicFlags {
    pub const fn new() -> Self {
        AtomicFlags(AtomicU8::new(0))
    }

    pub fn load(&self) -> Flags {
        Flags::from_bits_truncate(self.0.load(Ordering::SeqCst))
    }

    pub fn contains(&self, flags: Flags) -> bool {
        self.load().contains(flags)
    }

    pub fn insert(&self, flags: Flags) {
        self.0.fetch_or(flags.bits(), Ordering::SeqCst);
    }

    pub fn remove(&self, flags: Flags) {
        self.0.fetch_and(!flags.bits(), Ordering::SeqCst);
    }

    pub fn set(&self, flags: Flags, value: bool) {
        if value {
            self.insert(flags);
        } else {
            self.remove(flags);
        }
    }

    /// Set `flags`, returning `true` if they were all set before
    pub fn test_and_set(&self, flags: Flags) -> bool {
        let prev = self.0.fetch_or(flags.bits(), Ordering::SeqCst);
        Flags::from_bits_truncate(prev).contains(flags)
    }

    /// Clear `flags`, returning `true` if they were all set before
    pub fn test_and_clear(&self, flags: Flags) -> bool {
        let prev = self.0.fetch_and(!flags.bits(), Ordering::SeqCst);
        Flags::from_bits_truncate(prev).contains(flags)
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// An active endpoint
///
/// Binds the endpoint's queue, its hardware layout, and its status flags.
pub struct EndpointContext<'a> {
    number: usize,
    config: EndpointConfig,
    queue: ByteQueue<'a>,
    flags: AtomicFlags,
    /// Bytes taken from the current OUT bank so far
    rx_packet: usize,
}

impl<'a> EndpointContext<'a> {
    pub fn new(number: usize, config: EndpointConfig, queue: ByteQueue<'a>) -> Self {
        EndpointContext {
            number,
            config,
            queue,
            flags: AtomicFlags::new(),
            rx_packet: 0,
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn is_control(&self) -> bool {
        self.config.is_control()
    }

    /// Maximum packet size, in bytes
    pub fn max_packet_len(&self) -> usize {
        self.config.size.len()
    }

    pub fn queue(&self) -> &ByteQueue<'a> {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ByteQueue<'a> {
        &mut self.queue
    }

    /// Swap in a different queue, returning the old one
    pub fn replace_queue(&mut self, queue: ByteQueue<'a>) -> ByteQueue<'a> {
        core::mem::replace(&mut self.queue, queue)
    }

    pub fn flags(&self) -> &AtomicFlags {
        &self.flags
    }

    /// Count a byte taken from the current OUT bank
    pub(crate) fn count_rx(&mut self) {
        self.rx_packet += 1;
    }

    /// The current OUT bank is exhausted; record whether it was short
    pub(crate) fn finish_rx_packet(&mut self) {
        let short = self.rx_packet < self.max_packet_len();
        self.flags.set(Flags::DATA_READY, short);
        self.rx_packet = 0;
    }

    /// Forget everything about the current transfer
    pub fn reset(&mut self) {
        self.queue.reset();
        self.queue.clear_failed();
        self.flags.clear();
        self.rx_packet = 0;
    }
}

#[cfg(test)]
mod test {
    use super::{AtomicFlags, EndpointContext, Flags};
    use crate::{
        hardware::{EndpointConfig, PacketSize},
        queue::ByteQueue,
    };

    #[test]
    fn test_and_set() {
        let flags = AtomicFlags::new();
        assert!(!flags.test_and_set(Flags::FLUSH));
        assert!(flags.test_and_set(Flags::FLUSH));
        assert!(flags.contains(Flags::FLUSH));

        flags.insert(Flags::DIR_IN);
        assert!(!flags.test_and_set(Flags::DIR_IN | Flags::DIR_OUT));
        assert_eq!(flags.load(), Flags::FLUSH | Flags::DIR_IN | Flags::DIR_OUT);
    }

    #[test]
    fn test_and_clear() {
        let flags = AtomicFlags::new();
        assert!(!flags.test_and_clear(Flags::THROTTLED));
        flags.insert(Flags::THROTTLED | Flags::FLUSH);
        assert!(flags.test_and_clear(Flags::THROTTLED));
        assert!(!flags.contains(Flags::THROTTLED));
        assert!(flags.contains(Flags::FLUSH));
    }

    #[test]
    fn short_packets_mark_data_ready() {
        let mut storage = [0; 16];
        let mut ep = EndpointContext::new(
            0,
            EndpointConfig::control(PacketSize::Bytes8),
            ByteQueue::new(&mut storage),
        );

        for _ in 0..8 {
            ep.count_rx();
        }
        ep.finish_rx_packet();
        assert!(!ep.flags().contains(Flags::DATA_READY));

        ep.count_rx();
        ep.finish_rx_packet();
        assert!(ep.flags().contains(Flags::DATA_READY));

        // Zero-length packets are short, too
        ep.finish_rx_packet();
        assert!(ep.flags().contains(Flags::DATA_READY));

        ep.reset();
        assert!(ep.flags().load().is_empty());
    }
}
