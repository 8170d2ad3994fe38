//! Endpoint memory buffers

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering},
};

/// Memory for endpoint queues
///
/// Allocate a `static` object and hand its allocator to the driver.
/// Every allocated endpoint carves its queue storage from this memory.
///
/// ```
/// use banked_usbd::EndpointMemory;
///
/// static EP_MEMORY: EndpointMemory<512> = EndpointMemory::new();
/// let allocator = EP_MEMORY.allocator().unwrap();
/// assert!(EP_MEMORY.allocator().is_none());
/// # drop(allocator);
/// ```
pub struct EndpointMemory<const SIZE: usize> {
    buffer: UnsafeCell<[u8; SIZE]>,
    taken: AtomicBool,
}

unsafe impl<const SIZE: usize> Sync for EndpointMemory<SIZE> {}

impl<const SIZE: usize> EndpointMemory<SIZE> {
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([0; SIZE]),
            taken: AtomicBool::new(false),
        }
    }

    /// Acquire the allocator for this memory
    ///
    /// Returns `None` if the allocator was already taken.
    pub fn allocator(&'static self) -> Option<Allocator<'static>> {
        if self.taken.swap(true, Ordering::SeqCst) {
            return None;
        }
        // Safety: the flag guarantees a single, static borrow of the buffer.
        let buffer = unsafe { &mut *self.buffer.get() };
        Some(Allocator::new(buffer))
    }
}

impl<const SIZE: usize> Default for EndpointMemory<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoint memory buffer allocator
///
/// Hands out disjoint slices from the back of its memory.
pub struct Allocator<'a> {
    remaining: &'a mut [u8],
}

impl<'a> Allocator<'a> {
    pub fn new(memory: &'a mut [u8]) -> Self {
        Allocator { remaining: memory }
    }

    /// Allocates a buffer of exactly `size` bytes
    pub fn allocate(&mut self, size: usize) -> Option<&'a mut [u8]> {
        let split = self.remaining.len().checked_sub(size)?;
        let remaining = core::mem::take(&mut self.remaining);
        let (rest, buffer) = remaining.split_at_mut(split);
        self.remaining = rest;
        Some(buffer)
    }

    /// Bytes left to allocate
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Represents an `Allocator` that does not allocate any memory
    pub fn empty() -> Self {
        Allocator {
            remaining: &mut [],
        }
    }
}

#[cfg(test)]
mod test {
    use super::Allocator;

    #[test]
    fn allocate_entire_buffer() {
        let mut buffer = [0; 32];
        let start = buffer.as_ptr();
        let mut alloc = Allocator::new(&mut buffer);
        let allocated = alloc.allocate(32).unwrap();
        assert_eq!(allocated.as_ptr(), start);
        assert_eq!(allocated.len(), 32);

        assert!(alloc.allocate(1).is_none());
    }

    #[test]
    fn allocate_partial_buffers() {
        let mut buffer = [0; 32];
        let start = buffer.as_ptr();
        let mut alloc = Allocator::new(&mut buffer);

        let first = alloc.allocate(7).unwrap();
        assert_eq!(first.as_ptr(), unsafe { start.add(32 - 7) });

        let second = alloc.allocate(7).unwrap();
        assert_eq!(second.as_ptr(), unsafe { start.add(32 - 14) });

        assert!(alloc.allocate(19).is_none());
        assert_eq!(alloc.remaining(), 18);

        // Disjoint and independently writable
        first.fill(1);
        second.fill(2);
        assert!(first.iter().all(|&b| b == 1));
    }

    #[test]
    fn empty_allocates_nothing() {
        let mut alloc = Allocator::empty();
        assert!(alloc.allocate(0).is_some());
        assert!(alloc.allocate(1).is_none());
    }
}
