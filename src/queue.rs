//! Fixed-capacity byte queue
//!
//! Every endpoint moves its data through a `ByteQueue`. The interrupt-time
//! engine fills it from OUT banks and drains it into IN banks, while the
//! foreground reads and writes the other end. The queue itself does no
//! synchronization; the driver serializes access.

/// A circular byte buffer over borrowed storage
///
/// Failed operations (push on a full queue, pop or peek on an empty
/// queue) leave the queue unchanged and latch a sticky failure flag.
/// Check it with [`failed()`](ByteQueue::failed), and clear it with
/// [`clear_failed()`](ByteQueue::clear_failed).
pub struct ByteQueue<'a> {
    buffer: &'a mut [u8],
    read: usize,
    size: usize,
    failed: bool,
}

impl<'a> ByteQueue<'a> {
    /// Create a queue that uses all of `buffer`
    pub fn new(buffer: &'a mut [u8]) -> Self {
        ByteQueue {
            buffer,
            read: 0,
            size: 0,
            failed: false,
        }
    }

    /// Zero the cursors without touching the contents
    ///
    /// After a reset, the next push lands at the start of storage, so
    /// the queue can be used as a linear scratch buffer.
    pub fn reset(&mut self) {
        self.read = 0;
        self.size = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    /// Free space, in bytes
    pub fn available(&self) -> usize {
        self.capacity() - self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Returns `true` if an operation failed since the flag was last cleared
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn clear_failed(&mut self) {
        self.failed = false;
    }

    /// Append a byte
    ///
    /// Returns the byte back if the queue is full.
    pub fn push(&mut self, byte: u8) -> Result<(), u8> {
        if self.is_full() {
            self.failed = true;
            return Err(byte);
        }
        let write = (self.read + self.size) % self.capacity();
        self.buffer[write] = byte;
        self.size += 1;
        Ok(())
    }

    /// Remove the oldest byte
    pub fn pop(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.read = (self.read + 1) % self.capacity();
        self.size -= 1;
        Some(byte)
    }

    /// Return the oldest byte without removing it
    pub fn peek(&mut self) -> Option<u8> {
        if self.is_empty() {
            self.failed = true;
            None
        } else {
            Some(self.buffer[self.read])
        }
    }

    /// Append as much of `bytes` as fits, returning the number accepted
    ///
    /// Never sets the failure flag; a short count is the signal.
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.available());
        for &byte in &bytes[..accepted] {
            let write = (self.read + self.size) % self.capacity();
            self.buffer[write] = byte;
            self.size += 1;
        }
        accepted
    }

    /// Move up to `buffer.len()` bytes out of the queue
    pub fn drain_into(&mut self, buffer: &mut [u8]) -> usize {
        let count = buffer.len().min(self.size);
        for dst in &mut buffer[..count] {
            *dst = self.buffer[self.read];
            self.read = (self.read + 1) % self.capacity();
            self.size -= 1;
        }
        count
    }

    /// The queued bytes, if they're contiguous in storage
    ///
    /// A queue that was [`reset()`](ByteQueue::reset) and only pushed to
    /// never wraps, so this is how a received SETUP packet is inspected
    /// in place.
    pub fn as_linear(&self) -> Option<&[u8]> {
        let end = self.read + self.size;
        (end <= self.capacity()).then(|| &self.buffer[self.read..end])
    }
}
