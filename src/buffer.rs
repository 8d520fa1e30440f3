// SPDX-License-Identifier: Apache-2.0

//! Capture ring buffer and sample bookkeeping.

use crate::error::Error;

/// Monotonic counter of samples committed to the ring buffer.
#[derive(Default, Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone)]
pub struct SampleCounter(u32);

impl SampleCounter {
    /// Get current counter value
    pub fn get_counter(&self) -> u32 {
        self.0
    }

    /// Add `samples` to the counter. Saturates at [`u32::MAX`] and logs an error once.
    pub fn add(&mut self, samples: u32) {
        match self.0.checked_add(samples) {
            None => {
                if self.0 != u32::MAX {
                    error!("Sample counter overflow, holding at u32::MAX");
                }
                self.0 = u32::MAX;
            }
            Some(new_counter) => self.0 = new_counter,
        }
    }

    /// Restart counting from zero
    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Fixed-capacity byte FIFO between a transfer backend (producer) and the Control Port
/// (consumer).
///
/// The producer reserves a contiguous window with [`prepare`](Self::prepare), fills it, then
/// publishes it with [`commit`](Self::commit). Nothing is visible to [`drain`](Self::drain) until
/// committed. Writes never wrap: producers write in units that divide
/// [`capacity`](Self::capacity), which the session guarantees by aligning the capacity.
pub struct RingBuffer<'b> {
    /// Backing storage. Only the first `capacity` bytes are used.
    storage: &'b mut [u8],
    /// Usable length of `storage`
    capacity: usize,
    /// Next byte the producer writes
    write_cursor: usize,
    /// Next byte the consumer reads
    read_cursor: usize,
    /// Bytes committed and not yet drained
    committed_len: usize,
    /// Bytes reserved by the last `prepare`
    prepared_len: usize,
}

impl<'b> RingBuffer<'b> {
    /// Use all of `storage` as the buffer.
    pub fn new(storage: &'b mut [u8]) -> Self {
        let capacity = storage.len();
        Self {
            storage,
            capacity,
            write_cursor: 0,
            read_cursor: 0,
            committed_len: 0,
            prepared_len: 0,
        }
    }

    /// Length of the backing storage
    pub fn storage_len(&self) -> usize {
        self.storage.len()
    }

    /// Usable capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes committed and not yet drained
    pub fn committed_len(&self) -> usize {
        self.committed_len
    }

    /// Bytes that can still be prepared
    pub fn free_len(&self) -> usize {
        self.capacity - self.committed_len
    }

    /// Trim the capacity to the largest multiple of `unit` that fits the storage, and reset the
    /// cursors. Returns the new capacity.
    ///
    /// Fails with [`Error::InvalidArgument`] if `unit` is zero or larger than the storage.
    pub fn align_to(&mut self, unit: usize) -> Result<usize, Error> {
        if unit == 0 || unit > self.storage.len() {
            return Err(Error::InvalidArgument);
        }
        self.capacity = self.storage.len() / unit * unit;
        self.reset();
        Ok(self.capacity)
    }

    /// Drop all data and return the cursors to the start of the buffer.
    pub fn reset(&mut self) {
        self.write_cursor = 0;
        self.read_cursor = 0;
        self.committed_len = 0;
        self.prepared_len = 0;
    }

    /// Reserve the next `n` bytes for writing.
    ///
    /// Fails with [`Error::WouldOverflow`] if fewer than `n` bytes are free, and with
    /// [`Error::InvalidArgument`] if the window would cross the end of the buffer. Nothing is
    /// written or reserved on failure.
    pub fn prepare(&mut self, n: usize) -> Result<&mut [u8], Error> {
        if n > self.free_len() {
            return Err(Error::WouldOverflow);
        }
        if n > self.capacity - self.write_cursor {
            return Err(Error::InvalidArgument);
        }
        self.prepared_len = n;
        Ok(&mut self.storage[self.write_cursor..self.write_cursor + n])
    }

    /// Publish the first `n` bytes of the last prepared window.
    pub fn commit(&mut self, n: usize) -> Result<(), Error> {
        if n > self.prepared_len {
            return Err(Error::InvalidArgument);
        }
        self.prepared_len = 0;
        if n == 0 {
            return Ok(());
        }
        self.write_cursor = (self.write_cursor + n) % self.capacity;
        self.committed_len += n;
        Ok(())
    }

    /// Copy committed bytes into `dst` in FIFO order and release them. Returns the number of
    /// bytes copied.
    pub fn drain(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.committed_len);
        if n == 0 {
            return 0;
        }
        let first = n.min(self.capacity - self.read_cursor);
        dst[..first].copy_from_slice(&self.storage[self.read_cursor..self.read_cursor + first]);
        dst[first..n].copy_from_slice(&self.storage[..n - first]);
        self.read_cursor = (self.read_cursor + n) % self.capacity;
        self.committed_len -= n;
        n
    }
}
