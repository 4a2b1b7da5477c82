//! Memory-mapped capture buffers shared with the driver.
//!
//! Each slot moves through `Idle -> Enqueued -> Filled -> Enqueued ...`.
//! The pool refuses to enqueue a slot the driver already owns and only hands
//! out slot memory while the slot is filled.

use std::io;

use tracing::{debug, error, warn};

use crate::error::PoolError;
use crate::traits::{BufferInfo, CaptureDevice, DequeuedBuffer};

/// Ownership state of one queue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Mapped, owned by the application, holds no unread frame.
    Idle,
    /// Owned by the driver.
    Enqueued,
    /// Handed back by the driver with a frame in it.
    Filled,
}

/// Outcome of a dequeue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dequeued {
    /// A slot was filled.
    Filled(DequeuedBuffer),
    /// Nothing was ready yet; try again.
    Retry,
}

#[derive(Debug)]
struct Slot<M> {
    mapping: M,
    info: BufferInfo,
    state: SlotState,
}

/// Fixed set of mapped capture buffers.
#[derive(Debug)]
pub struct BufferPool<M> {
    slots: Vec<Slot<M>>,
}

impl<M: AsRef<[u8]>> BufferPool<M> {
    /// Request `count` buffers from the driver and map each of them.
    ///
    /// On failure every buffer mapped so far is unmapped again before the
    /// error is returned.
    pub fn allocate<D>(device: &mut D, count: u32) -> Result<Self, PoolError>
    where
        D: CaptureDevice<Mapping = M>,
    {
        let granted = device
            .request_buffers(count)
            .map_err(|source| PoolError::BufferRequestFailed {
                requested: count,
                source,
            })?;
        if granted != count {
            return Err(PoolError::BufferCountMismatch {
                requested: count,
                granted,
            });
        }

        let mut pool = Self {
            slots: Vec::with_capacity(count as usize),
        };
        for index in 0..count {
            if let Err(err) = pool.map_slot(device, index) {
                if let Err(teardown) = pool.release(device) {
                    warn!(error = %teardown, "cannot release partially allocated buffers");
                }
                return Err(err);
            }
        }
        debug!(count, "capture buffers mapped");
        Ok(pool)
    }

    fn map_slot<D>(&mut self, device: &mut D, index: u32) -> Result<(), PoolError>
    where
        D: CaptureDevice<Mapping = M>,
    {
        let info = device
            .query_buffer(index)
            .map_err(|source| PoolError::BufferQueryFailed { index, source })?;
        let mapping = device
            .map_buffer(&info)
            .map_err(|source| PoolError::MappingFailed { index, source })?;
        debug!(index, length = info.length, offset = info.offset, "mapped capture buffer");

        // Counted only once the mapping exists.
        self.slots.push(Slot {
            mapping,
            info,
            state: SlotState::Idle,
        });
        Ok(())
    }

    /// Number of mapped slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is mapped.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// State of the slot at `index`.
    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    /// Hand slot `index` to the driver.
    pub fn enqueue<D>(&mut self, device: &mut D, index: usize) -> Result<(), PoolError>
    where
        D: CaptureDevice<Mapping = M>,
    {
        let count = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PoolError::IndexOutOfRange { index, count })?;
        if slot.state == SlotState::Enqueued {
            return Err(PoolError::SlotBusy(index));
        }

        device
            .queue_buffer(slot.info.index)
            .map_err(|source| PoolError::EnqueueFailed { index, source })?;
        slot.state = SlotState::Enqueued;
        Ok(())
    }

    /// Take back a filled slot from the driver.
    pub fn dequeue<D>(&mut self, device: &mut D) -> Result<Dequeued, PoolError>
    where
        D: CaptureDevice<Mapping = M>,
    {
        let buffer = match device.dequeue_buffer() {
            Ok(buffer) => buffer,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(Dequeued::Retry);
            }
            Err(err) => return Err(PoolError::DequeueFailed(err)),
        };

        let index = buffer.index as usize;
        let count = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(PoolError::IndexOutOfRange { index, count })?;
        if slot.state != SlotState::Enqueued {
            warn!(index, state = ?slot.state, "driver returned a buffer that was not enqueued");
        }
        slot.state = SlotState::Filled;
        Ok(Dequeued::Filled(buffer))
    }

    /// Memory of a filled slot. `None` unless the slot is filled.
    pub fn data(&self, index: usize) -> Option<&[u8]> {
        self.slots
            .get(index)
            .filter(|slot| slot.state == SlotState::Filled)
            .map(|slot| slot.mapping.as_ref())
    }

    /// Mark every slot idle. The driver returns all buffers on
    /// `VIDIOC_STREAMOFF`.
    pub fn reclaim(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Idle;
        }
    }

    /// Unmap every slot in reverse allocation order.
    ///
    /// All slots are unmapped even if one fails; the first failure is
    /// returned.
    pub fn release<D>(mut self, device: &mut D) -> Result<(), PoolError>
    where
        D: CaptureDevice<Mapping = M>,
    {
        let mut first = None;
        while let Some(slot) = self.slots.pop() {
            let index = self.slots.len();
            if let Err(source) = device.unmap_buffer(slot.mapping) {
                error!(index, error = %source, "cannot unmap capture buffer");
                if first.is_none() {
                    first = Some(PoolError::UnmapFailed { index, source });
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}
