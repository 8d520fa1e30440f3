// SPDX-License-Identifier: Apache-2.0

//! Block backend: DMA fills two equal halves of a transfer window in turn, and each finished
//! half is copied into the ring buffer while the other half fills.

use crate::{
    buffer::RingBuffer,
    error::{DeviceError, Error},
};

/// One of the two halves of the transfer window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Half {
    /// Lower half, signalled by [`BlockEvent::HalfComplete`]
    First,
    /// Upper half, signalled by [`BlockEvent::Complete`]
    Second,
}

impl Half {
    /// The opposite half
    pub fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

/// Notification from the bus controller's completion interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockEvent {
    /// The first half has been filled
    HalfComplete,
    /// The second half has been filled
    Complete,
    /// The controller reported a transfer error
    TransferError,
}

/// Bus controller able to receive converter data into a two-half window under DMA.
///
/// At most one half is being filled at a time. A half passed to [`rearm`](Self::rearm) is
/// queued behind the half currently in flight.
pub trait BlockController {
    /// Bytes available for both halves together
    fn window_len(&self) -> usize;

    /// Put the bus in streaming receive mode with halves of `half_len` bytes and begin filling
    /// [`Half::First`].
    fn start(&mut self, half_len: usize) -> Result<(), DeviceError>;

    /// Contents of `half`. Only meaningful once its completion event has been delivered.
    fn half(&self, half: Half) -> &[u8];

    /// Queue `half` to be filled after the half in flight.
    fn rearm(&mut self, half: Half) -> Result<(), DeviceError>;

    /// Stop any transfer in flight. Does nothing when idle.
    fn abort(&mut self);

    /// Return the bus to non-streaming mode.
    fn release(&mut self) -> Result<(), DeviceError>;
}

/// Placeholder controller for boards without a DMA path. Any attempt to start fails with
/// [`DeviceError::Unsupported`].
#[derive(Debug, Default)]
pub struct NoBlock;

impl BlockController for NoBlock {
    fn window_len(&self) -> usize {
        0
    }

    fn start(&mut self, _half_len: usize) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn half(&self, _half: Half) -> &[u8] {
        &[]
    }

    fn rearm(&mut self, _half: Half) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }

    fn abort(&mut self) {}

    fn release(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Sizes of one block transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockGeometry {
    /// Bytes transferred per half, read-ahead slot included
    pub half_len: usize,
    /// Read-ahead bytes at the front of every half, never committed
    pub slot: usize,
    /// Committed bytes per full half, a whole number of scans
    pub payload: usize,
    /// Halves needed for a windowed capture, `None` when continuous
    pub cycles: Option<u32>,
    /// Windowed capture size, `None` when continuous
    pub total: Option<usize>,
}

impl BlockGeometry {
    /// Plan halves for a controller window of `window_len` bytes.
    ///
    /// `total` is the windowed capture size, or `None` for a continuous capture. Fails with
    /// [`Error::WouldOverflow`] if `total` is not a multiple of `bytes_per_scan`, or if not even
    /// one scan fits in a half after the read-ahead slot.
    pub fn plan(
        window_len: usize,
        bytes_per_scan: usize,
        slot: usize,
        total: Option<usize>,
    ) -> Result<Self, Error> {
        if bytes_per_scan == 0 {
            return Err(Error::InvalidArgument);
        }
        if total.is_some_and(|total| total % bytes_per_scan != 0) {
            return Err(Error::WouldOverflow);
        }
        let mut payload = (window_len / 2).saturating_sub(slot) / bytes_per_scan * bytes_per_scan;
        if payload == 0 {
            return Err(Error::WouldOverflow);
        }
        let cycles = match total {
            None => None,
            Some(0) => return Err(Error::InvalidArgument),
            Some(total) => {
                payload = payload.min(total);
                Some(u32::try_from(total.div_ceil(payload)).map_err(|_| Error::WouldOverflow)?)
            }
        };
        Ok(Self {
            half_len: slot + payload,
            slot,
            payload,
            cycles,
            total,
        })
    }
}

/// Progress of a block capture after an event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockProgress {
    /// More halves are expected
    Pending,
    /// The windowed capture is complete and the controller has been stopped
    Done,
}

/// Ping-pong state of an armed block capture.
#[derive(Debug)]
pub struct BlockBackend {
    /// Transfer sizes
    geometry: BlockGeometry,
    /// Half whose completion is expected next
    active_half: Half,
    /// Halves still to complete, `None` when continuous
    cycles_remaining: Option<u32>,
    /// Windowed bytes not yet committed
    remaining: usize,
    /// Completion has been reported
    done: bool,
}

impl BlockBackend {
    /// Start `controller` with `geometry`. Both halves are queued when more than one is needed.
    pub fn arm<C: BlockController + ?Sized>(
        controller: &mut C,
        geometry: BlockGeometry,
    ) -> Result<Self, Error> {
        controller.start(geometry.half_len)?;
        if geometry.cycles.map_or(true, |cycles| cycles > 1) {
            if let Err(err) = controller.rearm(Half::Second) {
                controller.abort();
                return Err(err.into());
            }
        }
        debug!(
            "block transfer armed: half {} bytes, payload {}, slot {}",
            geometry.half_len, geometry.payload, geometry.slot
        );
        Ok(Self {
            geometry,
            active_half: Half::First,
            cycles_remaining: geometry.cycles,
            remaining: geometry.total.unwrap_or(0),
            done: false,
        })
    }

    /// Transfer sizes
    pub fn geometry(&self) -> BlockGeometry {
        self.geometry
    }

    /// Half whose completion is expected next
    pub fn active_half(&self) -> Half {
        self.active_half
    }

    /// Halves still to complete, `None` when continuous
    pub fn cycles_remaining(&self) -> Option<u32> {
        self.cycles_remaining
    }

    /// Windowed capture finished
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Handle one controller event, committing the finished half to `ring`.
    ///
    /// A transfer error aborts the controller and reports [`DeviceError::Bus`]. An event for
    /// the wrong half means a half was overwritten before it was copied; it aborts the
    /// controller and reports [`Error::WouldOverflow`]. A half shorter than the geometry is
    /// treated as a transfer error. Events after completion are ignored.
    pub fn on_event<C: BlockController + ?Sized>(
        &mut self,
        controller: &mut C,
        ring: &mut RingBuffer<'_>,
        event: BlockEvent,
    ) -> Result<BlockProgress, Error> {
        if self.done {
            return Ok(BlockProgress::Done);
        }
        let finished = match event {
            BlockEvent::TransferError => {
                controller.abort();
                return Err(DeviceError::Bus.into());
            }
            BlockEvent::HalfComplete => Half::First,
            BlockEvent::Complete => Half::Second,
        };
        if finished != self.active_half {
            warn!(
                "block overrun: {:?} finished while waiting for {:?}",
                finished, self.active_half
            );
            controller.abort();
            return Err(Error::WouldOverflow);
        }

        let commit_len = match self.cycles_remaining {
            Some(_) => self.geometry.payload.min(self.remaining),
            None => self.geometry.payload,
        };
        let slot = self.geometry.slot;
        if controller.half(finished).len() < slot + commit_len {
            warn!("block half shorter than {} bytes", slot + commit_len);
            controller.abort();
            return Err(DeviceError::Bus.into());
        }
        match ring.prepare(commit_len) {
            Ok(window) => {
                window.copy_from_slice(&controller.half(finished)[slot..slot + commit_len])
            }
            Err(err) => {
                controller.abort();
                return Err(err);
            }
        }
        ring.commit(commit_len)?;
        if slot > 0 {
            trace!("read-ahead slot discarded from {:?}", finished);
        }
        self.active_half = finished.other();

        match self.cycles_remaining.as_mut() {
            None => {
                controller.rearm(finished)?;
                Ok(BlockProgress::Pending)
            }
            Some(cycles) => {
                *cycles -= 1;
                self.remaining -= commit_len;
                if *cycles == 0 {
                    controller.abort();
                    self.done = true;
                    debug!("block transfer complete");
                    return Ok(BlockProgress::Done);
                }
                // The other half is already queued, so only requeue this one if it is needed
                if *cycles > 1 {
                    controller.rearm(finished)?;
                }
                Ok(BlockProgress::Pending)
            }
        }
    }

    /// Stop the controller. Safe to call more than once.
    pub fn disarm<C: BlockController + ?Sized>(&mut self, controller: &mut C) {
        controller.abort();
        self.done = true;
    }
}
