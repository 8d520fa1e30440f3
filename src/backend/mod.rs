// SPDX-License-Identifier: Apache-2.0

//! Transfer backends moving converter samples into the ring buffer.

pub mod block;
pub mod polled;

pub use block::{BlockBackend, BlockController, BlockEvent, BlockGeometry, Half, NoBlock};
pub use polled::{PolledBackend, ReadyPin, ReadySignal};

/// Transfer mechanism, used to look up adapter rate limits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackendKind {
    /// One blocking read per trigger, after the ready signal asserts
    Polled,
    /// DMA block transfers into ping-pong halves
    Block,
}

/// Outcome of a single polled read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Produced {
    /// `bytes_per_sample` bytes were written to the destination
    Sample,
    /// The read was a read-ahead slot and nothing was written
    Discarded,
}

/// The backend armed for the current capture.
pub enum TransferBackend {
    /// Ready-flag polling
    Polled(PolledBackend),
    /// Ping-pong DMA
    Block(BlockBackend),
}

impl TransferBackend {
    /// Mechanism of this backend
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Polled(_) => BackendKind::Polled,
            Self::Block(_) => BackendKind::Block,
        }
    }
}
