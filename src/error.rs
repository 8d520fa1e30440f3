// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy returned to the Control Port.

use thiserror::Error;

/// Opaque failure reported by a [`DeviceAdapter`](crate::adapter::DeviceAdapter) or by board
/// hardware (bus controller, trigger timer).
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError {
    /// Bus transfer failed (SPI/I2C error, DMA transfer error)
    #[error("bus transfer failed")]
    Bus,
    /// Device response failed its CRC check
    #[error("CRC mismatch in device response")]
    Crc,
    /// Device did not acknowledge the command
    #[error("device did not acknowledge")]
    Nack,
    /// Requested setting is not supported by this device or peripheral
    #[error("setting not supported by device")]
    Unsupported,
}

/// Errors surfaced by the capture engine. None of these are retried internally.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Empty or out-of-range channel mask, misaligned byte count, zero rate
    #[error("invalid argument")]
    InvalidArgument,
    /// Trigger period shorter than the minimum inter-sample time
    #[error("trigger period below minimum conversion time")]
    InvalidPeriod,
    /// Lifecycle operation called from a state that does not allow it
    #[error("operation not valid in current capture state")]
    InvalidState,
    /// Another capture is already configured or running
    #[error("capture already active")]
    Busy,
    /// Ready wait or drain wait exhausted its iteration budget
    #[error("wait budget exhausted")]
    Timeout,
    /// Ring buffer has no room for the write, or a transfer does not fit its alignment
    #[error("ring buffer would overflow")]
    WouldOverflow,
    /// Failure reported by the device or bus
    #[error("device I/O failed: {0}")]
    DeviceIo(#[from] DeviceError),
}
