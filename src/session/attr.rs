// SPDX-License-Identifier: Apache-2.0

//! Device attributes exposed to the Control Port.
//!
//! Attributes that bound the sampling rate are validated together: changing the operating
//! mode, filter length or burst rate updates the minimum trigger period and re-clamps the
//! rate, so a read of [`Attribute::SamplingRate`] always reports what the trigger produces.

use fugit::HertzU32;

use super::{Board, CaptureSession, State};
use crate::{
    adapter::{Averaging, DeviceAdapter},
    backend::BackendKind,
    error::{DeviceError, Error},
    trigger::closest_supported,
};

/// Named settings reachable through the attribute interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attribute {
    /// Trigger rate in Hz
    SamplingRate,
    /// Adapter operating mode index
    OperatingMode,
    /// Averaging filter length
    FilterLength,
    /// Averaging burst rate in Hz
    BurstRate,
}

impl<A: DeviceAdapter, B: Board> CaptureSession<'_, A, B> {
    /// Current value of `attr`.
    ///
    /// The sampling rate is the clamped rate actually produced by the trigger. Averaging
    /// attributes fail with [`DeviceError::Unsupported`] when the adapter is not averaging.
    pub fn read_attr(&self, attr: Attribute) -> Result<u32, Error> {
        match attr {
            Attribute::SamplingRate => match self.clock.rate().raw() {
                0 => Ok(self.requested_rate.raw().min(self.max_rate()?.raw())),
                rate => Ok(rate),
            },
            Attribute::OperatingMode => Ok(self.adapter.operating_mode()),
            Attribute::FilterLength => Ok(self.current_averaging()?.filter_length),
            Attribute::BurstRate => Ok(self.current_averaging()?.burst_rate),
        }
    }

    /// Write `value` to `attr` and return the value that took effect.
    ///
    /// Fails with [`Error::Busy`] while a capture is streaming or draining, and with
    /// [`Error::InvalidArgument`] for a zero rate or when no averaging setting fits under the
    /// sampling period ceiling. A rate or mode that cannot be applied leaves the previous
    /// setting in place.
    pub fn write_attr(&mut self, attr: Attribute, value: u32) -> Result<u32, Error> {
        if matches!(self.state, State::Streaming | State::Draining) {
            return Err(Error::Busy);
        }
        match attr {
            Attribute::SamplingRate => {
                if value == 0 {
                    return Err(Error::InvalidArgument);
                }
                let (previous, kind) = (self.requested_rate, self.kind);
                self.requested_rate = HertzU32::from_raw(value);
                match self.retime() {
                    Ok(actual) => Ok(actual.raw()),
                    Err(err) => {
                        self.requested_rate = previous;
                        self.restore(kind);
                        Err(err)
                    }
                }
            }
            Attribute::OperatingMode => {
                let (previous, kind) = (self.adapter.operating_mode(), self.kind);
                self.adapter.set_operating_mode(value)?;
                match self.retime() {
                    Ok(_) => Ok(value),
                    Err(err) => {
                        if let Err(restore_err) = self.adapter.set_operating_mode(previous) {
                            warn!("operating mode {} not restored: {}", previous, restore_err);
                        }
                        self.restore(kind);
                        Err(err)
                    }
                }
            }
            Attribute::FilterLength => {
                let current = self.current_averaging()?;
                let chosen = self.closest_averaging(self.adapter.filter_lengths(), value, |len| {
                    Averaging {
                        filter_length: len,
                        ..current
                    }
                })?;
                self.apply_averaging(Averaging {
                    filter_length: chosen,
                    ..current
                })?;
                Ok(chosen)
            }
            Attribute::BurstRate => {
                let current = self.current_averaging()?;
                let chosen = self.closest_averaging(self.adapter.burst_rates(), value, |rate| {
                    Averaging {
                        burst_rate: rate,
                        ..current
                    }
                })?;
                self.apply_averaging(Averaging {
                    burst_rate: chosen,
                    ..current
                })?;
                Ok(chosen)
            }
        }
    }

    /// Averaging setting in effect
    fn current_averaging(&self) -> Result<Averaging, Error> {
        self.adapter
            .averaging()
            .ok_or(Error::DeviceIo(DeviceError::Unsupported))
    }

    /// Closest entry of `options` to `target` whose sampling period stays under the ceiling.
    fn closest_averaging<F>(&self, options: &[u32], target: u32, setting: F) -> Result<u32, Error>
    where
        F: Fn(u32) -> Averaging,
    {
        if options.is_empty() {
            return Err(DeviceError::Unsupported.into());
        }
        closest_supported(options, target, self.config.max_sampling_period, |option| {
            self.settle_time(Some(setting(option)))
        })
        .ok_or(Error::InvalidArgument)
    }

    /// Apply a new averaging setting and re-clamp the rate to it.
    fn apply_averaging(&mut self, averaging: Averaging) -> Result<(), Error> {
        self.adapter.set_averaging(averaging)?;
        self.refresh_timing();
        self.apply_rate()?;
        Ok(())
    }

    /// Re-run backend selection after a rate or mode change, while armed.
    fn reselect(&mut self) -> Result<(), Error> {
        if self.kind.is_some() {
            self.kind = Some(self.select_backend()?);
        }
        Ok(())
    }

    /// Reselect the backend, then recompute the minimum period and re-clamp the rate.
    fn retime(&mut self) -> Result<HertzU32, Error> {
        self.reselect()?;
        self.refresh_timing();
        self.apply_rate()
    }

    /// Return to backend `kind` and reprogram the trigger after a rejected write.
    fn restore(&mut self, kind: Option<BackendKind>) {
        self.kind = kind;
        self.refresh_timing();
        if let Err(err) = self.apply_rate() {
            warn!("trigger rate not restored: {}", err);
        }
    }
}
