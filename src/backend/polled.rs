// SPDX-License-Identifier: Apache-2.0

//! Polled backend: wait for the converter's ready signal, then read one sample.

use embedded_hal::digital::{InputPin, PinState};

use super::Produced;
use crate::{adapter::DeviceAdapter, config::MAX_SAMPLE_WIDTH, error::Error};

/// Data-ready (or BUSY) indication from the converter.
pub trait ReadySignal {
    /// A conversion result is available.
    fn is_ready(&mut self) -> bool;
}

/// [`ReadySignal`] read from a GPIO. A pin read error counts as not ready.
pub struct ReadyPin<P> {
    /// Input pin
    pin: P,
    /// Level meaning "ready"
    active: PinState,
}

impl<P: InputPin> ReadyPin<P> {
    /// Wrap `pin`, treating `active` as ready.
    pub fn new(pin: P, active: PinState) -> Self {
        Self { pin, active }
    }

    /// Underlying pin, for interrupt acknowledgement
    pub fn pin_mut(&mut self) -> &mut P {
        &mut self.pin
    }
}

impl<P: InputPin> ReadySignal for ReadyPin<P> {
    fn is_ready(&mut self) -> bool {
        match self.active {
            PinState::High => self.pin.is_high().unwrap_or(false),
            PinState::Low => self.pin.is_low().unwrap_or(false),
        }
    }
}

/// Boards without a ready line: every poll succeeds and the trigger period alone paces reads.
impl ReadySignal for () {
    fn is_ready(&mut self) -> bool {
        true
    }
}

/// Single-sample backend state.
#[derive(Debug)]
pub struct PolledBackend {
    /// Ready polls before [`Error::Timeout`]
    timeout_budget: u32,
    /// Reads still to be thrown away
    discard_count: u8,
}

impl PolledBackend {
    /// Backend that gives up after `timeout_budget` unsuccessful ready polls.
    pub fn new(timeout_budget: u32) -> Self {
        Self {
            timeout_budget,
            discard_count: 0,
        }
    }

    /// Prepare for a new capture. With `read_ahead`, the first read is discarded.
    pub fn arm(&mut self, read_ahead: bool) {
        self.discard_count = u8::from(read_ahead);
    }

    /// Reads still to be discarded
    pub fn discard_count(&self) -> u8 {
        self.discard_count
    }

    /// Wait for `ready`, then read one sample from `adapter` into `dst`.
    ///
    /// Polls at most `timeout_budget` times; if the signal never asserts, returns
    /// [`Error::Timeout`] without reading. `dst` is only written when the result is
    /// [`Produced::Sample`]. Samples wider than [`MAX_SAMPLE_WIDTH`] are not supported.
    pub fn produce_one<A, R>(
        &mut self,
        adapter: &mut A,
        ready: &mut R,
        dst: &mut [u8],
    ) -> Result<Produced, Error>
    where
        A: DeviceAdapter + ?Sized,
        R: ReadySignal + ?Sized,
    {
        if !(0..self.timeout_budget).any(|_| ready.is_ready()) {
            return Err(Error::Timeout);
        }
        if self.discard_count > 0 {
            let mut scratch = [0u8; MAX_SAMPLE_WIDTH];
            let width = dst.len().min(scratch.len());
            adapter.read(&mut scratch[..width])?;
            self.discard_count -= 1;
            trace!("read-ahead slot discarded");
            return Ok(Produced::Discarded);
        }
        adapter.read(dst)?;
        Ok(Produced::Sample)
    }
}
