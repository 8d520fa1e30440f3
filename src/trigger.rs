// SPDX-License-Identifier: Apache-2.0

//! Conversion trigger clock.
//!
//! A [`Waveform`] is the hardware timer (a PWM slice on RP2040). [`TriggerClock`] wraps it with
//! the period/duty bookkeeping, the minimum-period check and the rate clamp, so the arithmetic
//! is shared by every board.

use fugit::{HertzU32, NanosDurationU32};

use crate::error::{DeviceError, Error};

/// Nanoseconds per second
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Idle level of the trigger output
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Output idles low, conversion starts on the rising edge
    #[default]
    ActiveHigh,
    /// Output idles high, conversion starts on the falling edge
    ActiveLow,
}

/// Periodic waveform generator driving the converter's conversion-start input.
///
/// Periods are expressed in timer ticks of [`Waveform::tick_rate`].
pub trait Waveform {
    /// Counting frequency of the timer
    fn tick_rate(&self) -> HertzU32;

    /// Longest period the timer can produce, in ticks
    fn max_period_ticks(&self) -> u32;

    /// Program the period. Takes effect at the next wrap.
    fn set_period_ticks(&mut self, ticks: u32) -> Result<(), DeviceError>;

    /// Program the active (high) time per period.
    fn set_high_ticks(&mut self, ticks: u32) -> Result<(), DeviceError>;

    /// Select the output polarity.
    fn set_polarity(&mut self, polarity: Polarity) -> Result<(), DeviceError>;

    /// Start toggling the output.
    fn enable(&mut self) -> Result<(), DeviceError>;

    /// Stop toggling and park the output at its idle level.
    fn disable(&mut self) -> Result<(), DeviceError>;
}

/// Convert a rate to its period, rounding up. `rate` must be non-zero.
pub fn period_of(rate: HertzU32) -> NanosDurationU32 {
    let hz = u64::from(rate.raw().max(1));
    NanosDurationU32::from_ticks(NANOS_PER_SEC.div_ceil(hz).min(u64::from(u32::MAX)) as u32)
}

/// Convert a period to its rate, rounding down. A zero period reports [`u32::MAX`] Hz.
pub fn rate_of(period: NanosDurationU32) -> HertzU32 {
    match period.ticks() {
        0 => HertzU32::from_raw(u32::MAX),
        ns => HertzU32::from_raw((NANOS_PER_SEC / u64::from(ns)) as u32),
    }
}

/// Pick the entry of `options` closest to `target` among those whose derived period is below
/// `ceiling`. Ties resolve to the smaller value. Returns `None` if no entry qualifies.
///
/// This is the "closest supported attribute value" policy: every setting is tried, so the
/// table may be in any order.
///
/// ```
/// use evb_stream::trigger::closest_supported;
/// use fugit::NanosDurationU32;
///
/// let lengths = [2, 4, 8, 16, 32];
/// // Longer filters take longer; 32 would exceed the 1 ms ceiling
/// let chosen = closest_supported(&lengths, 40, NanosDurationU32::millis(1), |len| {
///     NanosDurationU32::micros(len * 40)
/// });
/// assert_eq!(chosen, Some(16));
/// ```
pub fn closest_supported<F>(
    options: &[u32],
    target: u32,
    ceiling: NanosDurationU32,
    mut derived_period: F,
) -> Option<u32>
where
    F: FnMut(u32) -> NanosDurationU32,
{
    let mut closest: Option<u32> = None;
    for &candidate in options {
        if derived_period(candidate) >= ceiling {
            continue;
        }
        closest = match closest {
            None => Some(candidate),
            Some(best) => {
                let (d_best, d_new) = (best.abs_diff(target), candidate.abs_diff(target));
                if d_new < d_best || (d_new == d_best && candidate < best) {
                    Some(candidate)
                } else {
                    Some(best)
                }
            }
        };
    }
    closest
}

/// Trigger clock state owned by a capture session.
pub struct TriggerClock<W> {
    /// Hardware timer
    waveform: W,
    /// Programmed period
    period_ticks: u32,
    /// Shortest period allowed by the converter timing
    min_period_ticks: u32,
    /// High time as a percentage of the period
    duty_percent: u8,
    /// Output polarity
    polarity: Polarity,
    /// Output is toggling
    running: bool,
}

impl<W: Waveform> TriggerClock<W> {
    /// Wrap a waveform generator. The output is disabled and no period is programmed until
    /// [`configure`](Self::configure) or [`set_rate`](Self::set_rate) is called.
    pub fn new(waveform: W) -> Self {
        Self {
            waveform,
            period_ticks: 0,
            min_period_ticks: 1,
            duty_percent: 0,
            polarity: Polarity::default(),
            running: false,
        }
    }

    /// Convert a duration to timer ticks, rounding up.
    fn ticks_for(&self, period: NanosDurationU32) -> u64 {
        let hz = u64::from(self.waveform.tick_rate().raw());
        (u64::from(period.ticks()) * hz).div_ceil(NANOS_PER_SEC)
    }

    /// Set the shortest allowed period (the minimum inter-sample time).
    ///
    /// Does not touch the programmed period; callers re-clamp with [`set_rate`](Self::set_rate).
    pub fn set_min_period(&mut self, period: NanosDurationU32) {
        self.min_period_ticks = self.ticks_for(period).clamp(1, u64::from(u32::MAX)) as u32;
    }

    /// Shortest allowed period
    pub fn min_period(&self) -> NanosDurationU32 {
        self.ticks_to_duration(self.min_period_ticks)
    }

    /// Convert ticks back to a duration, rounding down.
    fn ticks_to_duration(&self, ticks: u32) -> NanosDurationU32 {
        let hz = u64::from(self.waveform.tick_rate().raw().max(1));
        NanosDurationU32::from_ticks(
            (u64::from(ticks) * NANOS_PER_SEC / hz).min(u64::from(u32::MAX)) as u32,
        )
    }

    /// Program period, duty and polarity. The output keeps its running state.
    ///
    /// Fails with [`Error::InvalidPeriod`] if `period` is shorter than the minimum period or
    /// longer than the timer can count.
    pub fn configure(
        &mut self,
        period: NanosDurationU32,
        duty_percent: u8,
        polarity: Polarity,
    ) -> Result<(), Error> {
        let ticks = self.ticks_for(period);
        if ticks < u64::from(self.min_period_ticks)
            || ticks > u64::from(self.waveform.max_period_ticks())
        {
            return Err(Error::InvalidPeriod);
        }
        if duty_percent > 100 {
            return Err(Error::InvalidArgument);
        }
        self.duty_percent = duty_percent;
        self.polarity = polarity;
        self.waveform.set_polarity(polarity)?;
        self.program(ticks as u32)
    }

    /// Change duty cycle and polarity, keeping the programmed period.
    pub fn set_shape(&mut self, duty_percent: u8, polarity: Polarity) -> Result<(), Error> {
        if duty_percent > 100 {
            return Err(Error::InvalidArgument);
        }
        self.duty_percent = duty_percent;
        self.polarity = polarity;
        self.waveform.set_polarity(polarity)?;
        match self.period_ticks {
            0 => Ok(()),
            ticks => self.program(ticks),
        }
    }

    /// Write period and high time to the hardware.
    fn program(&mut self, ticks: u32) -> Result<(), Error> {
        self.waveform.set_period_ticks(ticks)?;
        let mut high = (u64::from(ticks) * u64::from(self.duty_percent) / 100) as u32;
        if self.duty_percent > 0 {
            high = high.max(1);
        }
        self.waveform.set_high_ticks(high)?;
        self.period_ticks = ticks;
        Ok(())
    }

    /// Clamp `requested` to the fastest rate the timer can produce that does not exceed
    /// `max`, the minimum period, or `requested` itself, and program it. Requests slower than
    /// the longest timer period get the slowest rate the timer can count.
    ///
    /// Returns the actual rate. Larger requests never produce a smaller actual rate. Fails with
    /// [`Error::InvalidPeriod`] only if the minimum period does not fit in the timer.
    pub fn set_rate(&mut self, requested: HertzU32, max: HertzU32) -> Result<HertzU32, Error> {
        if requested.raw() == 0 || max.raw() == 0 {
            return Err(Error::InvalidArgument);
        }
        let min_ticks = u64::from(self.min_period_ticks);
        let max_ticks = u64::from(self.waveform.max_period_ticks());
        if min_ticks > max_ticks {
            return Err(Error::InvalidPeriod);
        }
        let hz = u64::from(self.waveform.tick_rate().raw());
        let target = u64::from(requested.raw().min(max.raw()));
        let ticks = hz.div_ceil(target).clamp(min_ticks, max_ticks);
        self.program(ticks as u32)?;
        let actual = self.rate();
        debug!("trigger rate {} Hz (requested {} Hz)", actual.raw(), requested.raw());
        Ok(actual)
    }

    /// Programmed rate, or 0 Hz when no period is programmed
    pub fn rate(&self) -> HertzU32 {
        match self.period_ticks {
            0 => HertzU32::from_raw(0),
            ticks => HertzU32::from_raw(self.waveform.tick_rate().raw() / ticks),
        }
    }

    /// Programmed period
    pub fn period(&self) -> NanosDurationU32 {
        self.ticks_to_duration(self.period_ticks)
    }

    /// Duty cycle in percent
    pub fn duty_percent(&self) -> u8 {
        self.duty_percent
    }

    /// Output polarity
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Output is toggling
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start the output. Calling it while running does nothing.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.running {
            return Ok(());
        }
        if self.period_ticks == 0 {
            return Err(Error::InvalidPeriod);
        }
        self.waveform.enable()?;
        self.running = true;
        Ok(())
    }

    /// Stop the output. Calling it while stopped does nothing.
    pub fn stop(&mut self) -> Result<(), Error> {
        if !self.running {
            return Ok(());
        }
        // Considered stopped even if the disable fails, so teardown never loops on it
        self.running = false;
        self.waveform.disable()?;
        Ok(())
    }

    /// Hardware timer
    pub fn waveform(&self) -> &W {
        &self.waveform
    }

    /// Hardware timer, for interrupt acknowledgement
    pub fn waveform_mut(&mut self) -> &mut W {
        &mut self.waveform
    }
}
