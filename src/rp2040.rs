// SPDX-License-Identifier: Apache-2.0

//! RP2040 peripheral bindings.

use cortex_m::singleton;
use embedded_hal::pwm::SetDutyCycle;
use fugit::HertzU32;
use rp2040_hal::pwm::{FreeRunning, Slice, SliceId, ValidSliceMode};

use crate::{
    error::DeviceError,
    trigger::{Polarity, Waveform},
};

/// Size of the capture ring buffer storage
pub const CAPTURE_BUFFER_LEN: usize = 32 * 1024;

/// Longest PWM period: the 16-bit `top` register plus one
const MAX_PWM_TICKS: u32 = 1 << 16;

/// Conversion trigger on channel A of a free-running PWM slice.
///
/// Route the output with `slice.channel_a.output_to(pin)` before handing the slice over.
pub struct PwmTrigger<I: SliceId>
where
    FreeRunning: ValidSliceMode<I>,
{
    /// PWM slice, disabled until the trigger starts
    slice: Slice<I, FreeRunning>,
    /// Counter frequency after the divider
    tick_rate: HertzU32,
}

impl<I: SliceId> PwmTrigger<I>
where
    FreeRunning: ValidSliceMode<I>,
{
    /// Take `slice`, counting at `sys_clk / divider`. `divider` of 0 is treated as 1.
    pub fn new(mut slice: Slice<I, FreeRunning>, sys_clk: HertzU32, divider: u8) -> Self {
        let divider = divider.max(1);
        slice.disable();
        slice.set_div_int(divider);
        slice.set_div_frac(0);
        Self {
            slice,
            tick_rate: HertzU32::from_raw(sys_clk.raw() / u32::from(divider)),
        }
    }
}

impl<I: SliceId> Waveform for PwmTrigger<I>
where
    FreeRunning: ValidSliceMode<I>,
{
    fn tick_rate(&self) -> HertzU32 {
        self.tick_rate
    }

    fn max_period_ticks(&self) -> u32 {
        MAX_PWM_TICKS
    }

    fn set_period_ticks(&mut self, ticks: u32) -> Result<(), DeviceError> {
        if ticks == 0 || ticks > MAX_PWM_TICKS {
            return Err(DeviceError::Unsupported);
        }
        // Ex. 1 MHz ticks at 100 kHz -> 10 ticks per period, `top` = 9
        self.slice.set_top((ticks - 1) as u16);
        Ok(())
    }

    fn set_high_ticks(&mut self, ticks: u32) -> Result<(), DeviceError> {
        self.slice
            .channel_a
            .set_duty_cycle(ticks.min(u32::from(u16::MAX)) as u16)
            .map_err(|_| DeviceError::Bus)
    }

    fn set_polarity(&mut self, polarity: Polarity) -> Result<(), DeviceError> {
        match polarity {
            Polarity::ActiveHigh => self.slice.channel_a.clr_inverted(),
            Polarity::ActiveLow => self.slice.channel_a.set_inverted(),
        }
        Ok(())
    }

    fn enable(&mut self) -> Result<(), DeviceError> {
        self.slice.set_counter(0);
        self.slice.enable();
        Ok(())
    }

    fn disable(&mut self) -> Result<(), DeviceError> {
        self.slice.disable();
        Ok(())
    }
}

/// Creates the capture ring buffer storage. Returns `None` on every call after the first.
pub fn capture_storage() -> Option<&'static mut [u8; CAPTURE_BUFFER_LEN]> {
    singleton!(: [u8; CAPTURE_BUFFER_LEN] = [0u8; CAPTURE_BUFFER_LEN])
}
