// SPDX-License-Identifier: Apache-2.0

//! Device adapters: the per-converter capability consumed by the capture engine.
//!
//! The engine never encodes device commands itself. It asks a [`DeviceAdapter`] for the sample
//! width, rate limits and quirks, and hands it buffers to fill. [`SpiConverter`] covers the
//! common case of a sequenced SPI converter described by a [`ConverterProfile`].

use embedded_hal::{digital::OutputPin, spi::SpiBus};
use fugit::{HertzU32, NanosDurationU32};

use crate::{backend::BackendKind, error::DeviceError};

/// Converter input channel index
pub type ChannelId = u8;

/// Burst-averaging setting: `filter_length` conversions at `burst_rate` Hz per output sample.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Averaging {
    /// Conversions averaged into one sample
    pub filter_length: u32,
    /// Internal conversion rate during the burst, in Hz
    pub burst_rate: u32,
}

/// Capability of one converter, as seen by the capture engine.
pub trait DeviceAdapter {
    /// Number of input channels
    fn channel_count(&self) -> u8;

    /// Bytes per sample of one channel
    fn sample_width(&self) -> usize;

    /// The device returns the previous conversion on every read, so the first read of a
    /// capture carries no valid data and must be discarded.
    fn needs_read_ahead(&self) -> bool;

    /// Fastest rate the adapter sustains on `kind` in the current operating mode, or `None` if
    /// it cannot use that backend.
    fn max_rate(&self, kind: BackendKind) -> Option<HertzU32>;

    /// Read one sample into `dst`, least significant byte first. `dst` is exactly
    /// [`sample_width`](Self::sample_width) bytes.
    fn read(&mut self, dst: &mut [u8]) -> Result<(), DeviceError>;

    /// Apply excitation and sequencing for `channels`, then leave the device ready to convert.
    fn apply_channels(&mut self, channels: &[ChannelId]) -> Result<(), DeviceError>;

    /// Leave conversion mode and release the channel configuration.
    fn release_channels(&mut self) -> Result<(), DeviceError>;

    /// Current operating mode index
    fn operating_mode(&self) -> u32 {
        0
    }

    /// Switch the operating mode. Adapters with a single mode only accept `0`.
    fn set_operating_mode(&mut self, mode: u32) -> Result<(), DeviceError> {
        match mode {
            0 => Ok(()),
            _ => Err(DeviceError::Unsupported),
        }
    }

    /// Supported averaging filter lengths
    fn filter_lengths(&self) -> &[u32] {
        &[]
    }

    /// Supported burst rates, in Hz
    fn burst_rates(&self) -> &[u32] {
        &[]
    }

    /// Current averaging setting, if the adapter averages
    fn averaging(&self) -> Option<Averaging> {
        None
    }

    /// Change the averaging setting.
    fn set_averaging(&mut self, _averaging: Averaging) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }

    /// Time from trigger to valid data for one sample with `averaging` (or without averaging
    /// when `None`).
    fn conversion_time(&self, _averaging: Option<Averaging>) -> NanosDurationU32 {
        NanosDurationU32::from_ticks(0)
    }
}

/// Static description of a sequenced SPI converter.
#[derive(Debug)]
pub struct ConverterProfile {
    /// Part family, for logs
    pub name: &'static str,
    /// Number of input channels
    pub channel_count: u8,
    /// Bytes per sample
    pub sample_width: usize,
    /// Reads return the previous conversion
    pub needs_read_ahead: bool,
    /// Bytes clocked out while a sample is clocked in. Padded with zeros to the sample width.
    pub read_command: &'static [u8],
    /// Sent after the sequencer is programmed to start converting
    pub enter_command: &'static [u8],
    /// Sent on release to leave conversion mode
    pub exit_command: &'static [u8],
    /// Two-byte address of the 16-bit channel sequencer register, if any
    pub sequencer_register: Option<[u8; 2]>,
    /// Number of operating modes
    pub mode_count: u32,
    /// Operating modes in which DMA block transfers are possible
    pub block_modes: &'static [u32],
    /// Operating mode that enables burst averaging
    pub averaging_mode: Option<u32>,
    /// Fastest polled rate
    pub max_polled_rate: HertzU32,
    /// Fastest block rate
    pub max_block_rate: HertzU32,
    /// Supported filter lengths
    pub filter_lengths: &'static [u32],
    /// Supported burst rates, in Hz
    pub burst_rates: &'static [u32],
    /// Conversion time of a single, non-averaged sample
    pub conversion_time: NanosDurationU32,
}

/// Burst rates of the AD4052 averaging engine, in Hz
const AD4052_BURST_RATES: [u32; 16] = [
    2_000_000, 1_000_000, 300_000, 100_000, 33_300, 10_000, 3_000, 1_000, 500, 333, 250, 200, 166,
    140, 125, 111,
];

/// Averaging filter lengths of the AD4052
const AD4052_FILTER_LENGTHS: [u32; 12] = [2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096];

/// 8-channel, 16-bit converter that returns the previous conversion on each read. The
/// configuration word is clocked in alongside the data, so no separate sequencer write exists.
pub static AD7689: ConverterProfile = ConverterProfile {
    name: "AD7689",
    channel_count: 8,
    sample_width: 2,
    needs_read_ahead: true,
    read_command: &[0xF1, 0x24],
    enter_command: &[],
    exit_command: &[],
    sequencer_register: None,
    mode_count: 1,
    block_modes: &[],
    averaging_mode: None,
    max_polled_rate: HertzU32::from_raw(62_000),
    max_block_rate: HertzU32::from_raw(62_000),
    filter_lengths: &[],
    burst_rates: &[],
    conversion_time: NanosDurationU32::from_ticks(2_200),
};

/// 16-channel, 16-bit converter with a standard sequencer. Mode 0 is register-read conversion,
/// mode 1 is autonomous conversion mode, which supports block transfers.
pub static AD4696: ConverterProfile = ConverterProfile {
    name: "AD4696",
    channel_count: 16,
    sample_width: 2,
    needs_read_ahead: false,
    read_command: &[],
    enter_command: &[0x00, 0x20, 0x01],
    exit_command: &[0xA0, 0x00],
    sequencer_register: Some([0x00, 0x24]),
    mode_count: 2,
    block_modes: &[1],
    averaging_mode: None,
    max_polled_rate: HertzU32::from_raw(62_500),
    max_block_rate: HertzU32::from_raw(500_000),
    filter_lengths: &[],
    burst_rates: &[],
    conversion_time: NanosDurationU32::from_ticks(415),
};

/// Single-channel converter with a burst-averaging mode (mode 1).
pub static AD4052: ConverterProfile = ConverterProfile {
    name: "AD4052",
    channel_count: 1,
    sample_width: 2,
    needs_read_ahead: false,
    read_command: &[],
    enter_command: &[0x00, 0x20, 0x01],
    exit_command: &[0xA8],
    sequencer_register: None,
    mode_count: 2,
    block_modes: &[0, 1],
    averaging_mode: Some(1),
    max_polled_rate: HertzU32::from_raw(55_000),
    max_block_rate: HertzU32::from_raw(1_000_000),
    filter_lengths: &AD4052_FILTER_LENGTHS,
    burst_rates: &AD4052_BURST_RATES,
    conversion_time: NanosDurationU32::from_ticks(250),
};

/// Generic SPI converter driven from a [`ConverterProfile`].
pub struct SpiConverter<B, CS> {
    /// SPI bus, owned exclusively
    bus: B,
    /// Active-low chip select
    cs: CS,
    /// Device description
    profile: &'static ConverterProfile,
    /// Current operating mode
    mode: u32,
    /// Current averaging setting
    averaging: Averaging,
}

impl<B: SpiBus, CS: OutputPin> SpiConverter<B, CS> {
    /// Take ownership of the bus and chip select. The device starts in mode 0 with the
    /// shortest averaging filter at the fastest burst rate.
    pub fn new(bus: B, cs: CS, profile: &'static ConverterProfile) -> Self {
        let averaging = Averaging {
            filter_length: profile.filter_lengths.first().copied().unwrap_or(1),
            burst_rate: profile.burst_rates.first().copied().unwrap_or(0),
        };
        Self {
            bus,
            cs,
            profile,
            mode: 0,
            averaging,
        }
    }

    /// Device description
    pub fn profile(&self) -> &'static ConverterProfile {
        self.profile
    }

    /// Release the bus and chip select.
    pub fn free(self) -> (B, CS) {
        (self.bus, self.cs)
    }

    /// Run `f` with chip select asserted, deasserting it afterwards even on failure.
    fn selected<F>(&mut self, f: F) -> Result<(), DeviceError>
    where
        F: FnOnce(&mut B) -> Result<(), B::Error>,
    {
        self.cs.set_low().map_err(|_| DeviceError::Bus)?;
        let result = f(&mut self.bus).and_then(|()| self.bus.flush());
        self.cs.set_high().map_err(|_| DeviceError::Bus)?;
        result.map_err(|_| DeviceError::Bus)
    }

    /// Write `frame` as one chip-select cycle. Empty frames are skipped.
    fn command(&mut self, frame: &[u8]) -> Result<(), DeviceError> {
        if frame.is_empty() {
            return Ok(());
        }
        self.selected(|bus| bus.write(frame))
    }

    /// Averaging is in effect in the current mode.
    fn averaging_active(&self) -> bool {
        self.profile.averaging_mode == Some(self.mode)
    }
}

impl<B: SpiBus, CS: OutputPin> DeviceAdapter for SpiConverter<B, CS> {
    fn channel_count(&self) -> u8 {
        self.profile.channel_count
    }

    fn sample_width(&self) -> usize {
        self.profile.sample_width
    }

    fn needs_read_ahead(&self) -> bool {
        self.profile.needs_read_ahead
    }

    fn max_rate(&self, kind: BackendKind) -> Option<HertzU32> {
        match kind {
            BackendKind::Polled => Some(self.profile.max_polled_rate),
            BackendKind::Block if self.profile.block_modes.contains(&self.mode) => {
                Some(self.profile.max_block_rate)
            }
            BackendKind::Block => None,
        }
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<(), DeviceError> {
        let command = self.profile.read_command;
        let width = dst.len().min(command.len());
        self.selected(|bus| bus.transfer(dst, &command[..width]))?;
        // Samples arrive MSB first
        dst.reverse();
        Ok(())
    }

    fn apply_channels(&mut self, channels: &[ChannelId]) -> Result<(), DeviceError> {
        if let Some([addr_hi, addr_lo]) = self.profile.sequencer_register {
            // The hardware sequencer always scans in ascending order
            if channels.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(DeviceError::Unsupported);
            }
            let mask = channels
                .iter()
                .fold(0u16, |mask, &channel| mask | 1 << (channel & 0x0f));
            let [mask_hi, mask_lo] = mask.to_be_bytes();
            self.command(&[addr_hi, addr_lo, mask_lo, mask_hi])?;
        }
        debug!("{}: {} channel(s) enabled", self.profile.name, channels.len());
        self.command(self.profile.enter_command)
    }

    fn release_channels(&mut self) -> Result<(), DeviceError> {
        self.command(self.profile.exit_command)
    }

    fn operating_mode(&self) -> u32 {
        self.mode
    }

    fn set_operating_mode(&mut self, mode: u32) -> Result<(), DeviceError> {
        if mode >= self.profile.mode_count {
            return Err(DeviceError::Unsupported);
        }
        self.mode = mode;
        Ok(())
    }

    fn filter_lengths(&self) -> &[u32] {
        self.profile.filter_lengths
    }

    fn burst_rates(&self) -> &[u32] {
        self.profile.burst_rates
    }

    fn averaging(&self) -> Option<Averaging> {
        self.averaging_active().then_some(self.averaging)
    }

    fn set_averaging(&mut self, averaging: Averaging) -> Result<(), DeviceError> {
        if !self.profile.filter_lengths.contains(&averaging.filter_length)
            || !self.profile.burst_rates.contains(&averaging.burst_rate)
        {
            return Err(DeviceError::Unsupported);
        }
        self.averaging = averaging;
        Ok(())
    }

    /// `((filter_length - 1) / burst_rate + t_conv) * 1.1` when averaging, `t_conv` otherwise.
    fn conversion_time(&self, averaging: Option<Averaging>) -> NanosDurationU32 {
        let t_conv = u64::from(self.profile.conversion_time.ticks());
        let ns = match averaging {
            Some(Averaging {
                filter_length,
                burst_rate,
            }) if burst_rate > 0 => {
                let burst = u64::from(filter_length.saturating_sub(1)) * 1_000_000_000
                    / u64::from(burst_rate);
                (burst + t_conv) * 11 / 10
            }
            _ => t_conv,
        };
        NanosDurationU32::from_ticks(ns.min(u64::from(u32::MAX)) as u32)
    }
}
