// SPDX-License-Identifier: Apache-2.0

//! Host-side stand-ins for board peripherals and converters.

use std::{collections::VecDeque, convert::Infallible};

use embedded_hal::{
    digital::{ErrorType as PinErrorType, OutputPin},
    spi::{ErrorKind, ErrorType as SpiErrorType, SpiBus},
};
use fugit::HertzU32;

use crate::{
    adapter::{ChannelId, DeviceAdapter},
    backend::{BackendKind, BlockController, Half, ReadySignal},
    components::{StatusIndicator, StatusLedStates},
    error::DeviceError,
    session::{Board, BoardParts},
    trigger::{Polarity, Waveform},
};

/// Timer recording what was programmed
#[derive(Debug)]
pub struct MockWaveform {
    pub tick_rate: HertzU32,
    pub period_ticks: u32,
    pub high_ticks: u32,
    pub polarity: Polarity,
    pub enables: u32,
    pub disables: u32,
    /// Longest period in ticks
    pub max_ticks: u32,
}

impl MockWaveform {
    pub fn new(tick_rate: HertzU32) -> Self {
        Self {
            tick_rate,
            period_ticks: 0,
            high_ticks: 0,
            polarity: Polarity::ActiveHigh,
            enables: 0,
            disables: 0,
            max_ticks: u32::MAX,
        }
    }
}

impl Waveform for MockWaveform {
    fn tick_rate(&self) -> HertzU32 {
        self.tick_rate
    }

    fn max_period_ticks(&self) -> u32 {
        self.max_ticks
    }

    fn set_period_ticks(&mut self, ticks: u32) -> Result<(), DeviceError> {
        self.period_ticks = ticks;
        Ok(())
    }

    fn set_high_ticks(&mut self, ticks: u32) -> Result<(), DeviceError> {
        self.high_ticks = ticks;
        Ok(())
    }

    fn set_polarity(&mut self, polarity: Polarity) -> Result<(), DeviceError> {
        self.polarity = polarity;
        Ok(())
    }

    fn enable(&mut self) -> Result<(), DeviceError> {
        self.enables += 1;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), DeviceError> {
        self.disables += 1;
        Ok(())
    }
}

/// Converter emitting `[channel, scan index]` tagged samples in the order of the applied
/// channel list.
#[derive(Debug)]
pub struct MockAdapter {
    pub channel_count: u8,
    pub sample_width: usize,
    /// Reads return the previous conversion; the first read returns `0xFF` bytes
    pub read_ahead: bool,
    pub channels: Vec<ChannelId>,
    pub reads: u32,
    /// Fail every read once `reads` reaches this count
    pub fail_after: Option<u32>,
    pub applied: u32,
    pub released: u32,
    pub polled_max: Option<HertzU32>,
    pub block_max: Option<HertzU32>,
}

impl MockAdapter {
    pub fn new(channel_count: u8, sample_width: usize) -> Self {
        Self {
            channel_count,
            sample_width,
            read_ahead: false,
            channels: Vec::new(),
            reads: 0,
            fail_after: None,
            applied: 0,
            released: 0,
            polled_max: Some(HertzU32::kHz(100)),
            block_max: Some(HertzU32::MHz(1)),
        }
    }

    /// Tag of conversion `index`
    pub fn tag(&self, index: u32) -> [u8; 2] {
        let len = self.channels.len().max(1) as u32;
        let channel = self.channels.get((index % len) as usize).copied().unwrap_or(0);
        [channel, (index / len) as u8]
    }
}

impl DeviceAdapter for MockAdapter {
    fn channel_count(&self) -> u8 {
        self.channel_count
    }

    fn sample_width(&self) -> usize {
        self.sample_width
    }

    fn needs_read_ahead(&self) -> bool {
        self.read_ahead
    }

    fn max_rate(&self, kind: BackendKind) -> Option<HertzU32> {
        match kind {
            BackendKind::Polled => self.polled_max,
            BackendKind::Block => self.block_max,
        }
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<(), DeviceError> {
        if self.fail_after.is_some_and(|limit| self.reads >= limit) {
            return Err(DeviceError::Bus);
        }
        dst.fill(0);
        let conversion = match (self.read_ahead, self.reads) {
            (true, 0) => None,
            (true, reads) => Some(reads - 1),
            (false, reads) => Some(reads),
        };
        match conversion {
            None => dst.fill(0xFF),
            Some(index) => {
                let tag = self.tag(index);
                let width = dst.len().min(2);
                dst[..width].copy_from_slice(&tag[..width]);
            }
        }
        self.reads += 1;
        Ok(())
    }

    fn apply_channels(&mut self, channels: &[ChannelId]) -> Result<(), DeviceError> {
        self.channels = channels.to_vec();
        self.applied += 1;
        Ok(())
    }

    fn release_channels(&mut self) -> Result<(), DeviceError> {
        self.released += 1;
        Ok(())
    }
}

/// Ready signal with a fixed answer, counting polls
#[derive(Debug, Default)]
pub struct MockReady {
    pub ready: bool,
    pub polls: u32,
}

impl MockReady {
    pub fn always() -> Self {
        Self {
            ready: true,
            polls: 0,
        }
    }

    pub fn never() -> Self {
        Self {
            ready: false,
            polls: 0,
        }
    }
}

impl ReadySignal for MockReady {
    fn is_ready(&mut self) -> bool {
        self.polls += 1;
        self.ready
    }
}

/// Status indicator recording every state shown
#[derive(Debug, Default)]
pub struct MockStatus {
    pub shown: Vec<StatusLedStates>,
}

impl MockStatus {
    pub fn last(&self) -> Option<StatusLedStates> {
        self.shown.last().copied()
    }
}

impl StatusIndicator for MockStatus {
    fn show(&mut self, state: StatusLedStates) {
        self.shown.push(state);
    }
}

/// DMA controller whose halves are filled by the test
#[derive(Debug)]
pub struct MockBlock {
    pub window_len: usize,
    pub half_len: usize,
    pub halves: [Vec<u8>; 2],
    pub starts: u32,
    pub rearmed: Vec<Half>,
    pub aborts: u32,
    pub releases: u32,
    /// Fail every `rearm`
    pub fail_rearm: bool,
}

impl MockBlock {
    pub fn new(window_len: usize) -> Self {
        Self {
            window_len,
            half_len: 0,
            halves: [Vec::new(), Vec::new()],
            starts: 0,
            rearmed: Vec::new(),
            aborts: 0,
            releases: 0,
            fail_rearm: false,
        }
    }

    fn index(half: Half) -> usize {
        match half {
            Half::First => 0,
            Half::Second => 1,
        }
    }

    /// Write `bytes` at the start of `half`
    pub fn fill(&mut self, half: Half, bytes: &[u8]) {
        self.halves[Self::index(half)][..bytes.len()].copy_from_slice(bytes);
    }

    /// Fill all of `half` with consecutive values starting at `next`
    pub fn fill_sequence(&mut self, half: Half, next: &mut u8) {
        for byte in self.halves[Self::index(half)].iter_mut() {
            *byte = *next;
            *next = next.wrapping_add(1);
        }
    }
}

impl BlockController for MockBlock {
    fn window_len(&self) -> usize {
        self.window_len
    }

    fn start(&mut self, half_len: usize) -> Result<(), DeviceError> {
        self.half_len = half_len;
        self.halves = [vec![0; half_len], vec![0; half_len]];
        self.starts += 1;
        Ok(())
    }

    fn half(&self, half: Half) -> &[u8] {
        &self.halves[Self::index(half)]
    }

    fn rearm(&mut self, half: Half) -> Result<(), DeviceError> {
        if self.fail_rearm {
            return Err(DeviceError::Bus);
        }
        self.rearmed.push(half);
        Ok(())
    }

    fn abort(&mut self) {
        self.aborts += 1;
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.releases += 1;
        Ok(())
    }
}

/// SPI bus recording writes and replaying canned responses
#[derive(Debug, Default)]
pub struct MockSpi {
    pub responses: VecDeque<Vec<u8>>,
    pub written: Vec<Vec<u8>>,
    pub fail: bool,
}

impl SpiErrorType for MockSpi {
    type Error = ErrorKind;
}

impl SpiBus for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.transfer(words, &[])
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        if self.fail {
            return Err(ErrorKind::Other);
        }
        self.written.push(words.to_vec());
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.write(write)?;
        let response = self.responses.pop_front().unwrap_or_default();
        let len = read.len().min(response.len());
        read[..len].copy_from_slice(&response[..len]);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let write = words.to_vec();
        self.transfer(words, &write)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Output pin recording every level driven (`true` = high)
#[derive(Debug, Default)]
pub struct MockPin {
    pub transitions: Vec<bool>,
}

impl MockPin {
    pub fn level(&self) -> Option<bool> {
        self.transitions.last().copied()
    }
}

impl PinErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.transitions.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.transitions.push(true);
        Ok(())
    }
}

/// Board made of mocks
pub struct TestBoard;

impl Board for TestBoard {
    type Waveform = MockWaveform;
    type Block = MockBlock;
    type Ready = MockReady;
    type Status = MockStatus;
}

/// Mock peripherals with a 1 MHz trigger timer and a DMA window of `window_len` bytes
pub fn parts(window_len: usize) -> BoardParts<TestBoard> {
    BoardParts {
        waveform: MockWaveform::new(HertzU32::MHz(1)),
        block: MockBlock::new(window_len),
        ready: MockReady::always(),
        status: MockStatus::default(),
    }
}
