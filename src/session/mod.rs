// SPDX-License-Identifier: Apache-2.0

//! Capture session: the lifecycle state machine tying a trigger clock, a transfer backend and
//! the ring buffer to one device adapter.
//!
//! ```text
//! Idle -> Configuring -> Armed -> Streaming -> Draining -> Idle
//!            \_____________\________\___________\______-> Error -> Idle
//! ```
//!
//! `post_disable` is the only way back to `Idle`, from any state.

pub mod attr;

use fugit::{HertzU32, NanosDurationU32};
use heapless::Vec;

use crate::{
    adapter::{Averaging, ChannelId, DeviceAdapter},
    backend::{
        block::BlockProgress, BackendKind, BlockBackend, BlockController, BlockEvent,
        BlockGeometry, PolledBackend, Produced, ReadySignal, TransferBackend,
    },
    buffer::{RingBuffer, SampleCounter},
    components::{StatusIndicator, StatusLedStates},
    config::{BackendPreference, CaptureConfig, Topology, MAX_CHANNELS, MAX_SAMPLE_WIDTH},
    error::{DeviceError, Error},
    trigger::{period_of, TriggerClock, Waveform},
};

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No capture configured
    Idle,
    /// Channels accepted, device and backend being set up
    Configuring,
    /// Ready for [`CaptureSession::submit`]
    Armed,
    /// Trigger running, samples flowing into the ring buffer
    Streaming,
    /// Windowed capture complete, remaining bytes can be drained
    Draining,
    /// A fault stopped the capture; only [`CaptureSession::post_disable`] leaves this state
    Error,
}

/// Board-specific peripheral types used by a session.
pub trait Board {
    /// Conversion trigger timer
    type Waveform: Waveform;
    /// DMA bus controller, [`NoBlock`](crate::backend::NoBlock) if the board has none
    type Block: BlockController;
    /// Converter ready signal
    type Ready: ReadySignal;
    /// Status LEDs
    type Status: StatusIndicator;
}

/// Peripherals handed to [`CaptureSession::new`].
pub struct BoardParts<B: Board> {
    /// Conversion trigger timer
    pub waveform: B::Waveform,
    /// DMA bus controller
    pub block: B::Block,
    /// Converter ready signal
    pub ready: B::Ready,
    /// Status LEDs
    pub status: B::Status,
}

/// One capture engine instance, owning everything a capture touches.
pub struct CaptureSession<'b, A, B: Board> {
    /// Runtime settings
    config: CaptureConfig,
    /// Converter
    adapter: A,
    /// Conversion trigger
    clock: TriggerClock<B::Waveform>,
    /// DMA controller
    block: B::Block,
    /// Converter ready signal
    ready: B::Ready,
    /// Status LEDs
    status: B::Status,
    /// Captured bytes awaiting the Control Port
    ring: RingBuffer<'b>,
    /// Backend armed by `submit`
    backend: Option<TransferBackend>,
    /// Backend chosen at `pre_enable`
    kind: Option<BackendKind>,
    /// Lifecycle state
    state: State,
    /// Enabled channels in scan order
    active_channels: Vec<ChannelId, MAX_CHANNELS>,
    /// Bytes per single-channel sample
    bytes_per_sample: usize,
    /// Last rate requested through the attribute interface
    requested_rate: HertzU32,
    /// Samples in the current window, `None` when continuous
    requested_samples: Option<u32>,
    /// Windowed capture size in bytes
    target: usize,
    /// Bytes committed in the current capture
    delivered: usize,
    /// Bytes that must be committed before a blocking drain returns
    watermark: usize,
    /// Adapter channel configuration needs releasing
    excitation_applied: bool,
    /// Fault that moved the session to [`State::Error`]
    fault: Option<Error>,
    /// Samples committed in the current capture
    samples: SampleCounter,
}

impl<'b, A: DeviceAdapter, B: Board> CaptureSession<'b, A, B> {
    /// Create an idle session over `storage`.
    pub fn new(
        config: CaptureConfig,
        adapter: A,
        parts: BoardParts<B>,
        storage: &'b mut [u8],
    ) -> Self {
        let BoardParts {
            waveform,
            block,
            ready,
            mut status,
        } = parts;
        status.show(StatusLedStates::Normal);
        let mut session = Self {
            requested_rate: config.sampling_rate,
            config,
            adapter,
            clock: TriggerClock::new(waveform),
            block,
            ready,
            status,
            ring: RingBuffer::new(storage),
            backend: None,
            kind: None,
            state: State::Idle,
            active_channels: Vec::new(),
            bytes_per_sample: 0,
            requested_samples: None,
            target: 0,
            delivered: 0,
            watermark: 0,
            excitation_applied: false,
            fault: None,
            samples: SampleCounter::default(),
        };
        session.refresh_timing();
        if let Err(err) = session.apply_rate() {
            warn!("default trigger rate not applied: {}", err);
        }
        session
    }

    /// Lifecycle state
    pub fn state(&self) -> State {
        self.state
    }

    /// Runtime settings
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture topology
    pub fn topology(&self) -> Topology {
        self.config.topology
    }

    /// Switch between windowed and continuous capture. Only allowed while idle.
    pub fn set_topology(&mut self, topology: Topology) -> Result<(), Error> {
        if self.state != State::Idle {
            return Err(Error::Busy);
        }
        self.config.topology = topology;
        Ok(())
    }

    /// Enabled channels, in the order their samples are interleaved
    pub fn active_channels(&self) -> &[ChannelId] {
        &self.active_channels
    }

    /// Bytes per single-channel sample
    pub fn bytes_per_sample(&self) -> usize {
        self.bytes_per_sample
    }

    /// Bytes per scan across all enabled channels
    pub fn bytes_per_scan(&self) -> usize {
        self.bytes_per_sample * self.active_channels.len()
    }

    /// Samples requested for the current window, `None` when continuous or not submitted
    pub fn requested_samples(&self) -> Option<u32> {
        self.requested_samples
    }

    /// Backend selected by the last `pre_enable`
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.kind
    }

    /// Block backend state, while a block capture is armed
    pub fn block_backend(&self) -> Option<&BlockBackend> {
        match &self.backend {
            Some(TransferBackend::Block(backend)) => Some(backend),
            _ => None,
        }
    }

    /// Samples committed in the current capture
    pub fn sample_count(&self) -> u32 {
        self.samples.get_counter()
    }

    /// Fault that stopped the capture
    pub fn fault(&self) -> Option<Error> {
        self.fault
    }

    /// Bytes committed and not yet drained
    pub fn available(&self) -> usize {
        self.ring.committed_len()
    }

    /// Usable ring buffer capacity
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Windowed capture has delivered every requested byte
    pub fn is_done(&self) -> bool {
        self.state == State::Draining
    }

    /// A blocking drain can return: the watermark has been reached, the window is complete, or
    /// the session is no longer streaming.
    pub fn drain_ready(&self) -> bool {
        self.state != State::Streaming || self.ring.committed_len() >= self.watermark
    }

    /// Conversion trigger
    pub fn clock(&self) -> &TriggerClock<B::Waveform> {
        &self.clock
    }

    /// Converter
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// DMA controller, for acknowledging its interrupt
    pub fn block_controller_mut(&mut self) -> &mut B::Block {
        &mut self.block
    }

    /// Ready signal, for acknowledging its interrupt
    pub fn ready_mut(&mut self) -> &mut B::Ready {
        &mut self.ready
    }

    /// Status LEDs
    pub fn status(&self) -> &B::Status {
        &self.status
    }

    /// Enable the channels set in `mask`, scanned in ascending bit order.
    ///
    /// Fails with [`Error::Busy`] unless idle, and with [`Error::InvalidArgument`] for an empty
    /// mask or a bit beyond the adapter's channel count.
    pub fn pre_enable(&mut self, channel_mask: u32) -> Result<(), Error> {
        if self.state != State::Idle {
            return Err(Error::Busy);
        }
        let count = u32::from(self.adapter.channel_count());
        if channel_mask == 0 || (count < 32 && channel_mask >> count != 0) {
            return Err(Error::InvalidArgument);
        }
        let mut channels: Vec<ChannelId, MAX_CHANNELS> = Vec::new();
        for channel in (0..32u8).filter(|bit| channel_mask & (1 << bit) != 0) {
            channels.push(channel).map_err(|_| Error::InvalidArgument)?;
        }
        self.enable(channels)
    }

    /// Enable `channels` in the given scan order.
    ///
    /// Fails like [`pre_enable`](Self::pre_enable), and with [`Error::InvalidArgument`] if a
    /// channel is listed twice.
    pub fn pre_enable_channels(&mut self, channels: &[ChannelId]) -> Result<(), Error> {
        if self.state != State::Idle {
            return Err(Error::Busy);
        }
        let count = self.adapter.channel_count();
        let mut ordered: Vec<ChannelId, MAX_CHANNELS> = Vec::new();
        for &channel in channels {
            if channel >= count || ordered.contains(&channel) {
                return Err(Error::InvalidArgument);
            }
            ordered.push(channel).map_err(|_| Error::InvalidArgument)?;
        }
        if ordered.is_empty() {
            return Err(Error::InvalidArgument);
        }
        self.enable(ordered)
    }

    /// Configure device, backend and trigger for `channels`, ending in [`State::Armed`].
    fn enable(&mut self, channels: Vec<ChannelId, MAX_CHANNELS>) -> Result<(), Error> {
        self.enter(State::Configuring);
        self.active_channels = channels;
        self.bytes_per_sample = self.adapter.sample_width();
        match self.configure() {
            Ok(()) => {
                self.enter(State::Armed);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Fallible part of [`enable`](Self::enable).
    fn configure(&mut self) -> Result<(), Error> {
        if self.bytes_per_sample == 0 || self.bytes_per_sample > MAX_SAMPLE_WIDTH {
            return Err(Error::InvalidArgument);
        }
        self.adapter.apply_channels(&self.active_channels)?;
        self.excitation_applied = true;
        let kind = self.select_backend()?;
        self.kind = Some(kind);
        self.refresh_timing();
        self.apply_rate()?;
        self.clock.set_shape(self.config.duty_percent, self.config.polarity)?;
        debug!(
            "{:?} backend selected for {} channel(s), {} byte samples",
            kind,
            self.active_channels.len(),
            self.bytes_per_sample
        );
        Ok(())
    }

    /// Choose the backend for the requested rate and the configured preference.
    fn select_backend(&self) -> Result<BackendKind, Error> {
        let polled = self.adapter.max_rate(BackendKind::Polled);
        let block = self
            .adapter
            .max_rate(BackendKind::Block)
            .filter(|_| self.block.window_len() > 0);
        match self.config.backend {
            BackendPreference::Polled => polled.map(|_| BackendKind::Polled),
            BackendPreference::Block => block.map(|_| BackendKind::Block),
            BackendPreference::Auto => match (polled, block) {
                (Some(max), _) if self.requested_rate <= max => Some(BackendKind::Polled),
                (_, Some(_)) => Some(BackendKind::Block),
                (Some(_), None) => Some(BackendKind::Polled),
                (None, None) => None,
            },
        }
        .ok_or(Error::DeviceIo(DeviceError::Unsupported))
    }

    /// Fastest rate of the selected (or would-be selected) backend.
    fn max_rate(&self) -> Result<HertzU32, Error> {
        let kind = match self.kind {
            Some(kind) => kind,
            None => self.select_backend()?,
        };
        self.adapter
            .max_rate(kind)
            .ok_or(Error::DeviceIo(DeviceError::Unsupported))
    }

    /// Program the trigger with the requested rate, clamped to the backend maximum and the
    /// minimum period.
    fn apply_rate(&mut self) -> Result<HertzU32, Error> {
        let max = self.max_rate()?;
        self.clock.set_rate(self.requested_rate, max)
    }

    /// Update the trigger's minimum period: the settle time of the current averaging setting,
    /// and no shorter than the period of the backend's fastest rate.
    fn refresh_timing(&mut self) {
        let settle = self.settle_time(self.adapter.averaging());
        let min_period = match self.max_rate() {
            Ok(max) => settle.max(period_of(max)),
            Err(_) => settle,
        };
        self.clock.set_min_period(min_period);
    }

    /// Conversion time plus capture overhead, saturating at the longest representable period.
    fn settle_time(&self, averaging: Option<Averaging>) -> NanosDurationU32 {
        let conversion = self.adapter.conversion_time(averaging).ticks();
        NanosDurationU32::from_ticks(
            conversion.saturating_add(self.config.capture_overhead.ticks()),
        )
    }

    /// Start a capture of `requested_bytes`.
    ///
    /// Windowed captures stop after exactly `requested_bytes`, which must fit in the ring
    /// buffer. Continuous captures use it as the drain watermark. It must be a non-zero multiple
    /// of the scan size ([`Error::WouldOverflow`] otherwise). Any failure leaves the session in
    /// [`State::Error`].
    pub fn submit(&mut self, requested_bytes: u32) -> Result<(), Error> {
        if self.state != State::Armed {
            return Err(Error::InvalidState);
        }
        match self.arm(requested_bytes as usize) {
            Ok(()) => {
                info!(
                    "capture started: {} bytes at {} Hz",
                    requested_bytes,
                    self.clock.rate().raw()
                );
                self.enter(State::Streaming);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Fallible part of [`submit`](Self::submit).
    fn arm(&mut self, bytes: usize) -> Result<(), Error> {
        let scan = self.bytes_per_scan();
        if bytes == 0 {
            return Err(Error::InvalidArgument);
        }
        if bytes % scan != 0 {
            return Err(Error::WouldOverflow);
        }
        let windowed = self.config.topology == Topology::Windowed;
        let read_ahead = self.adapter.needs_read_ahead();

        let (unit, pending) = match self.kind {
            Some(BackendKind::Polled) => {
                let mut backend = PolledBackend::new(self.config.poll_budget);
                backend.arm(read_ahead);
                (scan, Pending::Polled(backend))
            }
            Some(BackendKind::Block) => {
                let slot = if read_ahead { self.bytes_per_sample } else { 0 };
                let geometry = BlockGeometry::plan(
                    self.block.window_len(),
                    scan,
                    slot,
                    windowed.then_some(bytes),
                )?;
                (geometry.payload, Pending::Block(geometry))
            }
            None => return Err(Error::InvalidState),
        };

        let capacity = self.ring.align_to(unit)?;
        if bytes > capacity {
            return Err(Error::InvalidArgument);
        }
        self.samples.reset();
        self.delivered = 0;
        if windowed {
            self.target = bytes;
            self.watermark = bytes;
            self.requested_samples = u32::try_from(bytes / self.bytes_per_sample).ok();
        } else {
            self.target = 0;
            self.watermark = bytes;
            self.requested_samples = None;
        }

        self.backend = Some(match pending {
            Pending::Polled(backend) => TransferBackend::Polled(backend),
            Pending::Block(geometry) => {
                TransferBackend::Block(BlockBackend::arm(&mut self.block, geometry)?)
            }
        });
        self.clock.start()
    }

    /// Service one conversion trigger on the polled backend: wait for ready, read one sample
    /// and commit it. Late triggers after a window completes are ignored.
    pub fn trigger_handler(&mut self) -> Result<(), Error> {
        match self.state {
            State::Streaming => {}
            State::Draining => return Ok(()),
            _ => return Err(Error::InvalidState),
        }
        let Some(TransferBackend::Polled(backend)) = self.backend.as_mut() else {
            return Err(Error::InvalidState);
        };
        let produced = produce_into(
            backend,
            &mut self.adapter,
            &mut self.ready,
            &mut self.ring,
            self.bytes_per_sample,
        );
        match produced {
            Ok(Produced::Sample) => {
                self.samples.add(1);
                self.delivered += self.bytes_per_sample;
                #[cfg(feature = "trace_indiv_samples")]
                trace!("sample {} committed", self.samples.get_counter());
                self.check_window();
                Ok(())
            }
            Ok(Produced::Discarded) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Service the polled backend from the foreground until the window is complete.
    ///
    /// Only valid for windowed captures on the polled backend.
    pub fn capture_window(&mut self) -> Result<(), Error> {
        if self.config.topology != Topology::Windowed || self.kind != Some(BackendKind::Polled) {
            return Err(Error::InvalidState);
        }
        while self.state == State::Streaming {
            self.trigger_handler()?;
        }
        match self.state {
            State::Draining => Ok(()),
            _ => Err(self.fault.unwrap_or(Error::InvalidState)),
        }
    }

    /// Deliver a completion event from the DMA interrupt.
    pub fn on_block_event(&mut self, event: BlockEvent) -> Result<(), Error> {
        match self.state {
            State::Streaming => {}
            State::Draining => return Ok(()),
            _ => return Err(Error::InvalidState),
        }
        let Some(TransferBackend::Block(backend)) = self.backend.as_mut() else {
            return Err(Error::InvalidState);
        };
        let before = self.ring.committed_len();
        let progress = backend.on_event(&mut self.block, &mut self.ring, event);
        let committed = self.ring.committed_len().saturating_sub(before);
        self.delivered += committed;
        if self.bytes_per_sample > 0 {
            self.samples.add((committed / self.bytes_per_sample) as u32);
        }
        match progress {
            Ok(BlockProgress::Pending) => Ok(()),
            Ok(BlockProgress::Done) => {
                self.check_window();
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Move to [`State::Draining`] once a windowed capture has delivered everything.
    fn check_window(&mut self) {
        if self.config.topology == Topology::Windowed && self.delivered >= self.target {
            if let Err(err) = self.clock.stop() {
                warn!("trigger stop failed: {}", err);
            }
            self.enter(State::Draining);
        }
    }

    /// Copy committed bytes into `dst`, returning how many were copied.
    ///
    /// Reports the fault if the session is in [`State::Error`]. Bytes committed before the
    /// fault are discarded by [`post_disable`](Self::post_disable).
    pub fn drain(&mut self, dst: &mut [u8]) -> Result<usize, Error> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        Ok(self.ring.drain(dst))
    }

    /// Record `err` as the session fault and stop the trigger. Returns `err`.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        error!("capture fault: {}", err);
        if self.fault.is_none() {
            self.fault = Some(err);
        }
        if let Err(stop_err) = self.clock.stop() {
            warn!("trigger stop failed: {}", stop_err);
        }
        self.enter(State::Error);
        err
    }

    /// Tear the capture down from any state: stop the trigger, abort any transfer, return the
    /// bus to non-streaming mode, release the channels and reset the ring buffer.
    ///
    /// Every step is attempted. The session always ends [`State::Idle`]; the first failure is
    /// returned.
    pub fn post_disable(&mut self) -> Result<(), Error> {
        let mut first: Option<Error> = None;
        let mut record = |step: &str, result: Result<(), Error>| {
            if let Err(err) = result {
                warn!("teardown: {} failed: {}", step, err);
                first.get_or_insert(err);
            }
        };

        record("trigger stop", self.clock.stop());
        if let Some(TransferBackend::Block(mut backend)) = self.backend.take() {
            backend.disarm(&mut self.block);
        }
        // The controller may have started even if arming failed
        if self.kind == Some(BackendKind::Block) {
            record("bus release", self.block.release().map_err(Error::from));
        }
        if self.excitation_applied {
            self.excitation_applied = false;
            record(
                "channel release",
                self.adapter.release_channels().map_err(Error::from),
            );
        }

        self.ring.reset();
        self.active_channels.clear();
        self.kind = None;
        self.requested_samples = None;
        self.target = 0;
        self.delivered = 0;
        self.watermark = 0;
        self.fault = None;
        if self.state != State::Idle {
            self.enter(State::Idle);
        }
        first.map_or(Ok(()), Err)
    }

    /// Change state and update the status LEDs.
    fn enter(&mut self, state: State) {
        debug!("capture state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.status.show(match state {
            State::Idle | State::Configuring | State::Armed => StatusLedStates::Normal,
            State::Streaming | State::Draining => StatusLedStates::Alert,
            State::Error => StatusLedStates::Error,
        });
    }
}

/// Backend waiting to be started once the ring buffer is aligned.
enum Pending {
    /// Polled backend, ready to go
    Polled(PolledBackend),
    /// Block geometry, started after alignment
    Block(BlockGeometry),
}

/// Produce one polled sample directly into the ring buffer.
fn produce_into<A, R>(
    backend: &mut PolledBackend,
    adapter: &mut A,
    ready: &mut R,
    ring: &mut RingBuffer<'_>,
    bytes_per_sample: usize,
) -> Result<Produced, Error>
where
    A: DeviceAdapter + ?Sized,
    R: ReadySignal + ?Sized,
{
    let window = ring.prepare(bytes_per_sample)?;
    let produced = backend.produce_one(adapter, ready, window)?;
    if produced == Produced::Sample {
        ring.commit(bytes_per_sample)?;
    }
    Ok(produced)
}

#[cfg(test)]
mod tests;
