// SPDX-License-Identifier: Apache-2.0

//! Capture configuration and platform constants.

use fugit::{HertzU32, NanosDurationU32};

use crate::trigger::Polarity;

/// Iterations spent polling the ready signal before a sample read gives up with
/// [`Timeout`](crate::error::Error::Timeout).
///
/// This is a loop count, not a duration: the wall-clock timeout scales with the CPU clock
/// (roughly 36 s at 125 MHz with the default budget).
pub const READY_POLL_BUDGET: u32 = 0xffff_ffff;

/// Iterations [`SharedSession::drain_until`](crate::interrupt::SharedSession::drain_until)
/// spins waiting for committed bytes.
pub const DRAIN_POLL_BUDGET: u32 = 0xffff_ffff;

/// Most channels a single scan can include
pub const MAX_CHANNELS: usize = 32;

/// Widest single-channel sample, in bytes
pub const MAX_SAMPLE_WIDTH: usize = 8;

/// Longest trigger period the platform accepts. Attribute settings whose conversion time would
/// exceed it are never selected.
pub const MAX_SAMPLING_PERIOD: NanosDurationU32 = NanosDurationU32::from_ticks(2_500_000);

/// Time spent capturing one sample and servicing its interrupt, added to the conversion time
/// when computing the shortest trigger period.
pub const CAPTURE_OVERHEAD: NanosDurationU32 = NanosDurationU32::from_ticks(3_500);

/// Trigger rate programmed by [`CaptureConfig::new`]
pub const DEFAULT_SAMPLING_RATE: HertzU32 = HertzU32::from_raw(100_000);

/// Trigger high time as a percentage of the period
pub const DEFAULT_DUTY_PERCENT: u8 = 10;

/// Shape of a capture.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Topology {
    /// Bounded burst of a fixed number of samples
    Windowed,
    /// Unbounded stream until the session is torn down
    #[default]
    Continuous,
}

/// Which transfer backend a session should use.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BackendPreference {
    /// Polled when the adapter can sustain the rate that way, otherwise block transfers
    #[default]
    Auto,
    /// Always poll the ready signal
    Polled,
    /// Always use block transfers
    Block,
}

/// Runtime settings of a [`CaptureSession`](crate::session::CaptureSession).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Windowed or continuous capture
    pub topology: Topology,
    /// Backend selection policy
    pub backend: BackendPreference,
    /// Rate requested when the session is created
    pub sampling_rate: HertzU32,
    /// Trigger high time in percent
    pub duty_percent: u8,
    /// Trigger polarity
    pub polarity: Polarity,
    /// Ready-signal polling budget
    pub poll_budget: u32,
    /// Drain spin budget
    pub drain_budget: u32,
    /// Period ceiling for the closest-match search
    pub max_sampling_period: NanosDurationU32,
    /// Per-sample capture overhead
    pub capture_overhead: NanosDurationU32,
}

impl CaptureConfig {
    /// Configuration with the platform defaults for `topology`.
    pub const fn new(topology: Topology) -> Self {
        Self {
            topology,
            backend: BackendPreference::Auto,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            duty_percent: DEFAULT_DUTY_PERCENT,
            polarity: Polarity::ActiveHigh,
            poll_budget: READY_POLL_BUDGET,
            drain_budget: DRAIN_POLL_BUDGET,
            max_sampling_period: MAX_SAMPLING_PERIOD,
            capture_overhead: CAPTURE_OVERHEAD,
        }
    }

    /// Select the backend policy.
    pub const fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Set the initial sampling rate.
    pub const fn with_sampling_rate(mut self, rate: HertzU32) -> Self {
        self.sampling_rate = rate;
        self
    }

    /// Set the trigger duty cycle and polarity.
    pub const fn with_trigger(mut self, duty_percent: u8, polarity: Polarity) -> Self {
        self.duty_percent = duty_percent;
        self.polarity = polarity;
        self
    }

    /// Set the ready-signal polling budget.
    pub const fn with_poll_budget(mut self, budget: u32) -> Self {
        self.poll_budget = budget;
        self
    }

    /// Set the drain spin budget.
    pub const fn with_drain_budget(mut self, budget: u32) -> Self {
        self.drain_budget = budget;
        self
    }

    /// Set the trigger period ceiling.
    pub const fn with_max_sampling_period(mut self, period: NanosDurationU32) -> Self {
        self.max_sampling_period = period;
        self
    }

    /// Set the per-sample capture overhead.
    pub const fn with_capture_overhead(mut self, overhead: NanosDurationU32) -> Self {
        self.capture_overhead = overhead;
        self
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new(Topology::Continuous)
    }
}
