// SPDX-License-Identifier: Apache-2.0

use fugit::{HertzU32, NanosDurationU32};

use super::{attr::Attribute, CaptureSession, State};
use crate::{
    adapter::{Averaging, DeviceAdapter, SpiConverter, AD4052, AD4696},
    backend::{BackendKind, BlockEvent, Half},
    components::StatusLedStates,
    config::{BackendPreference, CaptureConfig, Topology},
    error::{DeviceError, Error},
    testing::{parts, MockAdapter, MockPin, MockReady, MockSpi, TestBoard},
};

type MockSession<'b> = CaptureSession<'b, MockAdapter, TestBoard>;

fn session<'b>(
    topology: Topology,
    adapter: MockAdapter,
    storage: &'b mut [u8],
    window_len: usize,
) -> MockSession<'b> {
    CaptureSession::new(CaptureConfig::new(topology), adapter, parts(window_len), storage)
}

#[test]
fn windowed_polled_three_channels_ten_samples() {
    let mut storage = [0u8; 64];
    let mut session = session(Topology::Windowed, MockAdapter::new(4, 2), &mut storage, 0);

    session.pre_enable(0b111).unwrap();
    assert_eq!(session.state(), State::Armed);
    assert_eq!(session.backend_kind(), Some(BackendKind::Polled));
    assert_eq!(session.active_channels(), &[0, 1, 2]);

    let bytes = 10 * 3 * session.bytes_per_sample();
    session.submit(bytes as u32).unwrap();
    assert_eq!(session.state(), State::Streaming);
    assert_eq!(session.requested_samples(), Some(30));
    assert!(session.clock().is_running());

    for _ in 0..30 {
        session.trigger_handler().unwrap();
    }
    assert_eq!(session.state(), State::Draining);
    assert!(!session.clock().is_running());
    // Late trigger after the window is ignored
    session.trigger_handler().unwrap();
    assert_eq!(session.adapter().reads, 30);

    let mut out = [0u8; 64];
    assert_eq!(session.drain(&mut out), Ok(bytes));
    for (index, sample) in out[..bytes].chunks(2).enumerate() {
        assert_eq!(sample, [(index % 3) as u8, (index / 3) as u8], "sample {index}");
    }
    assert_eq!(session.sample_count(), 30);

    session.post_disable().unwrap();
    assert_eq!(session.state(), State::Idle);
    assert_eq!(session.adapter().released, 1);
}

#[test]
fn samples_follow_channel_insertion_order() {
    let mut storage = [0u8; 32];
    let mut session = session(Topology::Windowed, MockAdapter::new(4, 2), &mut storage, 0);
    session.pre_enable_channels(&[2, 0]).unwrap();
    session.submit(8).unwrap();
    for _ in 0..4 {
        session.trigger_handler().unwrap();
    }
    let mut out = [0u8; 8];
    assert_eq!(session.drain(&mut out), Ok(8));
    assert_eq!(out, [2, 0, 0, 0, 2, 1, 0, 1]);
}

#[test]
fn continuous_block_read_ahead_discards_one_slot_per_half() {
    let mut adapter = MockAdapter::new(2, 2);
    adapter.read_ahead = true;
    adapter.polled_max = Some(HertzU32::kHz(10));
    let mut storage = [0u8; 32];
    let mut session = session(Topology::Continuous, adapter, &mut storage, 16);

    session.pre_enable(0b11).unwrap();
    assert_eq!(session.backend_kind(), Some(BackendKind::Block));
    session.submit(8).unwrap();
    let geometry = session.block_backend().unwrap().geometry();
    assert_eq!(geometry.slot, 2);
    assert_eq!(geometry.payload, 4);

    let halves = [
        (Half::First, BlockEvent::HalfComplete, [0xFF, 0xFF, 0, 0, 1, 0]),
        (Half::Second, BlockEvent::Complete, [0xFF, 0xFF, 0, 1, 1, 1]),
        (Half::First, BlockEvent::HalfComplete, [0xFF, 0xFF, 0, 2, 1, 2]),
    ];
    for (half, event, contents) in halves {
        session.block_controller_mut().fill(half, &contents);
        session.on_block_event(event).unwrap();
    }
    assert_eq!(session.state(), State::Streaming);
    assert_eq!(
        session.block_controller_mut().rearmed,
        vec![Half::Second, Half::First, Half::Second, Half::First]
    );

    let mut out = [0u8; 32];
    assert_eq!(session.drain(&mut out), Ok(12));
    assert_eq!(&out[..12], &[0, 0, 1, 0, 0, 1, 1, 1, 0, 2, 1, 2]);
    assert!(!out[..12].contains(&0xFF));
    assert_eq!(session.sample_count(), 6);

    session.post_disable().unwrap();
    assert!(session.block_controller_mut().aborts >= 1);
    assert_eq!(session.block_controller_mut().releases, 1);
}

#[test]
fn windowed_block_delivers_exactly_once() {
    let mut adapter = MockAdapter::new(1, 2);
    adapter.polled_max = None;
    let mut storage = [0u8; 64];
    let mut session = session(Topology::Windowed, adapter, &mut storage, 16);
    session.pre_enable(1).unwrap();
    session.submit(20).unwrap();

    let mut next = 0u8;
    let mut half = Half::First;
    let mut states = Vec::new();
    for _ in 0..3 {
        session.block_controller_mut().fill_sequence(half, &mut next);
        let event = match half {
            Half::First => BlockEvent::HalfComplete,
            Half::Second => BlockEvent::Complete,
        };
        session.on_block_event(event).unwrap();
        states.push(session.state());
        half = half.other();
    }
    assert_eq!(
        states,
        vec![State::Streaming, State::Streaming, State::Draining]
    );
    assert!(session.is_done());
    session.on_block_event(BlockEvent::Complete).unwrap();
    assert_eq!(session.available(), 20);

    let mut out = [0u8; 20];
    assert_eq!(session.drain(&mut out), Ok(20));
    let expected: Vec<u8> = (0..20).collect();
    assert_eq!(out.as_slice(), expected.as_slice());
}

#[test]
fn polled_timeout_leaves_session_in_error() {
    let mut storage = [0u8; 16];
    let mut board = parts(0);
    board.ready = MockReady::never();
    let config = CaptureConfig::new(Topology::Windowed).with_poll_budget(50);
    let mut session: MockSession =
        CaptureSession::new(config, MockAdapter::new(1, 2), board, &mut storage);

    session.pre_enable(1).unwrap();
    session.submit(2).unwrap();
    assert_eq!(session.trigger_handler(), Err(Error::Timeout));
    assert_eq!(session.ready_mut().polls, 50);
    assert_eq!(session.state(), State::Error);
    assert_eq!(session.status().last(), Some(StatusLedStates::Error));
    assert!(!session.clock().is_running());

    let mut out = [0u8; 2];
    assert_eq!(session.drain(&mut out), Err(Error::Timeout));
    session.post_disable().unwrap();
    assert_eq!(session.state(), State::Idle);
    assert_eq!(session.drain(&mut out), Ok(0));
}

#[test]
fn second_pre_enable_is_busy() {
    let mut storage = [0u8; 16];
    let mut session = session(Topology::Continuous, MockAdapter::new(2, 2), &mut storage, 0);
    session.pre_enable(0b01).unwrap();
    assert_eq!(session.pre_enable(0b10), Err(Error::Busy));
    assert_eq!(session.pre_enable_channels(&[1]), Err(Error::Busy));
    assert_eq!(session.set_topology(Topology::Windowed), Err(Error::Busy));
    assert_eq!(session.active_channels(), &[0]);
}

#[test]
fn invalid_channel_selection_is_rejected() {
    let mut storage = [0u8; 16];
    let mut session = session(Topology::Continuous, MockAdapter::new(4, 2), &mut storage, 0);
    assert_eq!(session.pre_enable(0), Err(Error::InvalidArgument));
    assert_eq!(session.pre_enable(1 << 4), Err(Error::InvalidArgument));
    assert_eq!(session.pre_enable_channels(&[]), Err(Error::InvalidArgument));
    assert_eq!(session.pre_enable_channels(&[1, 1]), Err(Error::InvalidArgument));
    assert_eq!(session.pre_enable_channels(&[4]), Err(Error::InvalidArgument));
    assert_eq!(session.state(), State::Idle);
    assert_eq!(session.adapter().applied, 0);
}

#[test]
fn submit_validates_size() {
    let mut storage = [0u8; 40];
    let mut session = session(Topology::Windowed, MockAdapter::new(2, 2), &mut storage, 0);
    assert_eq!(session.submit(4), Err(Error::InvalidState));

    session.pre_enable(0b11).unwrap();
    assert_eq!(session.submit(6), Err(Error::WouldOverflow));
    assert_eq!(session.state(), State::Error);
    session.post_disable().unwrap();

    session.pre_enable(0b11).unwrap();
    assert_eq!(session.submit(44), Err(Error::InvalidArgument));
    session.post_disable().unwrap();

    session.pre_enable(0b11).unwrap();
    assert_eq!(session.submit(0), Err(Error::InvalidArgument));
}

#[test]
fn post_disable_is_idempotent_from_every_state() {
    let mut storage = [0u8; 16];
    let mut session = session(Topology::Continuous, MockAdapter::new(1, 2), &mut storage, 0);
    session.post_disable().unwrap();
    session.post_disable().unwrap();
    assert_eq!(session.state(), State::Idle);

    session.pre_enable(1).unwrap();
    session.submit(4).unwrap();
    session.trigger_handler().unwrap();
    session.post_disable().unwrap();
    session.post_disable().unwrap();
    assert_eq!(session.adapter().released, 1);
    assert_eq!(session.clock().waveform().disables, 1);
    assert_eq!(session.available(), 0);
    assert_eq!(session.status().last(), Some(StatusLedStates::Normal));

    // And again after a fault
    session.pre_enable(1).unwrap();
    assert_eq!(session.submit(3), Err(Error::WouldOverflow));
    session.post_disable().unwrap();
    session.post_disable().unwrap();
    assert_eq!(session.state(), State::Idle);
    assert_eq!(session.adapter().released, 2);
}

#[test]
fn device_failure_mid_stream_faults_session() {
    let mut adapter = MockAdapter::new(1, 2);
    adapter.fail_after = Some(3);
    let mut storage = [0u8; 16];
    let mut session = session(Topology::Continuous, adapter, &mut storage, 0);
    session.pre_enable(1).unwrap();
    session.submit(2).unwrap();
    for _ in 0..3 {
        session.trigger_handler().unwrap();
    }
    assert_eq!(
        session.trigger_handler(),
        Err(Error::DeviceIo(DeviceError::Bus))
    );
    assert_eq!(session.state(), State::Error);
    assert_eq!(session.trigger_handler(), Err(Error::InvalidState));
}

#[test]
fn continuous_overrun_reports_would_overflow() {
    let mut storage = [0u8; 8];
    let mut session = session(Topology::Continuous, MockAdapter::new(1, 2), &mut storage, 0);
    session.pre_enable(1).unwrap();
    session.submit(4).unwrap();
    for _ in 0..4 {
        session.trigger_handler().unwrap();
    }
    assert!(session.drain_ready());
    assert_eq!(session.trigger_handler(), Err(Error::WouldOverflow));
    assert_eq!(session.available(), 8);
    assert_eq!(session.fault(), Some(Error::WouldOverflow));
}

#[test]
fn capture_window_runs_to_completion() {
    let mut storage = [0u8; 32];
    let mut session = session(Topology::Windowed, MockAdapter::new(2, 2), &mut storage, 0);
    session.pre_enable(0b11).unwrap();
    session.submit(12).unwrap();
    session.capture_window().unwrap();
    assert_eq!(session.state(), State::Draining);
    assert_eq!(session.available(), 12);
}

#[test]
fn capture_window_requires_windowed_polled() {
    let mut storage = [0u8; 32];
    let mut session = session(Topology::Continuous, MockAdapter::new(1, 2), &mut storage, 0);
    session.pre_enable(1).unwrap();
    session.submit(4).unwrap();
    assert_eq!(session.capture_window(), Err(Error::InvalidState));
}

#[test]
fn sampling_rate_attribute_is_clamped() {
    let mut storage = [0u8; 16];
    let mut session = session(Topology::Continuous, MockAdapter::new(1, 2), &mut storage, 0);
    assert_eq!(session.read_attr(Attribute::SamplingRate), Ok(100_000));
    // No DMA window: polled is the only backend, capped at 100 kHz
    assert_eq!(
        session.write_attr(Attribute::SamplingRate, 250_000),
        Ok(100_000)
    );
    assert_eq!(session.read_attr(Attribute::SamplingRate), Ok(100_000));
    assert_eq!(
        session.write_attr(Attribute::SamplingRate, 0),
        Err(Error::InvalidArgument)
    );
    assert_eq!(
        session.read_attr(Attribute::FilterLength),
        Err(Error::DeviceIo(DeviceError::Unsupported))
    );

    session.pre_enable(1).unwrap();
    session.submit(2).unwrap();
    assert_eq!(
        session.write_attr(Attribute::SamplingRate, 1_000),
        Err(Error::Busy)
    );
}

#[test]
fn fast_rate_switches_to_block_backend() {
    let mut storage = [0u8; 16];
    let mut session = session(Topology::Continuous, MockAdapter::new(1, 2), &mut storage, 16);
    // 1 MHz ticks, 3.5 us capture overhead: 4 ticks minimum
    assert_eq!(
        session.write_attr(Attribute::SamplingRate, 250_000),
        Ok(250_000)
    );
    session.pre_enable(1).unwrap();
    assert_eq!(session.backend_kind(), Some(BackendKind::Block));
}

#[test]
fn averaging_attributes_bound_the_rate() {
    let mut storage = [0u8; 16];
    let adc = SpiConverter::new(MockSpi::default(), MockPin::default(), &AD4052);
    let mut session: CaptureSession<_, TestBoard> = CaptureSession::new(
        CaptureConfig::new(Topology::Continuous),
        adc,
        parts(64),
        &mut storage,
    );
    assert_eq!(
        session.write_attr(Attribute::FilterLength, 16),
        Err(Error::DeviceIo(DeviceError::Unsupported))
    );

    assert_eq!(session.write_attr(Attribute::OperatingMode, 1), Ok(1));
    assert_eq!(session.write_attr(Attribute::FilterLength, 16), Ok(16));
    // (15 / 2 MHz + 250 ns) * 1.1 + 3.5 us = 12.025 us -> 13 ticks
    assert_eq!(
        session.read_attr(Attribute::SamplingRate),
        Ok(1_000_000 / 13)
    );

    assert_eq!(session.write_attr(Attribute::FilterLength, 4096), Ok(4096));
    // 4096 conversions at 1 MHz would exceed the 2.5 ms ceiling
    assert_eq!(
        session.write_attr(Attribute::BurstRate, 1_000_000),
        Ok(2_000_000)
    );
    assert_eq!(session.read_attr(Attribute::BurstRate), Ok(2_000_000));
    assert_eq!(
        session.read_attr(Attribute::SamplingRate),
        Ok(1_000_000 / 2257)
    );
}

#[test]
fn saturated_conversion_time_is_never_selected() {
    let mut storage = [0u8; 16];
    let mut adc = SpiConverter::new(MockSpi::default(), MockPin::default(), &AD4052);
    adc.set_operating_mode(1).unwrap();
    adc.set_averaging(Averaging {
        filter_length: 4096,
        burst_rate: 111,
    })
    .unwrap();
    let mut session: CaptureSession<_, TestBoard> = CaptureSession::new(
        CaptureConfig::new(Topology::Continuous),
        adc,
        parts(64),
        &mut storage,
    );
    assert_eq!(
        session.clock().min_period(),
        NanosDurationU32::from_ticks(u32::MAX)
    );
    assert_eq!(session.write_attr(Attribute::BurstRate, 111), Ok(2_000_000));
}

#[test]
fn slow_rate_request_clamps_to_timer_range() {
    let mut storage = [0u8; 16];
    let mut board = parts(0);
    board.waveform.max_ticks = 1 << 16;
    let mut session: MockSession = CaptureSession::new(
        CaptureConfig::new(Topology::Continuous),
        MockAdapter::new(1, 2),
        board,
        &mut storage,
    );
    assert_eq!(session.write_attr(Attribute::SamplingRate, 10), Ok(15));
    session.pre_enable(1).unwrap();
    assert_eq!(session.state(), State::Armed);
    assert_eq!(session.clock().waveform().period_ticks, 1 << 16);
}

#[test]
fn rejected_rate_keeps_previous_request() {
    let mut storage = [0u8; 16];
    let mut board = parts(0);
    // Shorter than the 10 us minimum period at 100 kHz
    board.waveform.max_ticks = 2;
    let mut session: MockSession = CaptureSession::new(
        CaptureConfig::new(Topology::Continuous),
        MockAdapter::new(1, 2),
        board,
        &mut storage,
    );
    assert_eq!(
        session.write_attr(Attribute::SamplingRate, 50_000),
        Err(Error::InvalidPeriod)
    );
    assert_eq!(session.read_attr(Attribute::SamplingRate), Ok(100_000));
}

#[test]
fn min_period_follows_backend_max_rate() {
    let mut storage = [0u8; 16];
    let mut session = session(Topology::Continuous, MockAdapter::new(1, 2), &mut storage, 0);
    session.pre_enable(1).unwrap();
    // 100 kHz polled maximum outweighs the 3.5 us capture overhead
    assert_eq!(
        session.clock().min_period(),
        NanosDurationU32::micros(10)
    );
}

#[test]
fn failed_block_arm_still_releases_bus() {
    let mut adapter = MockAdapter::new(1, 2);
    adapter.polled_max = None;
    let mut storage = [0u8; 16];
    let mut board = parts(16);
    board.block.fail_rearm = true;
    let mut session: MockSession = CaptureSession::new(
        CaptureConfig::new(Topology::Continuous),
        adapter,
        board,
        &mut storage,
    );
    session.pre_enable(1).unwrap();
    assert_eq!(session.backend_kind(), Some(BackendKind::Block));
    assert_eq!(session.submit(4), Err(Error::DeviceIo(DeviceError::Bus)));
    assert_eq!(session.state(), State::Error);

    session.post_disable().unwrap();
    session.post_disable().unwrap();
    let block = session.block_controller_mut();
    assert_eq!(block.starts, 1);
    assert!(block.aborts >= 1);
    assert_eq!(block.releases, 1);
}

#[test]
fn operating_mode_rolls_back_when_backend_unavailable() {
    let mut storage = [0u8; 64];
    let adc = SpiConverter::new(MockSpi::default(), MockPin::default(), &AD4696);
    let config = CaptureConfig::new(Topology::Continuous)
        .with_backend(BackendPreference::Block);
    let mut session: CaptureSession<_, TestBoard> =
        CaptureSession::new(config, adc, parts(64), &mut storage);

    // Only mode 1 supports block transfers
    assert_eq!(session.write_attr(Attribute::OperatingMode, 1), Ok(1));
    session.pre_enable(1).unwrap();
    assert_eq!(session.backend_kind(), Some(BackendKind::Block));

    assert_eq!(
        session.write_attr(Attribute::OperatingMode, 0),
        Err(Error::DeviceIo(DeviceError::Unsupported))
    );
    assert_eq!(session.adapter().operating_mode(), 1);
    assert_eq!(session.backend_kind(), Some(BackendKind::Block));
    assert_eq!(session.read_attr(Attribute::SamplingRate), Ok(100_000));
}

#[test]
fn oversized_samples_are_rejected() {
    let mut storage = [0u8; 32];
    let mut session = session(Topology::Windowed, MockAdapter::new(1, 9), &mut storage, 0);
    assert_eq!(session.pre_enable(1), Err(Error::InvalidArgument));
    assert_eq!(session.adapter().applied, 0);
    session.post_disable().unwrap();
}

#[test]
fn sampling_rate_reads_what_the_trigger_produces() {
    let mut storage = [0u8; 16];
    let config = CaptureConfig::new(Topology::Continuous)
        .with_sampling_rate(HertzU32::kHz(300));
    let session: MockSession =
        CaptureSession::new(config, MockAdapter::new(1, 2), parts(16), &mut storage);
    // Block backend, 3.5 us minimum period: 4 ticks at 1 MHz
    assert_eq!(session.read_attr(Attribute::SamplingRate), Ok(250_000));
    assert_eq!(session.clock().rate(), HertzU32::kHz(250));
}
