//! Evaluation board firmware: streams converter samples captured on every PWM trigger edge.
#![no_std]
#![no_main]
#![doc(html_playground_url = "https://play.rust-lang.org/")]
#![warn(missing_docs)]

use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
use defmt_rtt as _;
use embedded_hal::{digital::PinState, spi::MODE_3};
#[allow(unused_imports)]
use panic_probe as _;
use rp2040_hal::{
    clocks::init_clocks_and_plls,
    entry,
    fugit::RateExtU32,
    gpio::{
        bank0::{Gpio10, Gpio11, Gpio12, Gpio13, Gpio14, Gpio6, Gpio7, Gpio8},
        FunctionSioInput, FunctionSioOutput, FunctionSpi, Interrupt, Pin, Pins, PullDown,
        PullUp,
    },
    pac::{self, interrupt},
    prelude::*,
    pwm::{Pwm3, Slices},
    spi::Enabled,
    Sio, Spi, Watchdog,
};

#[cfg(feature = "rgba_status")]
use evb_stream::components::RgbaLed;
#[cfg(feature = "triple_status")]
use evb_stream::components::TripleLeds;
use evb_stream::{
    adapter::{SpiConverter, AD4696},
    backend::{NoBlock, ReadyPin},
    config::{CaptureConfig, Topology, DRAIN_POLL_BUDGET},
    interrupt::SharedSession,
    rp2040::{capture_storage, PwmTrigger},
    session::{Board, BoardParts, CaptureSession},
    Error,
};

/// Second-stage bootloader, from [rp2040-boot2](https://docs.rs/rp2040-boot2)
#[link_section = ".boot2"]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
/// External high-speed crystal on the pico board is 12Mhz
pub const XOSC_FREQ_HZ: u32 = 12_000_000;
/// PWM counter runs at 1 MHz: 1 us trigger resolution, periods up to 65 ms
pub const TRIGGER_TICK_HZ: u32 = 1_000_000;
/// Channels 0-2
const CHANNEL_MASK: u32 = 0b111;
/// Bytes per `submit`: the window size, or the drain watermark when continuous
const REQUEST_BYTES: u32 = 3 * 2 * 256;

/// Converter BUSY line, low when a result is ready
type BusyPin = Pin<Gpio14, FunctionSioInput, PullUp>;
/// SPI1 pinout (MOSI, MISO, SCK)
type SpiPins = (
    Pin<Gpio11, FunctionSpi, PullDown>,
    Pin<Gpio12, FunctionSpi, PullDown>,
    Pin<Gpio10, FunctionSpi, PullDown>,
);
/// Converter on SPI1
type Converter =
    SpiConverter<Spi<Enabled, pac::SPI1, SpiPins, 8>, Pin<Gpio13, FunctionSioOutput, PullDown>>;
/// LED pin driven by the status indicator
type LedPin<I> = Pin<I, FunctionSioOutput, PullDown>;
#[cfg(feature = "triple_status")]
/// Status LEDs
type StatusLeds = TripleLeds<LedPin<Gpio6>, LedPin<Gpio7>, LedPin<Gpio8>>;
#[cfg(feature = "rgba_status")]
/// Status LEDs
type StatusLeds = RgbaLed<LedPin<Gpio6>, LedPin<Gpio7>, LedPin<Gpio8>>;

/// Evaluation board wiring
struct EvalBoard;

impl Board for EvalBoard {
    type Waveform = PwmTrigger<Pwm3>;
    type Block = NoBlock;
    type Ready = ReadyPin<BusyPin>;
    type Status = StatusLeds;
}

/// Capture session shared with the BUSY interrupt
static SESSION: SharedSession<CaptureSession<'static, Converter, EvalBoard>> =
    SharedSession::new();

/// Main operation loop
#[entry]
fn main() -> ! {
    info!("Evaluation board startup");
    let mut pac = pac::Peripherals::take().unwrap();
    let _core = pac::CorePeripherals::take().unwrap();
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let sio = Sio::new(pac.SIO);

    let clocks = init_clocks_and_plls(
        XOSC_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();
    let pins = Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    // Setup status LEDs
    let status = StatusLeds::new(
        pins.gpio6.into_push_pull_output(),
        pins.gpio7.into_push_pull_output(),
        pins.gpio8.into_push_pull_output(),
    );

    // Conversion trigger on GPIO22 (PWM3 A)
    let mut pwm_slices = Slices::new(pac.PWM, &mut pac.RESETS);
    pwm_slices.pwm3.channel_a.output_to(pins.gpio22);
    let sys_freq = clocks.system_clock.freq();
    let divider = (sys_freq.to_Hz() / TRIGGER_TICK_HZ).clamp(1, u32::from(u8::MAX)) as u8;
    let trigger = PwmTrigger::new(pwm_slices.pwm3, sys_freq, divider);

    // Converter on SPI1, BUSY on GPIO14
    let spi_pins: SpiPins = (
        pins.gpio11.into_function(),
        pins.gpio12.into_function(),
        pins.gpio10.into_function(),
    );
    let spi = Spi::<_, _, _, 8>::new(pac.SPI1, spi_pins).init(
        &mut pac.RESETS,
        clocks.peripheral_clock.freq(),
        10.MHz(),
        MODE_3,
    );
    let cs = pins.gpio13.into_push_pull_output_in_state(PinState::High);
    let busy: BusyPin = pins.gpio14.into_pull_up_input();
    busy.set_interrupt_enabled(Interrupt::EdgeLow, true);

    let topology = if cfg!(feature = "windowed_capture") {
        Topology::Windowed
    } else {
        Topology::Continuous
    };
    let parts = BoardParts {
        waveform: trigger,
        block: NoBlock,
        ready: ReadyPin::new(busy, PinState::Low),
        status,
    };
    let session = CaptureSession::new(
        CaptureConfig::new(topology),
        SpiConverter::new(spi, cs, &AD4696),
        parts,
        capture_storage().unwrap(),
    );
    SESSION.install(session);

    start_capture();
    unsafe { pac::NVIC::unmask(pac::Interrupt::IO_IRQ_BANK0) }

    let mut chunk = [0u8; 192];
    loop {
        match SESSION.drain_until(&mut chunk, DRAIN_POLL_BUDGET) {
            Ok(0) => {
                if SESSION.with(|session| session.is_done()).unwrap_or(false) {
                    debug!("window drained, rearming");
                    restart_capture();
                }
            }
            Ok(n) => info!("{=usize} bytes: {=[u8]:x}", n, &chunk[..n]),
            Err(err) => {
                error!("Capture stopped: {}", err);
                restart_capture();
            }
        }
    }
}

/// Enable channels and submit a capture request.
fn start_capture() {
    let started = SESSION
        .with(|session| {
            session.pre_enable(CHANNEL_MASK)?;
            session.submit(REQUEST_BYTES)
        })
        .unwrap_or(Err(Error::InvalidState));
    if let Err(err) = started {
        error!("Unable to start capture: {}", err);
    }
}

/// Tear down the current capture and start a new one.
fn restart_capture() {
    if let Some(Err(err)) = SESSION.with(|session| session.post_disable()) {
        warn!("Teardown reported: {}", err);
    }
    start_capture();
}

/// Converter BUSY falling edge: a conversion result is ready.
#[interrupt]
fn IO_IRQ_BANK0() {
    SESSION.with(|session| {
        session
            .ready_mut()
            .pin_mut()
            .clear_interrupt(Interrupt::EdgeLow);
        // Faults are recorded in the session and reported by the next drain
        let _ = session.trigger_handler();
    });
}
