// SPDX-License-Identifier: Apache-2.0

//! Status LED drivers

use embedded_hal::digital::{OutputPin, PinState};

/// All states for LEDs
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusLedStates {
    /// Green, idle or armed
    Normal,
    /// Yellow, capture in progress
    Alert,
    /// Red, capture fault
    Error,
    /// None illuminated
    Disabled,
}

/// Something that can display the capture status.
pub trait StatusIndicator {
    /// Show `state`. Pin failures are logged, never returned.
    fn show(&mut self, state: StatusLedStates);
}

/// Boards without status LEDs
impl StatusIndicator for () {
    fn show(&mut self, _state: StatusLedStates) {}
}

/// Drive `pin` to `on`, logging a failure.
fn drive<P: OutputPin>(pin: &mut P, on: PinState, name: &str) {
    if pin.set_state(on).is_err() {
        warn!("Unable to drive {} status LED", name);
    }
}

/// Controls the status LEDs on separate pins (active high)
pub struct TripleLeds<N, A, E> {
    /// Current LED state
    state: StatusLedStates,
    /// Green LED
    normal_led: N,
    /// Yellow LED
    alert_led: A,
    /// Red LED
    error_led: E,
}

impl<N: OutputPin, A: OutputPin, E: OutputPin> TripleLeds<N, A, E> {
    /// Take the three pins, starting with every LED off.
    pub fn new(normal_led: N, alert_led: A, error_led: E) -> Self {
        let mut leds = Self {
            state: StatusLedStates::Disabled,
            normal_led,
            alert_led,
            error_led,
        };
        leds.show(StatusLedStates::Disabled);
        leds
    }

    /// State last shown
    pub fn state(&self) -> StatusLedStates {
        self.state
    }
}

impl<N: OutputPin, A: OutputPin, E: OutputPin> StatusIndicator for TripleLeds<N, A, E> {
    fn show(&mut self, state: StatusLedStates) {
        let lit = |target: StatusLedStates| PinState::from(state == target);
        drive(&mut self.normal_led, lit(StatusLedStates::Normal), "normal");
        drive(&mut self.alert_led, lit(StatusLedStates::Alert), "alert");
        drive(&mut self.error_led, lit(StatusLedStates::Error), "error");
        self.state = state;
    }
}

/// Controls a single common-anode RGB LED: a channel is lit when its pin is low.
pub struct RgbaLed<R, G, B> {
    /// Current LED state
    state: StatusLedStates,
    /// Red cathode
    red: R,
    /// Green cathode
    green: G,
    /// Blue cathode
    blue: B,
}

impl<R: OutputPin, G: OutputPin, B: OutputPin> RgbaLed<R, G, B> {
    /// Take the three cathode pins, starting dark.
    pub fn new(red: R, green: G, blue: B) -> Self {
        let mut led = Self {
            state: StatusLedStates::Disabled,
            red,
            green,
            blue,
        };
        led.show(StatusLedStates::Disabled);
        led
    }

    /// State last shown
    pub fn state(&self) -> StatusLedStates {
        self.state
    }
}

impl<R: OutputPin, G: OutputPin, B: OutputPin> StatusIndicator for RgbaLed<R, G, B> {
    fn show(&mut self, state: StatusLedStates) {
        // (red, green) lit; yellow mixes both
        let (red, green) = match state {
            StatusLedStates::Normal => (false, true),
            StatusLedStates::Alert => (true, true),
            StatusLedStates::Error => (true, false),
            StatusLedStates::Disabled => (false, false),
        };
        drive(&mut self.red, PinState::from(!red), "red");
        drive(&mut self.green, PinState::from(!green), "green");
        drive(&mut self.blue, PinState::High, "blue");
        self.state = state;
    }
}
