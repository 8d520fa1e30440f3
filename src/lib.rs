//! Triggered streaming acquisition for data-converter evaluation boards. A periodic hardware
//! trigger starts conversions, a transfer backend moves each result into a ring buffer, and a
//! host-facing shell (the "Control Port") drains the bytes through a small lifecycle API:
//! [`pre_enable`](session::CaptureSession::pre_enable),
//! [`submit`](session::CaptureSession::submit) and
//! [`post_disable`](session::CaptureSession::post_disable).
//!
//! The library is `no_std` and hardware-agnostic. Board peripherals are reached through the
//! traits in [`trigger`], [`backend`] and [`components`]; converters through
//! [`adapter::DeviceAdapter`].
//!
//! ## Crate features
//!
//! - `triple_status`: Shows the capture status on 3 separate LEDs. Enabled by default.
//! - `rgba_status`: Alternate configuration which uses a single common-anode RGB LED.
//! - `windowed_capture`: The firmware captures fixed windows instead of a continuous stream.
//! - `defmt`: Logs through [defmt](https://docs.rs/defmt) instead of the `log` facade.
//! - `rp2040`: [RP2040](https://docs.rs/rp2040-hal) bindings ([`rp2040`] module) and the
//!   firmware binary. Implies `defmt`.
//! - `trace_indiv_samples`: Logs every committed sample. Very noisy!
//!
//! <div class="warning">Features <code>triple_status</code> and <code>rgba_status</code> are
//! mutually exclusive.</div>
//!
//! ## Demo
//!
//! A windowed capture of 10 scans over 3 channels, serviced from the foreground:
//!
//! ```ignore
//! use evb_stream::{
//!     adapter::{SpiConverter, AD4696},
//!     backend::{NoBlock, ReadyPin},
//!     config::{CaptureConfig, Topology},
//!     session::{BoardParts, CaptureSession},
//! };
//!
//! let adc = SpiConverter::new(spi, cs, &AD4696);
//! let parts = BoardParts {
//!     waveform: trigger,
//!     block: NoBlock,
//!     ready: ReadyPin::new(busy, PinState::Low),
//!     status: leds,
//! };
//! let mut session: CaptureSession<_, EvalBoard> =
//!     CaptureSession::new(CaptureConfig::new(Topology::Windowed), adc, parts, storage);
//!
//! session.pre_enable(0b111)?;
//! session.submit(10 * 3 * 2)?;
//! session.capture_window()?;
//! let n = session.drain(&mut host_buffer)?;
//! session.post_disable()?;
//! ```

// Copyright 2024 Cameron Rodriguez
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), feature(doc_auto_cfg), feature(doc_cfg_hide))]

#[macro_use]
mod fmt;

pub mod adapter;
pub mod backend;
pub mod buffer;
pub mod components;
pub mod config;
pub mod error;
pub mod interrupt;
#[cfg(feature = "rp2040")]
pub mod rp2040;
pub mod session;
pub mod trigger;

#[cfg(test)]
mod testing;

pub use error::{DeviceError, Error};

#[cfg(all(feature = "triple_status", feature = "rgba_status"))]
compile_error!("Features `triple_status` and `rgba_status` cannot be enabled at the same time in crate evb_stream");
