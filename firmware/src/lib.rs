//! Firmware core of an open-source sim-racing wheel / button box.
//!
//! The crate aggregates many kinds of driver inputs (buttons, rotary
//! encoders, analog clutch paddles, directional pads, coded rotary
//! switches, shift registers, GPIO expanders, analog multiplexers),
//! transforms them through a configurable logical pipeline, and
//! exposes the result as a standard game-controller HID device, plus
//! feature and output reports for configuration, telemetry and LED
//! control.
//!
//! Hardware specifics stay behind narrow collaborator interfaces: the
//! [`hal::Hal`] trait for pins and buses, [`transport::HidTransport`]
//! for the BLE/USB stack, [`pixels::PixelControl`] for LED strips and
//! [`power::PowerSwitch`] for the power latch. Device definitions
//! configure a [`SimWheel`], obtain a validated [`Device`] and run it;
//! tests drive the very same pipeline with the fakes in [`testing`].

pub mod battery;
pub mod drivers;
pub mod error;
pub mod events;
mod firmware;
pub mod gpio;
pub mod hal;
pub mod hid;
mod hub;
pub mod inputmap;
pub mod inputs;
pub mod pixels;
pub mod power;
pub mod settings;
pub mod testing;
pub mod transport;
pub mod types;
pub mod ui;

pub use firmware::{ButtonMatrix, Device, MultiplexerChip, RunningDevice, Services, SimWheel};
pub use hub::InputHub;
