//! Onboard runtime for a paired ambient-light lamp.
//!
//! Two lamps share a publish/subscribe link; a touch gesture on either unit
//! drives a matching light response on both. This crate is the pure logic of
//! one unit: gesture detection, the lighting mode machine with peer-color
//! blending, the animation engine and the network session keeper, all wired
//! together by a cooperative multi-rate scheduler.
//!
//! Hardware and transport live behind the traits in [`ports`], so everything
//! here runs (and is tested) on the host. The ESP32 shell that adapts those
//! ports onto real peripherals is gated behind the `esp-hal-runtime` feature.

#![cfg_attr(not(test), no_std)]
#![deny(unused_must_use)]

pub mod color;
pub mod config;
pub mod lamp;
pub mod link;
pub mod ports;
pub mod render;
pub mod scheduler;
pub mod status;
pub mod touch;

#[cfg(feature = "esp-hal-runtime")]
pub mod firmware;
