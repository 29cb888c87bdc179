//! dfu-server library
//!
//! Exposes `dfu-util` device operations and USB hot-plug notifications to
//! HTTP clients. The binary in `main.rs` wires these modules together; they
//! are public so integration tests can drive them directly.

pub mod config;
pub mod dfu;
pub mod http;
pub mod images;
pub mod usb;
