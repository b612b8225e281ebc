//! Drivers for audio/video switches and monitors controlled over serial
//! ports or TCP.
//!
//! A [`Registry`] knows every driver family by GUID. Loading a driver for a
//! device location gives a [`Driver`] that sets ties and power state, opening
//! a [`CommandStream`] through the [`transport`] layer for every operation.

pub mod config;
pub mod driver;
pub mod error;
pub mod location;
pub mod protocol;
pub mod registry;
pub mod stream;
pub mod transport;

pub use crate::driver::{Capabilities, Driver, DriverDescriptor, DriverFactory, DriverKind};
pub use crate::error::{Error, Result};
pub use crate::location::DeviceLocation;
pub use crate::registry::Registry;
pub use crate::stream::CommandStream;
