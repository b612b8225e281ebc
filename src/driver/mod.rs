//! Drivers translate tie and power operations into device protocols.
//!
//! Every driver family provides a [`DriverFactory`], which describes the
//! family and loads [`Driver`] instances for a device location. Drivers open a
//! fresh stream for every operation and close it before returning, so a
//! driver instance holds no connection between calls. Overlapping calls on
//! the same instance each get their own stream and reach the device in no
//! particular order.

use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::stream::TextEncoding;
use crate::transport::{OpenOptions, TransportError, TransportOpener};

pub mod extron;
pub mod sony;
pub mod tesmart;

pub use self::extron::ExtronSis;
pub use self::sony::SonyBvm;
pub use self::tesmart::TesmartKvm;

/// Optional features of a driver family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// The device has more than one output to tie an input to.
    pub const HAS_MULTIPLE_OUTPUTS: Capabilities = Capabilities(1 << 0);
    /// Audio can be routed to a different output than video.
    pub const CAN_DECOUPLE_AUDIO_OUTPUT: Capabilities = Capabilities(1 << 1);
    /// Not tested against real hardware.
    pub const EXPERIMENTAL: Capabilities = Capabilities(1 << 2);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Capabilities {
        Capabilities(bits)
    }

    pub const fn union(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }

    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        self.union(rhs)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Capabilities) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Capabilities::HAS_MULTIPLE_OUTPUTS, "multiple-outputs"),
            (Capabilities::CAN_DECOUPLE_AUDIO_OUTPUT, "decouple-audio"),
            (Capabilities::EXPERIMENTAL, "experimental"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&set.join(","))
        }
    }
}

/// What sort of device a driver controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Switch,
    Monitor,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Switch => f.write_str("switch"),
            DriverKind::Monitor => f.write_str("monitor"),
        }
    }
}

/// Static description of a driver family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverDescriptor {
    pub guid: &'static str,
    pub title: &'static str,
    pub kind: DriverKind,
    pub capabilities: Capabilities,
}

pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The channel number cannot be expressed in the device protocol.
    #[error("Channel {0} is out of range for this device")]
    InvalidChannel(u32),
}

/// A loaded driver for one device.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The family this driver belongs to.
    fn about(&self) -> &'static DriverDescriptor;

    fn guid(&self) -> &'static str {
        self.about().guid
    }

    fn title(&self) -> &'static str {
        self.about().title
    }

    fn kind(&self) -> DriverKind {
        self.about().kind
    }

    fn capabilities(&self) -> Capabilities;

    /// The location string the driver was loaded with.
    fn location(&self) -> &str;

    /// Route `input` to the given outputs.
    ///
    /// Outputs the device does not have are ignored.
    async fn set_tie(&self, input: u32, video_output: u32, audio_output: u32) -> DriverResult<()>;

    async fn power_on(&self) -> DriverResult<()>;

    async fn power_off(&self) -> DriverResult<()>;

    /// Release anything the driver holds. May be called more than once.
    async fn unload(&self) -> DriverResult<()>;
}

/// Describes a driver family and creates its drivers.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    fn about(&self) -> &'static DriverDescriptor;

    async fn load(&self, location: &str, opener: TransportOpener) -> DriverResult<Box<dyn Driver>>;
}

/// One write to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Payload {
    Binary(Vec<u8>),
    Text(String),
}

/// Open a stream, write the payloads in order and close it again.
///
/// The stream is closed whether or not the writes succeed. A write error
/// takes precedence over an error while closing.
pub(crate) async fn transmit(
    opener: &TransportOpener,
    location: &str,
    options: &OpenOptions,
    encoding: TextEncoding,
    payloads: &[Payload],
) -> DriverResult<()> {
    let mut stream = opener.open(location, options).await?;
    stream.set_encoding(encoding);

    let mut written = Ok(());
    for payload in payloads {
        let result = match payload {
            Payload::Binary(bytes) => stream.write(bytes).await,
            Payload::Text(text) => stream.write_str(text).await,
        };
        if result.is_err() {
            written = result;
            break;
        }
    }

    let closed = stream.close().await;
    written?;
    closed?;
    debug!("Sent {} payload(s) to {}", payloads.len(), location);
    Ok(())
}

/// A channel number as a protocol byte.
pub(crate) fn channel_byte(channel: u32) -> DriverResult<u8> {
    u8::try_from(channel).map_err(|_| DriverError::InvalidChannel(channel))
}
