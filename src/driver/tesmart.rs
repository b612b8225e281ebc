//! TESmart KVM switches.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    channel_byte, transmit, Capabilities, Driver, DriverDescriptor, DriverFactory, DriverKind,
    DriverResult, Payload,
};
use crate::stream::TextEncoding;
use crate::transport::{OpenOptions, TransportOpener};

pub static ABOUT: DriverDescriptor = DriverDescriptor {
    guid: "91D5BC95-A8E2-4F58-BCAC-A77BA1054D61",
    title: "TESmart KVM-compatible switch",
    kind: DriverKind::Switch,
    capabilities: Capabilities::NONE,
};

/// The switches listen on this port instead of telnet.
pub const TCP_PORT: u16 = 5000;

pub struct TesmartFactory;

#[async_trait]
impl DriverFactory for TesmartFactory {
    fn about(&self) -> &'static DriverDescriptor {
        &ABOUT
    }

    async fn load(&self, location: &str, opener: TransportOpener) -> DriverResult<Box<dyn Driver>> {
        Ok(Box::new(TesmartKvm::new(location, opener)))
    }
}

/// Input selection frame: `AA BB 03 01 <input> EE`.
fn select_input(input: u8) -> Vec<u8> {
    vec![0xAA, 0xBB, 0x03, 0x01, input, 0xEE]
}

pub struct TesmartKvm {
    location: String,
    opener: TransportOpener,
    options: OpenOptions,
}

impl TesmartKvm {
    pub fn new(location: &str, opener: TransportOpener) -> TesmartKvm {
        debug!("Loading {} @ {}", ABOUT.title, location);
        TesmartKvm {
            location: location.to_string(),
            opener,
            options: OpenOptions::default().with_port(TCP_PORT),
        }
    }
}

#[async_trait]
impl Driver for TesmartKvm {
    fn about(&self) -> &'static DriverDescriptor {
        &ABOUT
    }

    fn capabilities(&self) -> Capabilities {
        ABOUT.capabilities
    }

    fn location(&self) -> &str {
        &self.location
    }

    /// A KVM has one output; only `input` matters.
    async fn set_tie(&self, input: u32, _video_output: u32, _audio_output: u32) -> DriverResult<()> {
        let input = channel_byte(input)?;
        info!("[tesmart] {}: select input {}", self.location, input);
        transmit(
            &self.opener,
            &self.location,
            &self.options,
            TextEncoding::default(),
            &[Payload::Binary(select_input(input))],
        )
        .await
    }

    async fn power_on(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn power_off(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn unload(&self) -> DriverResult<()> {
        debug!("Unloading {} @ {}", ABOUT.title, self.location);
        Ok(())
    }
}
