//! Extron matrix switchers using the Simple Instruction Set (SIS).

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    transmit, Capabilities, Driver, DriverDescriptor, DriverFactory, DriverKind, DriverResult,
    Payload,
};
use crate::stream::TextEncoding;
use crate::transport::{OpenOptions, TransportOpener};

pub static ABOUT: DriverDescriptor = DriverDescriptor {
    guid: "4C8F2838-C91D-431E-84DD-3666D14A6E2C",
    title: "Extron SIS-compatible matrix switch",
    kind: DriverKind::Switch,
    capabilities: Capabilities::HAS_MULTIPLE_OUTPUTS.union(Capabilities::CAN_DECOUPLE_AUDIO_OUTPUT),
};

pub struct ExtronFactory;

#[async_trait]
impl DriverFactory for ExtronFactory {
    fn about(&self) -> &'static DriverDescriptor {
        &ABOUT
    }

    async fn load(&self, location: &str, opener: TransportOpener) -> DriverResult<Box<dyn Driver>> {
        Ok(Box::new(ExtronSis::new(location, opener)))
    }
}

/// `{input}*{output}%` ties video, `{input}*{output}$` ties audio.
fn tie_commands(input: u32, video_output: u32, audio_output: u32) -> [String; 2] {
    [
        format!("{}*{}%\r\n", input, video_output),
        format!("{}*{}$\r\n", input, audio_output),
    ]
}

/// Drives a matrix switch at 9600-8-N-1 or over telnet on port 23.
pub struct ExtronSis {
    location: String,
    opener: TransportOpener,
    options: OpenOptions,
}

impl ExtronSis {
    pub fn new(location: &str, opener: TransportOpener) -> ExtronSis {
        debug!("Loading {} @ {}", ABOUT.title, location);
        ExtronSis {
            location: location.to_string(),
            opener,
            options: OpenOptions::default(),
        }
    }
}

#[async_trait]
impl Driver for ExtronSis {
    fn about(&self) -> &'static DriverDescriptor {
        &ABOUT
    }

    fn capabilities(&self) -> Capabilities {
        ABOUT.capabilities
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn set_tie(&self, input: u32, video_output: u32, audio_output: u32) -> DriverResult<()> {
        info!(
            "[extron] {}: tie {} -> video {}, audio {}",
            self.location, input, video_output, audio_output
        );
        let payloads: Vec<Payload> = tie_commands(input, video_output, audio_output)
            .into_iter()
            .map(Payload::Text)
            .collect();
        transmit(
            &self.opener,
            &self.location,
            &self.options,
            TextEncoding::Ascii,
            &payloads,
        )
        .await
    }

    /// Matrix switches stay powered; nothing to send.
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
