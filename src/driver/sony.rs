//! Sony BVM D-series and compatible monitors on an RS-485 control bus.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    channel_byte, transmit, Capabilities, Driver, DriverDescriptor, DriverFactory, DriverKind,
    DriverResult, Payload,
};
use crate::protocol::sony::{Address, Command, CommandBlock};
use crate::stream::TextEncoding;
use crate::transport::{OpenOptions, Parity, SerialOptions, TransportOpener};

pub static ABOUT: DriverDescriptor = DriverDescriptor {
    guid: "8626D6D3-C211-4D21-B5CC-F5E3B50D9FF0",
    title: "Sony BVM D-series monitor",
    kind: DriverKind::Monitor,
    capabilities: Capabilities::EXPERIMENTAL,
};

/// Serial line the monitors expect: 38400-8-O-1.
pub const SERIAL_OPTIONS: SerialOptions = SerialOptions {
    baud_rate: 38400,
    bits: 8,
    stop_bits: 1,
    parity: Parity::Odd,
};

/// Source address of commands issued by the controller.
const SOURCE: Address = Address::all();
/// Every monitor on the bus receives the commands.
const DESTINATION: Address = Address::all();

/// Input selection argument used with `SetChannel`.
const CHANNEL_SELECT: u8 = 1;

pub struct SonyFactory;

#[async_trait]
impl DriverFactory for SonyFactory {
    fn about(&self) -> &'static DriverDescriptor {
        &ABOUT
    }

    async fn load(&self, location: &str, opener: TransportOpener) -> DriverResult<Box<dyn Driver>> {
        Ok(Box::new(SonyBvm::new(location, opener)))
    }
}

/// Drives a monitor by broadcasting command blocks on the bus.
pub struct SonyBvm {
    location: String,
    opener: TransportOpener,
    options: OpenOptions,
}

impl SonyBvm {
    pub fn new(location: &str, opener: TransportOpener) -> SonyBvm {
        debug!("Loading {} @ {}", ABOUT.title, location);
        SonyBvm {
            location: location.to_string(),
            opener,
            options: OpenOptions::serial(SERIAL_OPTIONS),
        }
    }

    async fn send(&self, block: CommandBlock) -> DriverResult<()> {
        let frame = block.package().package();
        transmit(
            &self.opener,
            &self.location,
            &self.options,
            TextEncoding::default(),
            &[Payload::Binary(frame)],
        )
        .await
    }
}

#[async_trait]
impl Driver for SonyBvm {
    fn about(&self) -> &'static DriverDescriptor {
        &ABOUT
    }

    fn capabilities(&self) -> Capabilities {
        ABOUT.capabilities
    }

    fn location(&self) -> &str {
        &self.location
    }

    /// Monitors have a single output, so only `input` is used.
    async fn set_tie(&self, input: u32, _video_output: u32, _audio_output: u32) -> DriverResult<()> {
        let channel = channel_byte(input)?;
        info!("[sony] {}: select channel {}", self.location, channel);
        self.send(CommandBlock::with_args(
            DESTINATION,
            SOURCE,
            Command::SetChannel,
            CHANNEL_SELECT,
            channel,
        ))
        .await
    }

    async fn power_on(&self) -> DriverResult<()> {
        info!("[sony] {}: power on", self.location);
        self.send(CommandBlock::new(DESTINATION, SOURCE, Command::PowerOn)).await
    }

    async fn power_off(&self) -> DriverResult<()> {
        info!("[sony] {}: power off", self.location);
        self.send(CommandBlock::new(DESTINATION, SOURCE, Command::PowerOff)).await
    }

    async fn unload(&self) -> DriverResult<()> {
        debug!("Unloading {} @ {}", ABOUT.title, self.location);
        Ok(())
    }
}
