//! Opens command streams from location strings.
//!
//! `port:` locations open a local serial device, `ip:` locations open a TCP
//! connection. The OS facing parts sit behind [`SerialBackend`] and
//! [`NetworkBackend`] so they can be swapped out.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::location::{self, DeviceLocation};
use crate::stream::{CommandStream, Connection, StreamKind};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TCP_PORT: u16 = 23;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The location is neither `port:` nor `ip:`.
    #[error("Unsupported location: \"{0}\"")]
    UnsupportedLocation(String),
    /// Line settings the device cannot be opened with.
    #[error("Invalid line settings: {0}")]
    Config(String),
    /// The device could not be opened or connected to.
    #[error("Unable to open {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("Connection to {0} timed out")]
    Timeout(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Serial parity.
///
/// Mark and space parity can be named in settings but cannot be opened.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl Parity {
    fn native(self) -> TransportResult<serialport::Parity> {
        match self {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Mark | Parity::Space => Err(TransportError::Config(format!(
                "{:?} parity is not supported by the serial driver",
                self
            ))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Parity::None => "N",
            Parity::Even => "E",
            Parity::Odd => "O",
            Parity::Mark => "M",
            Parity::Space => "S",
        };
        f.write_str(letter)
    }
}

/// Serial line settings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SerialOptions {
    pub baud_rate: u32,
    /// 5, 6, 7 or 8.
    pub bits: u8,
    /// 1 or 2.
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for SerialOptions {
    fn default() -> Self {
        SerialOptions {
            baud_rate: DEFAULT_BAUD_RATE,
            bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl SerialOptions {
    fn data_bits(&self) -> TransportResult<serialport::DataBits> {
        match self.bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            bits => Err(TransportError::Config(format!("{} data bits", bits))),
        }
    }

    fn native_stop_bits(&self) -> TransportResult<serialport::StopBits> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            bits => Err(TransportError::Config(format!("{} stop bits", bits))),
        }
    }

    /// Check that the settings can actually be applied to a port.
    pub fn validate(&self) -> TransportResult<()> {
        if self.baud_rate == 0 {
            return Err(TransportError::Config("baud rate of 0".to_string()));
        }
        self.data_bits()?;
        self.native_stop_bits()?;
        self.parity.native()?;
        Ok(())
    }
}

impl fmt::Display for SerialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.baud_rate, self.bits, self.parity, self.stop_bits
        )
    }
}

/// TCP settings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkOptions {
    pub port: u16,
    /// Give up connecting after this long. `None` waits for the OS.
    #[serde(with = "optional_millis")]
    pub connect_timeout: Option<Duration>,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        NetworkOptions {
            port: DEFAULT_TCP_PORT,
            connect_timeout: None,
        }
    }
}

/// Settings for both kinds of link; only the one matching the location is used.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenOptions {
    pub serial: SerialOptions,
    pub network: NetworkOptions,
}

impl OpenOptions {
    pub fn serial(serial: SerialOptions) -> Self {
        OpenOptions {
            serial,
            ..OpenOptions::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.network.port = port;
        self
    }
}

/// Opens local serial devices.
#[async_trait]
pub trait SerialBackend: Send + Sync {
    async fn open(&self, path: &str, options: &SerialOptions) -> io::Result<Box<dyn Connection>>;
}

/// Opens TCP connections.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn Connection>>;
}

/// Serial ports through `tokio-serial`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSerial;

#[async_trait]
impl SerialBackend for NativeSerial {
    async fn open(&self, path: &str, options: &SerialOptions) -> io::Result<Box<dyn Connection>> {
        use tokio_serial::SerialPortBuilderExt;

        let invalid = |err: TransportError| io::Error::new(io::ErrorKind::InvalidInput, err);
        let data_bits = options.data_bits().map_err(invalid)?;
        let stop_bits = options.native_stop_bits().map_err(invalid)?;
        let parity = options.parity.native().map_err(invalid)?;

        #[allow(unused_mut)]
        let mut port = tokio_serial::new(path, options.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .open_native_async()?;

        // Leave the device shareable with other processes.
        #[cfg(unix)]
        port.set_exclusive(false)?;

        Ok(Box::new(port))
    }
}

/// TCP connections through `tokio::net`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpNetwork;

#[async_trait]
impl NetworkBackend for TcpNetwork {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Box<dyn Connection>> {
        let stream = tokio::net::TcpStream::connect((host, port)).await?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY: {}", err);
        }
        Ok(Box::new(stream))
    }
}

/// Turns location strings into open command streams.
#[derive(Clone)]
pub struct TransportOpener {
    serial: Arc<dyn SerialBackend>,
    network: Arc<dyn NetworkBackend>,
}

impl Default for TransportOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransportOpener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportOpener").finish()
    }
}

impl TransportOpener {
    /// An opener using the real serial ports and network.
    pub fn new() -> Self {
        Self::with_backends(Arc::new(NativeSerial), Arc::new(TcpNetwork))
    }

    pub fn with_backends(serial: Arc<dyn SerialBackend>, network: Arc<dyn NetworkBackend>) -> Self {
        TransportOpener { serial, network }
    }

    /// Open a stream to the device at `location`.
    ///
    /// Nothing is left open when this fails.
    pub async fn open(&self, location: &str, options: &OpenOptions) -> TransportResult<CommandStream> {
        let (kind, address) = location::parse(location);
        match kind {
            DeviceLocation::Port => self.open_serial(location, address, &options.serial).await,
            DeviceLocation::Ip => self.open_network(location, address, &options.network).await,
            DeviceLocation::Path => Err(TransportError::UnsupportedLocation(location.to_string())),
        }
    }

    async fn open_serial(
        &self,
        location: &str,
        path: &str,
        options: &SerialOptions,
    ) -> TransportResult<CommandStream> {
        options.validate()?;
        debug!("Opening serial port {} at {}", path, options);

        match self.serial.open(path, options).await {
            Ok(conn) => {
                info!("Opened serial port {}", path);
                Ok(CommandStream::new(StreamKind::Serial, location, conn))
            }
            Err(source) => {
                error!("Unable to open serial port {}: {}", path, source);
                Err(TransportError::Open {
                    location: location.to_string(),
                    source,
                })
            }
        }
    }

    async fn open_network(
        &self,
        location: &str,
        host: &str,
        options: &NetworkOptions,
    ) -> TransportResult<CommandStream> {
        debug!("Connecting to {}:{}", host, options.port);

        let connect = self.network.connect(host, options.port);
        let result = match options.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => {
                    error!("Connection to {}:{} timed out", host, options.port);
                    return Err(TransportError::Timeout(format!("{}:{}", host, options.port)));
                }
            },
            None => connect.await,
        };

        match result {
            Ok(conn) => {
                info!("Connected to {}:{}", host, options.port);
                Ok(CommandStream::new(StreamKind::Network, location, conn))
            }
            Err(source) => {
                error!("Unable to connect to {}:{}: {}", host, options.port, source);
                Err(TransportError::Open {
                    location: location.to_string(),
                    source,
                })
            }
        }
    }
}

/// Open a stream with the default back ends.
pub async fn open(location: &str, options: &OpenOptions) -> TransportResult<CommandStream> {
    TransportOpener::new().open(location, options).await
}

/// Serial devices on this machine, as `port:` location strings.
pub fn available_ports() -> TransportResult<Vec<String>> {
    let ports = serialport::available_ports().map_err(io::Error::from)?;
    Ok(ports
        .into_iter()
        .map(|port| location::rebuild(DeviceLocation::Port, &port.port_name))
        .collect())
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        value
            .map(|duration| duration.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
