//! Sony RS-485 monitor control protocol.
//!
//! A frame on the wire is `[type, size, data.., checksum]`. The data of a
//! transport control frame is a command block:
//! `[destination, source, command_hi, command_lo, arg0?, arg1?]`.
//!
//! The checksum is `!sum(data) - (size - 1)` in byte arithmetic. This is what
//! the monitors accept, even though it only covers the data bytes.

use std::io::{self, Read};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use thiserror::Error;

/// Packet type carrying a command block.
pub const TRANSPORT_CONTROL: u8 = 0x02;

/// Frame overhead: type, size and checksum.
const HEADER_SIZE: usize = 2;
const FRAME_OVERHEAD: usize = HEADER_SIZE + 1;

const ADDRESS_KIND_MASK: u8 = 0xC0;
const ADDRESS_NUMBER_MASK: u8 = 0x1F;

/// Any failure to make sense of inbound protocol bytes.
#[derive(Debug, Error)]
pub enum SonyDriverError {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    CommandBlock(#[from] CommandBlockError),
}

/// A frame that is malformed.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("Packet declares {declared} data bytes but carries {actual}")]
    SizeMismatch { declared: u8, actual: usize },
    #[error("Packet of {0} bytes is too short")]
    Truncated(usize),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error("I/O error reading packet: {0}")]
    Io(#[from] io::Error),
}

/// A frame whose checksum does not match its data.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
pub struct ChecksumError {
    pub expected: u8,
    pub actual: u8,
}

/// A command block that cannot be built or decoded.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandBlockError {
    #[error("Invalid address byte {0:#04x}")]
    InvalidAddress(u8),
    #[error("Command block needs 4 to 6 data bytes, got {0}")]
    InvalidLength(usize),
    #[error("Packet type {0:#04x} does not carry a command block")]
    UnexpectedType(u8),
}

/// Checksum over a frame's data bytes.
pub fn calculate_checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    let size = data.len() as u8;
    (!sum).wrapping_sub(size.wrapping_sub(1))
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: u8,
    data: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: u8, data: Vec<u8>) -> Packet {
        Packet { packet_type, data }
    }

    /// Rebuild a packet from fields read off the wire, checking them.
    pub fn from_parts(packet_type: u8, size: u8, data: Vec<u8>, checksum: u8) -> Result<Packet, PacketError> {
        if data.len() != size as usize {
            return Err(PacketError::SizeMismatch {
                declared: size,
                actual: data.len(),
            });
        }
        let expected = calculate_checksum(&data);
        if expected != checksum {
            return Err(ChecksumError {
                expected,
                actual: checksum,
            }
            .into());
        }
        Ok(Packet { packet_type, data })
    }

    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u8 {
        (self.data.len() & 0xFF) as u8
    }

    pub fn checksum(&self) -> u8 {
        calculate_checksum(&self.data)
    }

    /// Encode the frame for the wire.
    pub fn package(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + FRAME_OVERHEAD);
        buf.push(self.packet_type);
        buf.push(self.size());
        buf.extend_from_slice(&self.data);
        buf.push(self.checksum());
        buf
    }

    /// Decode exactly one frame.
    pub fn decode(bytes: &[u8]) -> Result<Packet, PacketError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(PacketError::Truncated(bytes.len()));
        }
        let size = bytes[1];
        let data = &bytes[HEADER_SIZE..bytes.len() - 1];
        let checksum = bytes[bytes.len() - 1];
        Packet::from_parts(bytes[0], size, data.to_vec(), checksum)
    }

    /// Read one frame from a byte source.
    pub fn read_from(reader: &mut dyn Read) -> Result<Packet, PacketError> {
        let packet_type = reader.read_u8()?;
        let size = reader.read_u8()?;
        let mut data = vec![0; size as usize];
        reader.read_exact(&mut data)?;
        let checksum = reader.read_u8()?;
        Packet::from_parts(packet_type, size, data, checksum)
    }
}

/// Who an address refers to. The value is the address byte's top bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressKind {
    All = 0xC0,
    Group = 0x80,
    Monitor = 0x00,
}

/// A destination or source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub kind: AddressKind,
    /// 0..=31, higher bits are dropped when packaged.
    pub number: u8,
}

impl Address {
    pub const fn new(kind: AddressKind, number: u8) -> Address {
        Address { kind, number }
    }

    pub const fn all() -> Address {
        Address::new(AddressKind::All, 0)
    }

    pub const fn group(number: u8) -> Address {
        Address::new(AddressKind::Group, number)
    }

    pub const fn monitor(number: u8) -> Address {
        Address::new(AddressKind::Monitor, number)
    }

    pub fn package(&self) -> u8 {
        self.kind as u8 | (self.number & ADDRESS_NUMBER_MASK)
    }

    pub fn decode(byte: u8) -> Result<Address, CommandBlockError> {
        let kind = match byte & ADDRESS_KIND_MASK {
            0xC0 => AddressKind::All,
            0x80 => AddressKind::Group,
            0x00 => AddressKind::Monitor,
            _ => return Err(CommandBlockError::InvalidAddress(byte)),
        };
        if byte & !ADDRESS_KIND_MASK & !ADDRESS_NUMBER_MASK != 0 {
            return Err(CommandBlockError::InvalidAddress(byte));
        }
        Ok(Address::new(kind, byte & ADDRESS_NUMBER_MASK))
    }
}

/// Known monitor commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    SetChannel = 0x2100,
    PowerOn = 0x293E,
    PowerOff = 0x2A3E,
}

impl From<Command> for u16 {
    fn from(command: Command) -> u16 {
        command as u16
    }
}

/// Arguments of a command block. A second argument needs a first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Args {
    None,
    One(u8),
    Two(u8, u8),
}

/// The payload of a transport control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBlock {
    pub destination: Address,
    pub source: Address,
    pub command: u16,
    args: Args,
}

impl CommandBlock {
    pub fn new(destination: Address, source: Address, command: impl Into<u16>) -> CommandBlock {
        CommandBlock {
            destination,
            source,
            command: command.into(),
            args: Args::None,
        }
    }

    pub fn with_arg(destination: Address, source: Address, command: impl Into<u16>, arg0: u8) -> CommandBlock {
        CommandBlock {
            args: Args::One(arg0),
            ..CommandBlock::new(destination, source, command)
        }
    }

    pub fn with_args(
        destination: Address,
        source: Address,
        command: impl Into<u16>,
        arg0: u8,
        arg1: u8,
    ) -> CommandBlock {
        CommandBlock {
            args: Args::Two(arg0, arg1),
            ..CommandBlock::new(destination, source, command)
        }
    }

    pub fn arg0(&self) -> Option<u8> {
        match self.args {
            Args::None => None,
            Args::One(arg0) | Args::Two(arg0, _) => Some(arg0),
        }
    }

    pub fn arg1(&self) -> Option<u8> {
        match self.args {
            Args::Two(_, arg1) => Some(arg1),
            _ => None,
        }
    }

    /// Wrap the block in a transport control packet.
    pub fn package(&self) -> Packet {
        let mut data = vec![self.destination.package(), self.source.package(), 0, 0];
        BigEndian::write_u16(&mut data[2..4], self.command);
        data.extend(self.arg0());
        data.extend(self.arg1());
        Packet::new(TRANSPORT_CONTROL, data)
    }

    /// Read a block back out of a packet.
    pub fn decode(packet: &Packet) -> Result<CommandBlock, CommandBlockError> {
        if packet.packet_type() != TRANSPORT_CONTROL {
            return Err(CommandBlockError::UnexpectedType(packet.packet_type()));
        }
        let data = packet.data();
        if data.len() < 4 || data.len() > 6 {
            return Err(CommandBlockError::InvalidLength(data.len()));
        }
        let destination = Address::decode(data[0])?;
        let source = Address::decode(data[1])?;
        let command = BigEndian::read_u16(&data[2..4]);
        let args = match &data[4..] {
            [] => Args::None,
            [arg0] => Args::One(*arg0),
            [arg0, arg1] => Args::Two(*arg0, *arg1),
            _ => return Err(CommandBlockError::InvalidLength(data.len())),
        };
        Ok(CommandBlock {
            destination,
            source,
            command,
            args,
        })
    }
}

/// Decode a complete frame carrying a command block.
pub fn decode_command(bytes: &[u8]) -> Result<CommandBlock, SonyDriverError> {
    let packet = Packet::decode(bytes)?;
    Ok(CommandBlock::decode(&packet)?)
}
