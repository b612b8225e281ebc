//! Device location strings.
//!
//! A location is stored as a single string: `port:<device path>` for a local
//! serial device, `ip:<host>` for a TCP-controlled device, or a bare path.

use std::fmt;

use serde::{Deserialize, Serialize};

const PORT_PREFIX: &str = "port:";
const IP_PREFIX: &str = "ip:";

/// How a location string addresses its device.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum DeviceLocation {
    /// Raw filesystem path, no prefix.
    Path,
    /// Local serial device.
    Port,
    /// Network host.
    Ip,
}

impl DeviceLocation {
    fn prefix(self) -> &'static str {
        match self {
            DeviceLocation::Path => "",
            DeviceLocation::Port => PORT_PREFIX,
            DeviceLocation::Ip => IP_PREFIX,
        }
    }
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceLocation::Path => "path",
            DeviceLocation::Port => "port",
            DeviceLocation::Ip => "ip",
        };
        f.write_str(name)
    }
}

/// Classify a location string.
pub fn parse_kind(location: &str) -> DeviceLocation {
    if location.starts_with(PORT_PREFIX) {
        DeviceLocation::Port
    } else if location.starts_with(IP_PREFIX) {
        DeviceLocation::Ip
    } else {
        DeviceLocation::Path
    }
}

/// The address part of a location string, without its prefix.
pub fn parse_path(location: &str) -> &str {
    let kind = parse_kind(location);
    &location[kind.prefix().len()..]
}

/// Split a location string into its kind and address.
pub fn parse(location: &str) -> (DeviceLocation, &str) {
    (parse_kind(location), parse_path(location))
}

/// Build a location string from a kind and address.
///
/// A `Path` whose text itself starts with `port:` or `ip:` cannot be told
/// apart from the prefixed kinds, so raw paths should not use those prefixes.
pub fn rebuild(kind: DeviceLocation, path: &str) -> String {
    format!("{}{}", kind.prefix(), path)
}
