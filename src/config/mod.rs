use std::collections::BTreeMap;
use std::path::Path;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::registry::Registry;

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    /// Controlled devices by name.
    #[serde(default)]
    pub devices: BTreeMap<String, Device>,
}

/// A switch or monitor and the driver used to control it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// GUID of the driver family.
    pub driver: String,
    /// Location string: `port:<device>` or `ip:<host>`.
    pub path: String,
    /// Human-readable name.
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Device {name}: {reason}")]
    InvalidDevice { name: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl Root {
    /// Sanity check the device list on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, device) in &self.devices {
            if device.path.trim().is_empty() {
                return Err(invalid(name, "has no path"));
            }
            if device.driver.trim().is_empty() {
                return Err(invalid(name, "has no driver"));
            }
        }
        Ok(())
    }

    /// Check that every device refers to a registered driver.
    pub fn check_drivers(&self, registry: &Registry) -> ConfigResult<()> {
        for (name, device) in &self.devices {
            if !registry.contains(&device.driver) {
                return Err(invalid(
                    name,
                    &format!("refers to unknown driver {}", device.driver),
                ));
            }
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    let err = ConfigError::InvalidDevice {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    error!("{}", err);
    err
}

pub fn read_config_yaml<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let file = fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let root: Root = serde_yaml::from_reader(reader)?;
    root.validate()?;
    Ok(root)
}

pub fn read_config_json<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let file = fs::File::open(path)?;
    let reader = io::BufReader::new(file);
    let root: Root = serde_json::from_reader(reader)?;
    root.validate()?;
    Ok(root)
}

/// Read a config file, picking the format from its extension.
pub fn read_config<T: AsRef<Path>>(path: T) -> ConfigResult<Root> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => read_config_json(path),
        _ => read_config_yaml(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
devices:
  preview:
    driver: "8626D6D3-C211-4D21-B5CC-F5E3B50D9FF0"
    path: "port:/dev/ttyUSB0"
    title: "Preview monitor"
  matrix:
    driver: "4c8f2838-c91d-431e-84dd-3666d14a6e2c"
    path: "ip:192.168.1.40"
"#;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_yaml() {
        let file = write_temp(".yaml", YAML);
        let root = read_config(file.path()).unwrap();

        assert_eq!(root.devices.len(), 2);
        let preview = &root.devices["preview"];
        assert_eq!(preview.path, "port:/dev/ttyUSB0");
        assert_eq!(preview.title.as_deref(), Some("Preview monitor"));
        assert_eq!(root.devices["matrix"].title, None);

        root.check_drivers(&Registry::with_builtin_drivers().unwrap()).unwrap();
    }

    #[test]
    fn reads_json() {
        let file = write_temp(
            ".json",
            r#"{"devices": {"kvm": {"driver": "91D5BC95-A8E2-4F58-BCAC-A77BA1054D61", "path": "ip:10.0.0.8"}}}"#,
        );
        let root = read_config(file.path()).unwrap();
        assert_eq!(root.devices["kvm"].path, "ip:10.0.0.8");
    }

    #[test]
    fn rejects_devices_without_path() {
        let file = write_temp(".yaml", "devices:\n  broken:\n    driver: x\n    path: \"\"\n");
        let err = read_config_yaml(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDevice { ref name, .. } if name == "broken"));
    }

    #[test]
    fn rejects_unknown_drivers() {
        let file = write_temp(
            ".yaml",
            "devices:\n  odd:\n    driver: 00000000-0000-0000-0000-000000000000\n    path: ip:1.2.3.4\n",
        );
        let root = read_config_yaml(file.path()).unwrap();
        let err = root.check_drivers(&Registry::with_builtin_drivers().unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown driver"));
    }

    #[test]
    fn reports_missing_file() {
        let err = read_config_yaml("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
