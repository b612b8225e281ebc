//! The driver registry maps driver GUIDs to driver families.
//!
//! A registry is built once at start-up, filled with every known family, and
//! then handed to whatever needs to load drivers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, info};

use crate::driver::{self, Driver, DriverDescriptor, DriverError, DriverFactory};
use crate::transport::TransportOpener;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// A family with this GUID is already registered.
    #[error("Driver with GUID \"{0}\" is already registered")]
    Duplicate(String),
    #[error("No such driver with GUID \"{0}\"")]
    NoSuchDriver(String),
    #[error(transparent)]
    Load(#[from] DriverError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

fn normalize_guid(guid: &str) -> String {
    guid.trim().to_uppercase()
}

/// Known driver families.
pub struct Registry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
    /// Registration order, for listing.
    order: Vec<Arc<dyn DriverFactory>>,
    descriptors: OnceLock<Vec<DriverDescriptor>>,
    opener: TransportOpener,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("drivers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// An empty registry whose drivers use the real serial ports and network.
    pub fn new() -> Self {
        Self::with_opener(TransportOpener::new())
    }

    /// An empty registry whose drivers open streams through `opener`.
    pub fn with_opener(opener: TransportOpener) -> Self {
        Registry {
            factories: HashMap::new(),
            order: vec![],
            descriptors: OnceLock::new(),
            opener,
        }
    }

    /// A registry holding every driver family in this crate.
    pub fn with_builtin_drivers() -> RegistryResult<Self> {
        let mut registry = Self::new();
        registry.register_builtin_drivers()?;
        Ok(registry)
    }

    /// Register every driver family in this crate.
    ///
    /// Fails with [`RegistryError::Duplicate`] if any of them is already registered.
    pub fn register_builtin_drivers(&mut self) -> RegistryResult<()> {
        let factories: [Arc<dyn DriverFactory>; 3] = [
            Arc::new(driver::extron::ExtronFactory),
            Arc::new(driver::sony::SonyFactory),
            Arc::new(driver::tesmart::TesmartFactory),
        ];
        for factory in factories {
            self.register(factory)?;
        }
        Ok(())
    }

    /// Add a driver family. GUIDs are compared without regard to case.
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) -> RegistryResult<()> {
        let about = factory.about();
        let guid = normalize_guid(about.guid);
        if self.factories.contains_key(&guid) {
            return Err(RegistryError::Duplicate(about.guid.to_string()));
        }

        info!("Registered driver \"{}\" ({})", about.title, guid);
        self.factories.insert(guid, factory.clone());
        self.order.push(factory);
        self.descriptors = OnceLock::new();
        Ok(())
    }

    /// Load a driver for the device at `location`.
    pub async fn load(&self, guid: &str, location: &str) -> RegistryResult<Box<dyn Driver>> {
        let factory = self
            .factories
            .get(&normalize_guid(guid))
            .ok_or_else(|| RegistryError::NoSuchDriver(guid.to_string()))?;

        debug!("Loading driver {} for {}", guid, location);
        Ok(factory.load(location, self.opener.clone()).await?)
    }

    /// Whether a family with this GUID is registered.
    pub fn contains(&self, guid: &str) -> bool {
        self.factories.contains_key(&normalize_guid(guid))
    }

    /// Descriptors of every registered family, in registration order.
    pub fn all(&self) -> &[DriverDescriptor] {
        self.descriptors
            .get_or_init(|| self.order.iter().map(|factory| *factory.about()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::FakeDevices;
    use crate::driver::{Capabilities, DriverKind, DriverResult};
    use async_trait::async_trait;

    static LOWER: DriverDescriptor = DriverDescriptor {
        guid: "4c8f2838-c91d-431e-84dd-3666d14a6e2c",
        title: "Lowercase twin",
        kind: DriverKind::Switch,
        capabilities: Capabilities::NONE,
    };

    struct LowerFactory;

    #[async_trait]
    impl DriverFactory for LowerFactory {
        fn about(&self) -> &'static DriverDescriptor {
            &LOWER
        }

        async fn load(&self, location: &str, opener: TransportOpener) -> DriverResult<Box<dyn Driver>> {
            Ok(Box::new(driver::ExtronSis::new(location, opener)))
        }
    }

    #[test]
    fn lists_builtin_drivers() {
        let registry = Registry::with_builtin_drivers().unwrap();
        let guids: Vec<&str> = registry.all().iter().map(|about| about.guid).collect();
        assert_eq!(
            guids,
            vec![
                driver::extron::ABOUT.guid,
                driver::sony::ABOUT.guid,
                driver::tesmart::ABOUT.guid,
            ]
        );
        // Memoized: the same slice comes back.
        assert!(std::ptr::eq(registry.all(), registry.all()));
    }

    #[test]
    fn rejects_duplicate_guid_in_any_case() {
        let mut registry = Registry::new();
        registry.register(Arc::new(driver::extron::ExtronFactory)).unwrap();

        let err = registry.register(Arc::new(LowerFactory)).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(_)));
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn builtin_drivers_register_once() {
        let mut registry = Registry::with_builtin_drivers().unwrap();

        let err = registry.register_builtin_drivers().unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Driver with GUID \"{}\" is already registered", driver::extron::ABOUT.guid)
        );
        assert_eq!(registry.all().len(), 3);
    }

    #[test]
    fn registering_refreshes_listing() {
        let mut registry = Registry::new();
        registry.register(Arc::new(driver::sony::SonyFactory)).unwrap();
        assert_eq!(registry.all().len(), 1);

        registry.register(Arc::new(driver::tesmart::TesmartFactory)).unwrap();
        assert_eq!(registry.all().len(), 2);
    }

    #[tokio::test]
    async fn unknown_guid_names_the_guid() {
        let registry = Registry::with_builtin_drivers().unwrap();

        let err = registry.load("UNKNOWN-GUID", "ip:10.0.0.1").await.err().unwrap();
        assert!(matches!(err, RegistryError::NoSuchDriver(_)));
        assert_eq!(err.to_string(), "No such driver with GUID \"UNKNOWN-GUID\"");
    }

    #[tokio::test]
    async fn loads_by_guid_ignoring_case() {
        let devices = FakeDevices::new();
        let mut registry = Registry::with_opener(devices.opener());
        registry.register_builtin_drivers().unwrap();

        let guid = driver::extron::ABOUT.guid.to_lowercase();
        assert!(registry.contains(&guid));
        let extron = registry.load(&guid, "ip:10.0.0.9").await.unwrap();
        assert_eq!(extron.guid(), driver::extron::ABOUT.guid);
        assert_eq!(extron.location(), "ip:10.0.0.9");

        // Loading opens nothing; the tie does.
        assert!(devices.opened.lock().unwrap().is_empty());
        extron.set_tie(1, 2, 3).await.unwrap();
        assert_eq!(devices.written(), vec![b"1*2%\r\n1*3$\r\n".to_vec()]);
        extron.unload().await.unwrap();
    }
}
