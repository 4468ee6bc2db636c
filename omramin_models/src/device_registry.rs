use log::debug;
use stack_string::{format_sstr, StackString};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use omramin_lib::errors::OmraminError as Error;

use crate::device::{DeviceCategory, OmronDevice};

#[derive(Debug, Default, Clone)]
pub struct DevicePatch {
    pub name: Option<StackString>,
    pub category: Option<DeviceCategory>,
    pub user: Option<u8>,
    pub enabled: Option<bool>,
}

/// Persisted store of configured devices, a JSON mapping keyed by MAC
/// address.  Loaded once at process start, written back on every mutation.
#[derive(Debug)]
pub struct DeviceRegistry {
    path: PathBuf,
    devices: BTreeMap<StackString, OmronDevice>,
}

impl DeviceRegistry {
    /// A missing file loads as the empty registry, malformed content is an
    /// error, never a silent reset.
    /// # Errors
    /// Returns `CorruptConfig` if the file exists but cannot be parsed
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            debug!("no device config at {path:?}, starting empty");
            return Ok(Self {
                path: path.to_path_buf(),
                devices: BTreeMap::new(),
            });
        }
        let buf = fs::read_to_string(path)?;
        let devices: BTreeMap<StackString, OmronDevice> =
            serde_json::from_str(&buf).map_err(|e| {
                Error::CorruptConfig(format_sstr!("{}: {e}", path.to_string_lossy()))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            devices,
        })
    }

    fn store(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let buf = serde_json::to_string_pretty(&self.devices)?;
        fs::write(&self.path, buf)?;
        Ok(())
    }

    /// Devices in stable registry order (sorted by MAC address).
    #[must_use]
    pub fn list(&self) -> Vec<&OmronDevice> {
        self.devices.values().collect()
    }

    #[must_use]
    pub fn get(&self, selector: &str) -> Option<&OmronDevice> {
        self.find_key(selector).and_then(|key| self.devices.get(&key))
    }

    /// # Errors
    /// Returns `DuplicateDevice` if the MAC address is already registered
    pub fn add(&mut self, device: OmronDevice) -> Result<(), Error> {
        let key: StackString = device.macaddr.to_uppercase().into();
        if self.devices.contains_key(&key) {
            return Err(Error::DuplicateDevice(device.macaddr));
        }
        self.devices.insert(key, device);
        self.store()
    }

    /// # Errors
    /// Returns `DeviceNotFound` if no device matches the selector
    pub fn remove(&mut self, selector: &str) -> Result<OmronDevice, Error> {
        let key = self
            .find_key(selector)
            .ok_or_else(|| Error::DeviceNotFound(selector.into()))?;
        let device = self
            .devices
            .remove(&key)
            .ok_or_else(|| Error::DeviceNotFound(selector.into()))?;
        self.store()?;
        Ok(device)
    }

    /// # Errors
    /// Returns `DeviceNotFound` if no device matches the selector, or an
    /// error if the patched fields are invalid
    pub fn update(&mut self, selector: &str, patch: DevicePatch) -> Result<OmronDevice, Error> {
        let key = self
            .find_key(selector)
            .ok_or_else(|| Error::DeviceNotFound(selector.into()))?;
        {
            let device = self
                .devices
                .get_mut(&key)
                .ok_or_else(|| Error::DeviceNotFound(selector.into()))?;
            if let Some(name) = patch.name {
                device.name = name;
            }
            if let Some(category) = patch.category {
                device.category = category;
            }
            if let Some(user) = patch.user {
                if !(1..=4).contains(&user) {
                    return Err(Error::CustomError(format_sstr!(
                        "Invalid device user slot: {user}"
                    )));
                }
                device.user = user;
            }
            if let Some(enabled) = patch.enabled {
                device.enabled = enabled;
            }
        }
        self.store()?;
        Ok(self.devices[&key].clone())
    }

    /// Selectors match a device name first, then a MAC address
    /// (case-insensitively).
    fn find_key(&self, selector: &str) -> Option<StackString> {
        self.devices
            .iter()
            .find(|(_, d)| d.name == selector)
            .or_else(|| {
                self.devices
                    .iter()
                    .find(|(_, d)| d.macaddr.eq_ignore_ascii_case(selector))
            })
            .map(|(key, _)| key.clone())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use omramin_lib::errors::OmraminError as Error;

    use crate::{
        device::{DeviceCategory, OmronDevice},
        device_registry::{DevicePatch, DeviceRegistry},
    };

    fn scale(macaddr: &str, name: &str) -> OmronDevice {
        OmronDevice::new(macaddr, Some(name.into()), DeviceCategory::Scale, 1, true).unwrap()
    }

    #[test]
    fn test_missing_file_loads_empty() -> Result<(), Error> {
        let d = TempDir::with_prefix("omramin_registry")?;
        let registry = DeviceRegistry::load(&d.path().join("devices.json"))?;
        assert!(registry.list().is_empty());
        Ok(())
    }

    #[test]
    fn test_add_persists_across_reload() -> Result<(), Error> {
        let d = TempDir::with_prefix("omramin_registry")?;
        let path = d.path().join("devices.json");
        let mut registry = DeviceRegistry::load(&path)?;
        registry.add(scale("00:5F:BF:11:22:33", "Scale"))?;

        let registry = DeviceRegistry::load(&path)?;
        let devices = registry.list();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Scale");
        Ok(())
    }

    #[test]
    fn test_add_duplicate_mac_fails() -> Result<(), Error> {
        let d = TempDir::with_prefix("omramin_registry")?;
        let mut registry = DeviceRegistry::load(&d.path().join("devices.json"))?;
        registry.add(scale("00:5F:BF:11:22:33", "Scale"))?;
        let result = registry.add(scale("00:5f:bf:11:22:33", "Other"));
        assert!(matches!(result, Err(Error::DuplicateDevice(_))));
        assert_eq!(registry.list().len(), 1);
        Ok(())
    }

    #[test]
    fn test_remove_by_name_and_mac() -> Result<(), Error> {
        let d = TempDir::with_prefix("omramin_registry")?;
        let mut registry = DeviceRegistry::load(&d.path().join("devices.json"))?;
        registry.add(scale("00:5F:BF:11:22:33", "Scale"))?;
        registry.add(scale("00:5F:BF:44:55:66", "Other"))?;

        registry.remove("Scale")?;
        registry.remove("00:5f:bf:44:55:66")?;
        assert!(registry.list().is_empty());

        let result = registry.remove("Scale");
        assert!(matches!(result, Err(Error::DeviceNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_update_patches_fields() -> Result<(), Error> {
        let d = TempDir::with_prefix("omramin_registry")?;
        let path = d.path().join("devices.json");
        let mut registry = DeviceRegistry::load(&path)?;
        registry.add(scale("00:5F:BF:11:22:33", "Scale"))?;

        let patch = DevicePatch {
            user: Some(2),
            enabled: Some(false),
            ..DevicePatch::default()
        };
        let device = registry.update("Scale", patch)?;
        assert_eq!(device.user, 2);
        assert!(!device.enabled);

        let registry = DeviceRegistry::load(&path)?;
        assert_eq!(registry.get("Scale").unwrap().user, 2);

        let patch = DevicePatch {
            user: Some(9),
            ..DevicePatch::default()
        };
        assert!(registry_update_fails(&path, patch));
        Ok(())
    }

    fn registry_update_fails(path: &std::path::Path, patch: DevicePatch) -> bool {
        let mut registry = DeviceRegistry::load(path).unwrap();
        registry.update("Scale", patch).is_err()
    }

    #[test]
    fn test_corrupt_config_is_an_error() -> Result<(), Error> {
        let d = TempDir::with_prefix("omramin_registry")?;
        let path = d.path().join("devices.json");
        std::fs::write(&path, "{ not json")?;
        let result = DeviceRegistry::load(&path);
        assert!(matches!(result, Err(Error::CorruptConfig(_))));
        Ok(())
    }

    #[test]
    fn test_registry_order_is_stable() -> Result<(), Error> {
        let d = TempDir::with_prefix("omramin_registry")?;
        let mut registry = DeviceRegistry::load(&d.path().join("devices.json"))?;
        registry.add(scale("00:5F:BF:44:55:66", "B"))?;
        registry.add(scale("00:5F:BF:11:22:33", "A"))?;
        let names: Vec<_> = registry.list().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, ["A", "B"]);
        Ok(())
    }
}
