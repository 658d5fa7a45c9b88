//! In-memory device registry.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::DeviceRegistry;

/// Process-local device registry. Registrations are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<String, String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn register(&self, device_key: &str, token: &str) -> color_eyre::eyre::Result<()> {
        self.devices
            .write()
            .insert(device_key.to_string(), token.to_string());
        Ok(())
    }

    fn lookup(&self, device_key: &str) -> color_eyre::eyre::Result<Option<String>> {
        Ok(self.devices.read().get(device_key).cloned())
    }

    fn unregister(&self, device_key: &str) -> color_eyre::eyre::Result<bool> {
        Ok(self.devices.write().remove(device_key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_unregister() {
        let registry = MemoryRegistry::new();

        registry.register("phone", "token-1").unwrap();
        registry.register("tablet", "token-2").unwrap();

        assert_eq!(registry.lookup("phone").unwrap().as_deref(), Some("token-1"));
        assert_eq!(
            registry.lookup_many(&["missing", "tablet"]).unwrap(),
            vec!["token-2".to_string()]
        );
        assert!(registry.unregister("phone").unwrap());
        assert!(registry.lookup("phone").unwrap().is_none());
    }
}
