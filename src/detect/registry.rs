use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::result::Detection;

use super::backend::{DetectionCapability, DetectionProvider};

pub type SharedProvider = Arc<Mutex<dyn DetectionProvider>>;

/// Thread-safe registry of detection providers.
///
/// Providers are wrapped in `Mutex` because `DetectionProvider::detect` takes `&mut self`.
/// Cloning the registry shares the same provider instances.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, SharedProvider>,
    default_name: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a provider. The first registered provider becomes the default.
    pub fn register<P: DetectionProvider + 'static>(&mut self, provider: P) {
        let name = provider.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.providers.insert(name, Arc::new(Mutex::new(provider)));
    }

    /// Set default provider by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.providers.contains_key(name) {
            return Err(anyhow!("provider '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedProvider> {
        self.providers.get(name).cloned()
    }

    pub fn default_provider(&self) -> Option<SharedProvider> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered providers, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Select a provider that supports the requested capability.
    ///
    /// Prefers the default provider when it supports the capability; otherwise
    /// the first supporting provider by name.
    pub fn provider_for_capability(&self, capability: DetectionCapability) -> Result<SharedProvider> {
        if let Some(default_provider) = self.default_provider() {
            let supports = {
                let guard = default_provider
                    .lock()
                    .map_err(|_| anyhow!("default provider lock poisoned"))?;
                guard.supports(capability)
            };
            if supports {
                return Ok(default_provider);
            }
        }

        for name in self.list() {
            let Some(provider) = self.providers.get(&name) else {
                continue;
            };
            let supports = {
                let guard = provider
                    .lock()
                    .map_err(|_| anyhow!("provider lock poisoned"))?;
                guard.supports(capability)
            };
            if supports {
                return Ok(provider.clone());
            }
        }

        Err(anyhow!(
            "no registered provider supports capability {:?}",
            capability
        ))
    }

    /// Run detection using a provider that supports the requested capability.
    pub fn detect_with_capability(
        &self,
        capability: DetectionCapability,
        region: &RgbImage,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let provider = self.provider_for_capability(capability)?;
        let mut guard = provider
            .lock()
            .map_err(|_| anyhow!("provider lock poisoned"))?;
        guard.detect(region, confidence)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{MotionDetector, ScriptedProvider};

    #[test]
    fn first_registered_provider_is_default() {
        let mut registry = ProviderRegistry::new();
        registry.register(ScriptedProvider::new());
        registry.register(MotionDetector::new());
        let name = registry
            .default_provider()
            .map(|p| p.lock().unwrap().name())
            .unwrap();
        assert_eq!(name, "stub");
        assert_eq!(registry.list(), vec!["motion".to_string(), "stub".to_string()]);
    }

    #[test]
    fn capability_selection_skips_unsupporting_default() {
        let mut registry = ProviderRegistry::new();
        registry.register(MotionDetector::new());
        registry.register(ScriptedProvider::new().with_pose());
        let provider = registry
            .provider_for_capability(DetectionCapability::Pose)
            .unwrap();
        assert_eq!(provider.lock().unwrap().name(), "stub");
    }

    #[test]
    fn missing_capability_is_an_error() {
        let mut registry = ProviderRegistry::new();
        registry.register(MotionDetector::new());
        assert!(registry
            .provider_for_capability(DetectionCapability::Pose)
            .is_err());
        assert!(registry.set_default("tract").is_err());
    }
}
