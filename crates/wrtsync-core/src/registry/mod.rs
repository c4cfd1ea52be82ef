//! In-memory entity registry
//!
//! A host-side record of presence entities, keyed by unique id. Hosts that
//! already own an entity registry implement [`EntityRegistry`] themselves;
//! this one backs the daemon and the tests.
//!
//! ## Usage
//!
//! ```rust
//! use wrtsync_core::registry::MemoryEntityRegistry;
//! use wrtsync_core::traits::{EntityRegistry, TrackedEntity};
//!
//! let registry = MemoryEntityRegistry::new();
//! registry.register(TrackedEntity::device_tracker("AA:BB:CC:DD:EE:FF", true)).unwrap();
//! assert_eq!(registry.device_trackers().unwrap().len(), 1);
//! ```

use crate::error::{Error, Result};
use crate::traits::{EntityRegistry, TrackedEntity};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Entity registry held in memory
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Debug, Default)]
pub struct MemoryEntityRegistry {
    entities: RwLock<BTreeMap<String, TrackedEntity>>,
}

impl MemoryEntityRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with entities
    pub fn with_entities(entities: impl IntoIterator<Item = TrackedEntity>) -> Self {
        Self {
            entities: RwLock::new(
                entities
                    .into_iter()
                    .map(|e| (e.unique_id.clone(), e))
                    .collect(),
            ),
        }
    }

    /// Enable or disable an entity, as a user would in the host
    pub fn set_enabled(&self, unique_id: &str, enabled: bool) -> Result<()> {
        let mut entities = self
            .entities
            .write()
            .map_err(|_| Error::registry("registry lock poisoned"))?;

        let entity = entities
            .get_mut(unique_id)
            .ok_or_else(|| Error::registry(format!("Unknown entity: {}", unique_id)))?;
        entity.enabled = enabled;
        Ok(())
    }

    /// Check if an entity is registered
    pub fn contains(&self, unique_id: &str) -> bool {
        self.entities
            .read()
            .map(|entities| entities.contains_key(unique_id))
            .unwrap_or(false)
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.entities.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntityRegistry for MemoryEntityRegistry {
    fn entries(&self) -> Result<Vec<TrackedEntity>> {
        let entities = self
            .entities
            .read()
            .map_err(|_| Error::registry("registry lock poisoned"))?;
        Ok(entities.values().cloned().collect())
    }

    fn register(&self, entity: TrackedEntity) -> Result<()> {
        let mut entities = self
            .entities
            .write()
            .map_err(|_| Error::registry("registry lock poisoned"))?;
        entities.entry(entity.unique_id.clone()).or_insert(entity);
        Ok(())
    }

    fn remove(&self, unique_id: &str) -> Result<()> {
        let mut entities = self
            .entities
            .write()
            .map_err(|_| Error::registry("registry lock poisoned"))?;
        entities.remove(unique_id);
        Ok(())
    }
}
