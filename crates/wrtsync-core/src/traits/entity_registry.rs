// # Entity Registry Trait
//
// The host platform's record of presence entities created for this
// configuration. The engine reads it to seed the set of already-surfaced
// devices and to pick probe targets, registers newly discovered devices, and
// removes entities for devices that have been pruned.

use serde::{Deserialize, Serialize};

/// Domain of presence entities
pub const DEVICE_TRACKER_DOMAIN: &str = "device_tracker";

/// Platform name under which this crate registers entities
pub const PLATFORM: &str = "wrtsync";

/// A tracked entity known to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// Entity domain (e.g. "device_tracker")
    pub domain: String,
    /// Platform that owns the entity
    pub platform: String,
    /// Unique id; the device MAC for presence entities
    pub unique_id: String,
    /// Whether the entity is enabled in the host
    pub enabled: bool,
}

impl TrackedEntity {
    /// A presence entity for the given MAC owned by this platform
    pub fn device_tracker(mac: impl Into<String>, enabled: bool) -> Self {
        Self {
            domain: DEVICE_TRACKER_DOMAIN.to_string(),
            platform: PLATFORM.to_string(),
            unique_id: mac.into(),
            enabled,
        }
    }

    /// True for presence entities owned by this platform
    pub fn is_ours(&self) -> bool {
        self.domain == DEVICE_TRACKER_DOMAIN && self.platform == PLATFORM
    }
}

/// Trait for host entity registries
///
/// Implementations must be thread-safe. Each method acts on a single entity
/// so the engine can isolate failures per entity.
pub trait EntityRegistry: Send + Sync {
    /// All entities registered for this configuration, any domain or platform
    fn entries(&self) -> Result<Vec<TrackedEntity>, crate::Error>;

    /// Register an entity; registering an existing unique id is a no-op
    fn register(&self, entity: TrackedEntity) -> Result<(), crate::Error>;

    /// Remove the entity with this unique id
    fn remove(&self, unique_id: &str) -> Result<(), crate::Error>;

    /// Our presence entities only
    fn device_trackers(&self) -> Result<Vec<TrackedEntity>, crate::Error> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(TrackedEntity::is_ours)
            .collect())
    }
}
