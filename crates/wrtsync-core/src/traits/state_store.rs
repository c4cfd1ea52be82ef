// # State Store Trait
//
// Defines the interface for the host's scoped key-value persistence.
//
// ## Purpose
//
// The engine keeps two documents alive across restarts:
// - `<instance>_last_seen`: presence map, `{mac: {last_seen, hostname?}}`
// - `<instance>_wan_counters`: period accumulators
//
// Both are loaded once before the first cycle and saved after every cycle.
//
// ## Implementations
//
// - File-based: one JSON file per key
// - Memory: tests and ephemeral deployments
//
// ## Usage
//
// ```rust,ignore
// use wrtsync_core::StateStore;
//
// let store = /* StateStore implementation */;
// let previous = store.load("home_last_seen").await?;
// store.save("home_last_seen", &serde_json::json!({})).await?;
// ```

use async_trait::async_trait;

/// Trait for state store implementations
///
/// Values are opaque JSON documents; the engine owns their schema.
/// Implementations must be thread-safe and usable across async tasks.
///
/// The engine treats every error from this trait as non-fatal: a failed load
/// starts from empty state and a failed save is logged and retried on the
/// next cycle.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the document stored under `key`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(value))`: The stored document
    /// - `Ok(None)`: Nothing stored under this key
    /// - `Err(Error)`: Storage error
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, crate::Error>;

    /// Replace the document stored under `key`
    async fn save(&self, key: &str, value: &serde_json::Value) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
