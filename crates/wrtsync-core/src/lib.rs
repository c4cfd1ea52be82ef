// # wrtsync-core
//
// Core library for synchronizing presence and WAN usage state from a home
// router.
//
// ## Architecture Overview
//
// This library provides the core functionality for router state sync:
// - **RouterSession**: Trait for running commands on the router
// - **StateStore**: Trait for scoped persistent state (presence, counters)
// - **EntityRegistry**: Trait for the host's set of presence entities
// - **SyncEngine**: Core engine that runs one acquisition cycle per tick
// - **Parsers**: DHCP lease, ARP and interface counter tables
// - **PresenceTracker / WanMetrics / AccumulatorBank**: derived state
// - **Views**: read-model adapters for host entities
//
// ## Design Principles
//
// 1. **Single Session**: Every cycle reads all tables over one connection
// 2. **Soft Parsing**: Malformed router output is skipped, never raised
// 3. **Degrade, Don't Fail**: A failed cycle yields an empty snapshot
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Durable Counters**: Presence and period totals survive restarts

pub mod traits;
pub mod engine;
pub mod registry;
pub mod config;
pub mod error;
pub mod state;
pub mod parse;
pub mod devices;
pub mod presence;
pub mod wan;
pub mod accumulator;
pub mod view;

// Re-export core types for convenience
pub use traits::{EntityRegistry, RouterSession, RouterSessionFactory, StateStore, TrackedEntity};
pub use engine::{CycleSnapshot, SyncEngine, SyncEvent};
pub use registry::MemoryEntityRegistry;
pub use config::{EngineConfig, FreshnessPolicy, RouterAuth, RouterConfig, SyncConfig};
pub use error::{Error, Result};
pub use state::{FileStateStore, MemoryStateStore};
pub use devices::Device;
pub use presence::{Presence, PresenceTracker};
pub use wan::{WanMetrics, WanSnapshot};
pub use accumulator::{AccumulatorBank, Direction, Period, PeriodAccumulator};
pub use view::{EntityState, EntityView};
