//! Core traits for the wrtsync system
//!
//! This module defines the abstract interfaces to the outside world.
//!
//! - [`RouterSession`]: Run commands on the router
//! - [`StateStore`]: Scoped key-value persistence owned by the host
//! - [`EntityRegistry`]: The host's set of tracked presence entities

pub mod session;
pub mod state_store;
pub mod entity_registry;

pub use session::{RouterSession, RouterSessionFactory, commands};
pub use state_store::StateStore;
pub use entity_registry::{EntityRegistry, TrackedEntity, DEVICE_TRACKER_DOMAIN, PLATFORM};
