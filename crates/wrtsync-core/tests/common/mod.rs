//! Test doubles and common utilities for contract tests
//!
//! This module provides minimal test doubles that record how the engine uses
//! its collaborators without implementing real functionality.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use wrtsync_core::config::{RouterConfig, SyncConfig};
use wrtsync_core::error::{Error, Result};
use wrtsync_core::registry::MemoryEntityRegistry;
use wrtsync_core::state::MemoryStateStore;
use wrtsync_core::traits::{EntityRegistry, RouterSession, StateStore, TrackedEntity, commands};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Lease table with one connected laptop
pub const LEASES: &str = "1736424000 AA:BB:CC:DD:EE:FF 10.0.0.5 laptop 01:aa:bb:cc:dd:ee:ff\n";

/// Neighbor table where the laptop is reachable
pub const ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
10.0.0.5         0x1         0x2         aa:bb:cc:dd:ee:ff     *        br0
";

/// Interface counters with the given eth0 byte counts
pub fn net_dev(rx: u64, tx: u64) -> String {
    format!(
        "Inter-|   Receive |  Transmit\n face |bytes packets|bytes packets\n  eth0: {} 10 0 0 0 0 0 0 {} 5 0 0 0 0 0 0\n",
        rx, tx
    )
}

/// A router session that answers from a script and records every call
#[derive(Clone)]
pub struct ScriptedSession {
    responses: Arc<Mutex<HashMap<String, String>>>,
    fail_connect: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    connect_count: Arc<AtomicUsize>,
    disconnect_count: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSession {
    /// A router with the default leases, neighbors and counters
    pub fn new() -> Self {
        let session = Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            fail_connect: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
            connect_count: Arc::new(AtomicUsize::new(0)),
            disconnect_count: Arc::new(AtomicUsize::new(0)),
            commands: Arc::new(Mutex::new(Vec::new())),
        };
        session.respond(commands::DHCP_LEASES, LEASES);
        session.respond(commands::ARP_TABLE, ARP);
        session.respond(commands::WAN_IFNAME, "eth0\n");
        session.respond(commands::NET_DEV, &net_dev(1000, 500));
        session
    }

    /// Create a session that shares the script and counters with another
    pub fn sharing_counters_with(other: &Self) -> Self {
        other.clone()
    }

    /// Set the output of a command
    pub fn respond(&self, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), output.to_string());
    }

    /// Make a command fail with an execution error
    pub fn forget(&self, command: &str) {
        self.responses.lock().unwrap().remove(command);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Every command executed, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// How often a command was executed
    pub fn command_count(&self, command: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }
}

impl RouterSession for ScriptedSession {
    fn connect(&mut self) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::connection("Authentication failed"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<String> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::execution("No open session"));
        }
        self.commands.lock().unwrap().push(command.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .ok_or_else(|| Error::execution(format!("command failed: {}", command)))
    }

    fn disconnect(&mut self) {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// A state store that counts calls and can be told to fail
#[derive(Clone)]
pub struct RecordingStateStore {
    inner: MemoryStateStore,
    load_count: Arc<AtomicUsize>,
    save_count: Arc<AtomicUsize>,
    flush_count: Arc<AtomicUsize>,
    fail_all: Arc<AtomicBool>,
}

impl RecordingStateStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStateStore::new(),
            load_count: Arc::new(AtomicUsize::new(0)),
            save_count: Arc::new(AtomicUsize::new(0)),
            flush_count: Arc::new(AtomicUsize::new(0)),
            fail_all: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a store that shares documents and counters with another
    pub fn sharing_counters_with(other: &Self) -> Self {
        other.clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flush_count.load(Ordering::SeqCst)
    }

    /// Read a stored document directly
    pub async fn document(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.load(key).await.unwrap()
    }

    /// Seed a document directly
    pub async fn seed(&self, key: &str, value: serde_json::Value) {
        self.inner.save(key, &value).await.unwrap();
    }

    fn check(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::state_store("disk full"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StateStore for RecordingStateStore {
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.save(key, value).await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_count.fetch_add(1, Ordering::SeqCst);
        self.check()
    }
}

/// An entity registry where removing chosen entities fails
pub struct FailingRegistry {
    inner: MemoryEntityRegistry,
    fail_removal: Mutex<HashSet<String>>,
    removal_attempts: AtomicUsize,
}

impl FailingRegistry {
    pub fn with_entities(entities: impl IntoIterator<Item = TrackedEntity>) -> Self {
        Self {
            inner: MemoryEntityRegistry::with_entities(entities),
            fail_removal: Mutex::new(HashSet::new()),
            removal_attempts: AtomicUsize::new(0),
        }
    }

    /// Make removal of this unique id fail until cleared
    pub fn fail_removal_of(&self, unique_id: &str) {
        self.fail_removal.lock().unwrap().insert(unique_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_removal.lock().unwrap().clear();
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.inner.contains(unique_id)
    }

    pub fn removal_attempts(&self) -> usize {
        self.removal_attempts.load(Ordering::SeqCst)
    }
}

impl EntityRegistry for FailingRegistry {
    fn entries(&self) -> Result<Vec<TrackedEntity>> {
        self.inner.entries()
    }

    fn register(&self, entity: TrackedEntity) -> Result<()> {
        self.inner.register(entity)
    }

    fn remove(&self, unique_id: &str) -> Result<()> {
        self.removal_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_removal.lock().unwrap().contains(unique_id) {
            return Err(Error::registry(format!("{} is locked", unique_id)));
        }
        self.inner.remove(unique_id)
    }
}

/// Helper to create a minimal SyncConfig for testing
pub fn minimal_config(instance_id: &str) -> SyncConfig {
    let mut config = SyncConfig::new(
        instance_id,
        RouterConfig::with_password("192.168.1.1", "admin", "test-password"),
    );
    config.engine.event_channel_capacity = 100;
    config
}

/// Fixed reference instant
pub fn t0() -> DateTime<Utc> {
    "2025-01-09T12:00:00Z".parse().unwrap()
}

pub fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

/// Everything currently queued on the event channel
pub fn drain(rx: &mut tokio::sync::mpsc::Receiver<wrtsync_core::SyncEvent>) -> Vec<wrtsync_core::SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
