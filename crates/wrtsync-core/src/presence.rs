//! Presence tracking
//!
//! Remembers when each device was last confirmed on the network and turns
//! that into a home / away answer with a grace period.
//!
//! ## State machine
//!
//! ```text
//!            reachable, or now - last_seen < grace
//!   ┌──────┐ ─────────────────────────────────────▶ ┌──────┐
//!   │ Away │                                        │ Home │
//!   └──────┘ ◀───────────────────────────────────── └──────┘
//!            not reachable and now - last_seen >= grace
//! ```
//!
//! Nothing fires on a timer. Every query re-evaluates against the clock it is
//! given, so Home turns into Away the first time somebody asks after the grace
//! period ran out.

use crate::config::{EngineConfig, FreshnessPolicy};
use crate::devices::Device;
use crate::parse::synthesize_hostname;
use crate::traits::EntityRegistry;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Logical presence of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Home,
    #[serde(rename = "not_home")]
    Away,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Home => "home",
            Presence::Away => "not_home",
        }
    }
}

/// Home iff reachable now, or last seen within `[0, grace)`
pub fn evaluate_presence(
    is_connected: bool,
    last_seen: Option<DateTime<Utc>>,
    grace: Duration,
    now: DateTime<Utc>,
) -> Presence {
    if is_connected {
        return Presence::Home;
    }
    match last_seen {
        Some(seen) if now.signed_duration_since(seen) < grace => Presence::Home,
        _ => Presence::Away,
    }
}

/// One persisted entry: `{ "last_seen": "<ISO-8601>", "hostname": "<string>"? }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Per-device last-seen memory with grace period and pruning
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    grace: Duration,
    prune_after: Duration,
    freshness: FreshnessPolicy,
    last_seen: HashMap<String, DateTime<Utc>>,
    hostnames: HashMap<String, String>,
    /// Devices already surfaced to the host
    known: HashSet<String>,
}

impl PresenceTracker {
    pub fn new(grace: Duration, prune_after: Duration, freshness: FreshnessPolicy) -> Self {
        Self {
            grace,
            prune_after,
            freshness,
            last_seen: HashMap::new(),
            hostnames: HashMap::new(),
            known: HashSet::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.grace_period(),
            config.prune_threshold(),
            config.freshness,
        )
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn last_seen(&self, mac: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(mac).copied()
    }

    pub fn hostname(&self, mac: &str) -> Option<&str> {
        self.hostnames.get(mac).map(String::as_str)
    }

    /// Number of devices with a remembered timestamp
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Number of devices with a remembered hostname
    pub fn hostname_count(&self) -> usize {
        self.hostnames.len()
    }

    pub fn is_known(&self, mac: &str) -> bool {
        self.known.contains(mac)
    }

    /// Mark devices the host already tracks so they are not announced again
    pub fn seed_known(&mut self, macs: impl IntoIterator<Item = String>) {
        self.known.extend(macs);
    }

    /// Presence of a reported device at `now`
    ///
    /// Under [`FreshnessPolicy::ClearWhenDisconnected`] only the device's own
    /// timestamp counts, so a cleared device is away.
    pub fn presence(&self, device: &Device, now: DateTime<Utc>) -> Presence {
        let last_seen = match self.freshness {
            FreshnessPolicy::CarryForward => {
                device.last_seen.or_else(|| self.last_seen(&device.mac))
            }
            FreshnessPolicy::ClearWhenDisconnected => device.last_seen,
        };
        evaluate_presence(device.is_connected, last_seen, self.grace, now)
    }

    /// Merge a persisted presence document into memory
    ///
    /// Entries that do not parse are skipped one by one. A restored timestamp
    /// never moves an in-memory one backwards. Returns the number of entries
    /// accepted.
    pub fn restore(&mut self, document: &serde_json::Value) -> usize {
        let Some(entries) = document.as_object() else {
            warn!("Ignoring persisted presence state: not a JSON object");
            return 0;
        };

        let mut restored = 0;
        for (mac, stored) in entries {
            let Some(stored) = stored.as_object() else {
                debug!("Skipping persisted entry for {}: not an object", mac);
                continue;
            };

            match stored
                .get("last_seen")
                .and_then(|t| t.as_str())
                .and_then(parse_timestamp)
            {
                Some(ts) => {
                    self.advance(mac, ts);
                    if let Some(host) = stored.get("hostname").and_then(|h| h.as_str()) {
                        self.remember_hostname(mac, host);
                    }
                    restored += 1;
                }
                None => debug!("Skipping unparsable last_seen for {}", mac),
            }
        }
        restored
    }

    /// Serialize memory into the persisted layout
    pub fn to_document(&self) -> serde_json::Value {
        let records: BTreeMap<&str, PresenceRecord> = self
            .last_seen
            .iter()
            .map(|(mac, ts)| {
                (
                    mac.as_str(),
                    PresenceRecord {
                        last_seen: *ts,
                        hostname: self.hostnames.get(mac).cloned(),
                    },
                )
            })
            .collect();

        // A map of plain structs always serializes
        serde_json::to_value(records).unwrap_or_default()
    }

    /// Fold one cycle's devices into memory
    ///
    /// Connected devices are stamped `now`. Disconnected ones get their
    /// remembered timestamp filled in (or cleared, under
    /// [`FreshnessPolicy::ClearWhenDisconnected`]). Returns devices seen
    /// connected for the first time.
    pub fn observe(&mut self, devices: &mut [Device], now: DateTime<Utc>) -> Vec<Device> {
        let mut discovered = Vec::new();

        for device in devices.iter_mut() {
            if device.is_connected {
                self.mark_connected(&device.mac, now);
                self.remember_hostname(&device.mac, &device.hostname);
                device.last_seen = Some(now);

                if self.known.insert(device.mac.clone()) {
                    discovered.push(device.clone());
                }
                continue;
            }

            self.remember_hostname(&device.mac, &device.hostname);
            device.last_seen = match self.freshness {
                FreshnessPolicy::CarryForward => {
                    self.last_seen(&device.mac).map(|seen| seen.min(now))
                }
                FreshnessPolicy::ClearWhenDisconnected => None,
            };
        }

        discovered
    }

    /// Devices remembered from history that have no lease this cycle
    pub fn remembered_devices(&self, current: &[Device], now: DateTime<Utc>) -> Vec<Device> {
        let present: HashSet<&str> = current.iter().map(|d| d.mac.as_str()).collect();

        let mut remembered: Vec<Device> = self
            .last_seen
            .iter()
            .filter(|(mac, _)| !present.contains(mac.as_str()))
            .map(|(mac, seen)| {
                let hostname = self
                    .hostnames
                    .get(mac)
                    .cloned()
                    .unwrap_or_else(|| synthesize_hostname(mac));
                Device::remembered(mac.clone(), hostname, (*seen).min(now))
            })
            .collect();
        remembered.sort_by(|a, b| a.mac.cmp(&b.mac));
        remembered
    }

    /// Forget devices unseen for longer than the prune threshold
    ///
    /// Considers every device in memory and every presence entity in the
    /// registry. A device with no timestamp at all is stale. If removing an
    /// entity fails, the device stays in memory so the next cycle retries it;
    /// the remaining devices are pruned regardless. Returns the pruned MACs.
    pub fn prune(&mut self, registry: &dyn EntityRegistry, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - self.prune_after;

        let registered: BTreeSet<String> = match registry.device_trackers() {
            Ok(entities) => entities.into_iter().map(|e| e.unique_id).collect(),
            Err(e) => {
                warn!("Entity registry unavailable for pruning: {}", e);
                BTreeSet::new()
            }
        };

        let candidates: BTreeSet<String> = self
            .last_seen
            .keys()
            .cloned()
            .chain(registered.iter().cloned())
            .collect();

        let mut pruned = Vec::new();
        for mac in candidates {
            let last_seen = self.last_seen.get(&mac).copied();
            if matches!(last_seen, Some(seen) if seen >= cutoff) {
                continue;
            }

            if registered.contains(&mac) {
                if let Err(e) = registry.remove(&mac) {
                    warn!("Failed to remove stale entity {}: {}", mac, e);
                    continue;
                }
            }

            info!(
                "Pruning stale device {} (last seen {})",
                mac,
                last_seen.map_or_else(|| "never".to_string(), |ts| ts.to_rfc3339())
            );
            self.last_seen.remove(&mac);
            self.hostnames.remove(&mac);
            self.known.remove(&mac);
            pruned.push(mac);
        }
        pruned
    }

    /// Record a fresh connected observation
    fn mark_connected(&mut self, mac: &str, now: DateTime<Utc>) {
        if let Some(previous) = self.last_seen.get(mac)
            && *previous > now
        {
            debug!(
                "Clock moved backwards for {}: stored {} > now {}",
                mac, previous, now
            );
        }
        self.last_seen.insert(mac.to_string(), now);
    }

    /// Move a timestamp forward, never backward
    fn advance(&mut self, mac: &str, ts: DateTime<Utc>) {
        self.last_seen
            .entry(mac.to_string())
            .and_modify(|current| *current = (*current).max(ts))
            .or_insert(ts);
    }

    /// Keep real hostnames over synthesized placeholders
    ///
    /// Only devices with a remembered timestamp get a name, so pruning
    /// evicts every name it keeps.
    fn remember_hostname(&mut self, mac: &str, hostname: &str) {
        if hostname.trim().is_empty() || !self.last_seen.contains_key(mac) {
            return;
        }
        let placeholder = synthesize_hostname(mac);
        if hostname == placeholder && self.hostnames.contains_key(mac) {
            return;
        }
        self.hostnames.insert(mac.to_string(), hostname.to_string());
    }
}

/// Parse RFC 3339, or a naive ISO-8601 timestamp taken as local time
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryEntityRegistry;
    use crate::traits::TrackedEntity;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        "2025-01-09T12:00:00Z".parse().unwrap()
    }

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(
            Duration::seconds(180),
            Duration::days(30),
            FreshnessPolicy::CarryForward,
        )
    }

    fn device(mac: &str, connected: bool) -> Device {
        Device {
            mac: mac.to_string(),
            hostname: format!("host-{}", &mac[mac.len() - 2..]),
            ip: Some("10.0.0.2".to_string()),
            is_connected: connected,
            last_seen: None,
            remembered: false,
        }
    }

    #[test]
    fn test_grace_boundaries() {
        let grace = Duration::seconds(180);
        let at = |secs: i64| Some(now() - Duration::seconds(secs));

        assert_eq!(evaluate_presence(false, at(181), grace, now()), Presence::Away);
        assert_eq!(evaluate_presence(false, at(179), grace, now()), Presence::Home);
        assert_eq!(evaluate_presence(false, at(180), grace, now()), Presence::Away);
        assert_eq!(evaluate_presence(false, at(0), grace, now()), Presence::Home);
        assert_eq!(evaluate_presence(false, None, grace, now()), Presence::Away);
        assert_eq!(evaluate_presence(true, None, grace, now()), Presence::Home);
    }

    #[test]
    fn test_lazy_transition_to_away() {
        let mut tracker = tracker();
        let mut devices = vec![device("AA:00:00:00:00:01", true)];
        tracker.observe(&mut devices, now());

        let mut later = vec![device("AA:00:00:00:00:01", false)];
        tracker.observe(&mut later, now() + Duration::seconds(30));
        let dev = &later[0];

        assert_eq!(dev.last_seen, Some(now()));
        assert_eq!(tracker.presence(dev, now() + Duration::seconds(60)), Presence::Home);
        assert_eq!(tracker.presence(dev, now() + Duration::seconds(180)), Presence::Away);
    }

    #[test]
    fn test_discovery_requires_connection() {
        let mut tracker = tracker();

        let mut devices = vec![device("AA:00:00:00:00:01", false)];
        assert!(tracker.observe(&mut devices, now()).is_empty());

        let mut devices = vec![device("AA:00:00:00:00:01", true)];
        let discovered = tracker.observe(&mut devices, now());
        assert_eq!(discovered.len(), 1);

        // Announced once only
        let mut devices = vec![device("AA:00:00:00:00:01", true)];
        assert!(tracker.observe(&mut devices, now()).is_empty());
    }

    #[test]
    fn test_last_seen_monotonic_across_cycles() {
        let mut tracker = tracker();
        let mac = "AA:00:00:00:00:01";
        let mut previous = None;

        for (i, connected) in [true, false, true, false, false].into_iter().enumerate() {
            let at = now() + Duration::seconds(30 * i as i64);
            let mut devices = vec![device(mac, connected)];
            tracker.observe(&mut devices, at);

            let seen = tracker.last_seen(mac);
            assert!(seen >= previous, "cycle {}: {:?} < {:?}", i, seen, previous);
            previous = seen;
        }
    }

    #[test]
    fn test_clear_policy_drops_timestamp() {
        let mut tracker = PresenceTracker::new(
            Duration::seconds(180),
            Duration::days(30),
            FreshnessPolicy::ClearWhenDisconnected,
        );
        let mut devices = vec![device("AA:00:00:00:00:01", true)];
        tracker.observe(&mut devices, now());

        let mut devices = vec![device("AA:00:00:00:00:01", false)];
        tracker.observe(&mut devices, now());
        assert_eq!(devices[0].last_seen, None);
        assert_eq!(tracker.last_seen("AA:00:00:00:00:01"), Some(now()));
    }

    #[test]
    fn test_clear_policy_agrees_with_summary_counts() {
        let mut tracker = PresenceTracker::new(
            Duration::seconds(180),
            Duration::days(30),
            FreshnessPolicy::ClearWhenDisconnected,
        );
        let mac = "AA:00:00:00:00:01";
        tracker.observe(&mut [device(mac, true)], now());

        let later = now() + Duration::seconds(30);
        let mut devices = vec![device(mac, false)];
        tracker.observe(&mut devices, later);

        assert_eq!(tracker.presence(&devices[0], later), Presence::Away);
        let counts = crate::view::DeviceCounts::tally(&devices, tracker.grace(), later);
        assert_eq!(counts.recently_seen, 0);
        assert_eq!(counts.offline, 1);
    }

    #[test]
    fn test_carry_forward_agrees_with_summary_counts() {
        let mut tracker = tracker();
        let mac = "AA:00:00:00:00:01";
        tracker.observe(&mut [device(mac, true)], now());

        let later = now() + Duration::seconds(30);
        let mut devices = vec![device(mac, false)];
        tracker.observe(&mut devices, later);

        assert_eq!(tracker.presence(&devices[0], later), Presence::Home);
        let counts = crate::view::DeviceCounts::tally(&devices, tracker.grace(), later);
        assert_eq!(counts.recently_seen, 1);
        assert_eq!(counts.offline, 0);
    }

    #[test]
    fn test_never_connected_devices_leave_no_hostnames() {
        let mut tracker = tracker();
        let mut devices: Vec<Device> = (0..100)
            .map(|i| device(&format!("AA:00:00:00:01:{:02X}", i), false))
            .collect();
        tracker.observe(&mut devices, now());

        let registry = MemoryEntityRegistry::new();
        tracker.prune(&registry, now() + Duration::days(400));

        assert!(tracker.is_empty());
        assert_eq!(tracker.hostname_count(), 0);
    }

    #[test]
    fn test_pruning_forgets_hostnames() {
        let mut tracker = tracker();
        let mac = "AA:00:00:00:00:01";
        tracker.observe(&mut [device(mac, true)], now());
        assert_eq!(tracker.hostname(mac), Some("host-01"));

        let registry = MemoryEntityRegistry::new();
        tracker.prune(&registry, now() + Duration::days(31));
        assert_eq!(tracker.hostname(mac), None);
        assert_eq!(tracker.hostname_count(), 0);
    }

    #[test]
    fn test_restore_and_round_trip() {
        let mut tracker = tracker();
        let restored = tracker.restore(&json!({
            "AA:00:00:00:00:01": {"last_seen": "2025-01-09T11:00:00+00:00", "hostname": "tv"},
            "AA:00:00:00:00:02": {"last_seen": "2025-01-09T10:00:00.123456"},
            "AA:00:00:00:00:03": {"last_seen": "yesterday"},
            "AA:00:00:00:00:04": 42,
        }));
        assert_eq!(restored, 2);
        assert_eq!(tracker.hostname("AA:00:00:00:00:01"), Some("tv"));

        let mut copy = self::tracker();
        copy.restore(&tracker.to_document());
        assert_eq!(
            copy.last_seen("AA:00:00:00:00:01"),
            tracker.last_seen("AA:00:00:00:00:01")
        );
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn test_restore_never_moves_backwards() {
        let mut tracker = tracker();
        let mut devices = vec![device("AA:00:00:00:00:01", true)];
        tracker.observe(&mut devices, now());

        tracker.restore(&json!({
            "AA:00:00:00:00:01": {"last_seen": "2024-01-01T00:00:00Z"}
        }));
        assert_eq!(tracker.last_seen("AA:00:00:00:00:01"), Some(now()));
    }

    #[test]
    fn test_remembered_devices_resurface() {
        let mut tracker = tracker();
        tracker.restore(&json!({
            "AA:00:00:00:00:01": {"last_seen": "2025-01-08T12:00:00Z", "hostname": "tablet"},
            "AA:00:00:00:00:02": {"last_seen": "2025-01-08T12:00:00Z"},
        }));

        let current = vec![device("AA:00:00:00:00:02", false)];
        let remembered = tracker.remembered_devices(&current, now());
        assert_eq!(remembered.len(), 1);
        assert_eq!(remembered[0].hostname, "tablet");
        assert!(remembered[0].remembered);
        assert_eq!(remembered[0].ip, None);
        assert_eq!(tracker.presence(&remembered[0], now()), Presence::Away);
    }

    #[test]
    fn test_prune_threshold() {
        let mut tracker = tracker();
        let old = (now() - Duration::days(31)).to_rfc3339();
        let recent = (now() - Duration::days(29)).to_rfc3339();
        tracker.restore(&json!({
            "AA:00:00:00:00:31": {"last_seen": old},
            "AA:00:00:00:00:29": {"last_seen": recent},
        }));

        let registry = MemoryEntityRegistry::with_entities([
            TrackedEntity::device_tracker("AA:00:00:00:00:31", true),
            TrackedEntity::device_tracker("AA:00:00:00:00:29", true),
            TrackedEntity::device_tracker("AA:00:00:00:00:00", true),
        ]);

        let pruned = tracker.prune(&registry, now());
        assert_eq!(pruned, vec!["AA:00:00:00:00:00", "AA:00:00:00:00:31"]);
        assert!(tracker.last_seen("AA:00:00:00:00:31").is_none());
        assert!(tracker.last_seen("AA:00:00:00:00:29").is_some());
        assert!(!registry.contains("AA:00:00:00:00:31"));
        assert!(registry.contains("AA:00:00:00:00:29"));
    }
}
