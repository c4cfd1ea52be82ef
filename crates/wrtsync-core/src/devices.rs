//! Device merge and classification
//!
//! Joins the lease table with the reachable neighbor set. A lease says a
//! device *belongs* to the network; only an ARP entry says it is there now.

use crate::parse::{LeaseRecord, NeighborRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A network device as reported to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Uppercase, colon-separated hardware address (unique key)
    pub mac: String,
    pub hostname: String,
    /// Leased address; `None` for devices only known from history
    pub ip: Option<String>,
    /// Present in the reachable neighbor table this cycle
    pub is_connected: bool,
    /// Last confirmed activity
    pub last_seen: Option<DateTime<Utc>>,
    /// Re-surfaced from presence history without a lease this cycle
    #[serde(default)]
    pub remembered: bool,
}

impl Device {
    /// A device known only from presence history
    pub fn remembered(mac: String, hostname: String, last_seen: DateTime<Utc>) -> Self {
        Self {
            mac,
            hostname,
            ip: None,
            is_connected: false,
            last_seen: Some(last_seen),
            remembered: true,
        }
    }
}

/// Combine leases and neighbors into one device list
///
/// Only leased devices are reported. Connected devices get `last_seen = now`;
/// everyone else is left without a timestamp for the presence tracker to
/// fill. Duplicate leases for one MAC collapse to the last line, and the
/// output is ordered by MAC.
pub fn merge_devices(
    leases: Vec<LeaseRecord>,
    neighbors: &[NeighborRecord],
    now: DateTime<Utc>,
) -> Vec<Device> {
    let reachable: HashSet<&str> = neighbors.iter().map(|n| n.mac.as_str()).collect();

    let mut by_mac: BTreeMap<String, Device> = BTreeMap::new();
    for lease in leases {
        let is_connected = reachable.contains(lease.mac.as_str());
        by_mac.insert(
            lease.mac.clone(),
            Device {
                mac: lease.mac,
                hostname: lease.hostname,
                ip: Some(lease.ip),
                is_connected,
                last_seen: is_connected.then_some(now),
                remembered: false,
            },
        );
    }

    by_mac.into_values().collect()
}
