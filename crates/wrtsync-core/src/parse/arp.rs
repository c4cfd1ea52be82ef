//! `/proc/net/arp` parser
//!
//! ```text
//! IP address       HW type     Flags       HW address            Mask     Device
//! 192.168.1.20     0x1         0x2         aa:bb:cc:dd:ee:ff     *        br0
//! ```

use super::{normalize_mac, synthesize_hostname};
use tracing::debug;

/// ARP flag value for a completed (reachable) entry
pub const ARP_REACHABLE: &str = "0x2";

/// A reachable neighbor table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborRecord {
    /// Uppercase, colon-separated hardware address
    pub mac: String,
    pub ip: String,
    /// Always synthesized; real names come from the lease table
    pub hostname: String,
}

/// Parse the neighbor table, keeping only reachable rows
pub fn parse_arp(output: &str) -> Vec<NeighborRecord> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("IP address"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                debug!("Skipping malformed ARP row: {:?}", line);
                return None;
            }
            if parts[2] != ARP_REACHABLE {
                return None;
            }

            let mac = normalize_mac(parts[3]);
            Some(NeighborRecord {
                hostname: synthesize_hostname(&mac),
                ip: parts[0].to_string(),
                mac,
            })
        })
        .collect()
}
