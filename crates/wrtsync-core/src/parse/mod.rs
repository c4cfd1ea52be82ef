//! Parsers for raw router tables
//!
//! Every parser is total: any input, including empty or hostile text, yields
//! a (possibly empty) result. Lines that cannot be understood are skipped and
//! logged at debug level.

pub mod leases;
pub mod arp;
pub mod netdev;

pub use leases::{LeaseRecord, parse_leases};
pub use arp::{NeighborRecord, parse_arp, ARP_REACHABLE};
pub use netdev::{WanCounters, parse_net_dev};

/// Normalize a hardware address to uppercase, colon-separated form
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().replace('-', ":").to_ascii_uppercase()
}

/// Placeholder hostname for devices that did not announce one
pub fn synthesize_hostname(mac: &str) -> String {
    format!("device_{}", mac.replace(':', "_"))
}
