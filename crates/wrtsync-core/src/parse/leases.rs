//! dnsmasq lease file parser
//!
//! One lease per line: `expiry mac ip hostname client-id`. dnsmasq writes `*`
//! when the client sent no hostname.

use super::{normalize_mac, synthesize_hostname};
use tracing::debug;

/// A single DHCP lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    /// Uppercase, colon-separated hardware address
    pub mac: String,
    pub ip: String,
    /// Announced hostname, or a synthesized `device_<mac>` label
    pub hostname: String,
}

/// Parse the lease file into records, skipping malformed lines
pub fn parse_leases(output: &str) -> Vec<LeaseRecord> {
    output
        .lines()
        .enumerate()
        .filter_map(|(n, line)| {
            let record = parse_lease_line(line);
            if record.is_none() && !line.trim().is_empty() {
                debug!("Skipping malformed lease line {}: {:?}", n + 1, line);
            }
            record
        })
        .collect()
}

fn parse_lease_line(line: &str) -> Option<LeaseRecord> {
    let mut parts = line.split_whitespace();
    let _expiry = parts.next()?;
    let mac = normalize_mac(parts.next()?);
    let ip = parts.next()?.to_string();
    let hostname = parts.next()?;

    let hostname = if hostname.trim().is_empty() || hostname == "*" {
        synthesize_hostname(&mac)
    } else {
        hostname.to_string()
    };

    Some(LeaseRecord { mac, ip, hostname })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lease_line() {
        let leases = parse_leases("1736424000 aa:bb:cc:dd:ee:ff 10.0.0.5 laptop 01:aa:bb:cc:dd:ee:ff\n");
        assert_eq!(
            leases,
            vec![LeaseRecord {
                mac: "AA:BB:CC:DD:EE:FF".to_string(),
                ip: "10.0.0.5".to_string(),
                hostname: "laptop".to_string(),
            }]
        );
    }

    #[test]
    fn test_short_lines_are_skipped() {
        let text = "\
0 AA:BB:CC:DD:EE:01 10.0.0.1
0 AA:BB:CC:DD:EE:02
garbage

0 AA:BB:CC:DD:EE:03 10.0.0.3 phone *
";
        let leases = parse_leases(text);
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].hostname, "phone");
    }

    #[test]
    fn test_star_hostname_is_synthesized() {
        let leases = parse_leases("0 aa:bb:cc:dd:ee:ff 10.0.0.9 * *");
        assert_eq!(leases[0].hostname, "device_AA_BB_CC_DD_EE_FF");
    }

    #[test]
    fn test_client_id_is_optional() {
        let leases = parse_leases("0 AA:BB:CC:DD:EE:FF 10.0.0.9 tv");
        assert_eq!(leases.len(), 1);
    }

    #[test]
    fn test_hostile_input_never_panics() {
        for text in ["", "\n\n\n", "\0\0\0 \u{feff}", "a b c", "😀 😀 😀 😀", "\t\t\t\t\t"] {
            let _ = parse_leases(text);
        }
        assert!(parse_leases("").is_empty());
    }
}
