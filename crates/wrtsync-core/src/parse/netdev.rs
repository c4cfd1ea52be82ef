//! `/proc/net/dev` parser
//!
//! ```text
//! Inter-|   Receive                                                |  Transmit
//!  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets ...
//!   eth0: 1000      10    0    0    0     0          0         0     500       5   ...
//! ```
//!
//! Large counters can swallow the space after the colon (`eth0:123456`), so
//! rows are split on the colon rather than on whitespace.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Column index of transmit bytes, counted after the interface name
const TX_BYTES_COLUMN: usize = 8;

/// Raw byte counters of one interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WanCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Extract the counters of `interface`, or `None` if it is not listed
pub fn parse_net_dev(output: &str, interface: &str) -> Option<WanCounters> {
    let interface = interface.trim();
    if interface.is_empty() {
        return None;
    }

    for line in output.lines() {
        let Some((name, columns)) = line.split_once(':') else {
            continue;
        };
        if name.trim() != interface {
            continue;
        }

        let columns: Vec<&str> = columns.split_whitespace().collect();
        let rx = columns.first().and_then(|c| c.parse::<u64>().ok());
        let tx = columns.get(TX_BYTES_COLUMN).and_then(|c| c.parse::<u64>().ok());

        return match (rx, tx) {
            (Some(rx_bytes), Some(tx_bytes)) => Some(WanCounters { rx_bytes, tx_bytes }),
            _ => {
                debug!("Unreadable counters for {}: {:?}", interface, line);
                None
            }
        };
    }

    debug!("Interface {} not found in device statistics", interface);
    None
}
