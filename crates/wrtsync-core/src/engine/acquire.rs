// # Single-session acquisition
//
// Everything the cycle needs from the router is read over one session:
//
//   connect → leases → neighbors → [wan ifname] → net dev → [probe] → disconnect
//
// Disconnect runs on every exit path, including errors and panics, through
// `SessionGuard`. This code is blocking and runs on a blocking worker.

use crate::error::Result;
use crate::parse::{LeaseRecord, NeighborRecord, WanCounters, parse_arp, parse_leases, parse_net_dev};
use crate::traits::{RouterSession, commands};
use std::net::IpAddr;
use tracing::{debug, warn};

/// What to do beyond the fixed reads
#[derive(Debug, Clone, Default)]
pub(crate) struct AcquirePlan {
    /// Known WAN interface; `None` asks the router
    pub wan_interface: Option<String>,
    /// Ping these addresses after the reads; `None` skips probing
    pub probe: Option<ProbeTargets>,
}

/// Addresses eligible for a reachability probe, by MAC
#[derive(Debug, Clone, Default)]
pub(crate) struct ProbeTargets {
    pub enabled_macs: std::collections::HashSet<String>,
}

/// Raw results of one session
#[derive(Debug, Clone, Default)]
pub(crate) struct Acquisition {
    pub leases: Vec<LeaseRecord>,
    pub neighbors: Vec<NeighborRecord>,
    pub wan: Option<WanCounters>,
    pub wan_interface: Option<String>,
    /// A probe command was issued and completed
    pub probed: bool,
}

/// Closes the session when dropped
struct SessionGuard<'a> {
    session: &'a mut dyn RouterSession,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.session.disconnect();
    }
}

/// Run one full acquisition over `session`
///
/// Connection and command failures abort the acquisition. Reading the WAN
/// interface or its counters and probing are best effort: they never fail
/// the cycle.
pub(crate) fn acquire(session: &mut dyn RouterSession, plan: &AcquirePlan) -> Result<Acquisition> {
    let mut guard = SessionGuard { session };
    guard.session.connect()?;

    let leases = parse_leases(&guard.session.execute(commands::DHCP_LEASES)?);
    let neighbors = parse_arp(&guard.session.execute(commands::ARP_TABLE)?);
    debug!("Read {} leases and {} reachable neighbors", leases.len(), neighbors.len());

    let wan_interface = match &plan.wan_interface {
        Some(iface) => Some(iface.clone()),
        None => read_wan_interface(guard.session),
    };

    let wan = wan_interface.as_deref().and_then(|iface| {
        match guard.session.execute(commands::NET_DEV) {
            Ok(output) => parse_net_dev(&output, iface),
            Err(e) => {
                warn!("Failed to read interface counters: {}", e);
                None
            }
        }
    });

    let mut probed = false;
    if let Some(targets) = &plan.probe {
        let ips = probe_addresses(&leases, &neighbors, targets);
        if !ips.is_empty() {
            debug!("Probing {} connected devices: {}", ips.len(), ips.join(", "));
            match guard.session.probe(&ips) {
                Ok(()) => probed = true,
                Err(e) => debug!("Probe failed: {}", e),
            }
        }
    }

    drop(guard);
    Ok(Acquisition {
        leases,
        neighbors,
        wan,
        wan_interface,
        probed,
    })
}

fn read_wan_interface(session: &mut dyn RouterSession) -> Option<String> {
    match session.execute(commands::WAN_IFNAME) {
        Ok(output) => {
            let iface = output.trim();
            if iface.is_empty() {
                warn!("Router reported no WAN interface");
                None
            } else {
                debug!("WAN interface is {}", iface);
                Some(iface.to_string())
            }
        }
        Err(e) => {
            warn!("Failed to read WAN interface name: {}", e);
            None
        }
    }
}

/// Leased addresses of connected devices whose entity is enabled
fn probe_addresses(
    leases: &[LeaseRecord],
    neighbors: &[NeighborRecord],
    targets: &ProbeTargets,
) -> Vec<String> {
    let reachable: std::collections::HashSet<&str> =
        neighbors.iter().map(|n| n.mac.as_str()).collect();

    let mut ips: Vec<String> = leases
        .iter()
        .filter(|l| reachable.contains(l.mac.as_str()))
        .filter(|l| targets.enabled_macs.contains(&l.mac))
        .filter_map(|l| match l.ip.parse::<IpAddr>() {
            Ok(ip) => Some(ip.to_string()),
            Err(_) => {
                warn!("Not probing {}: invalid address {:?}", l.mac, l.ip);
                None
            }
        })
        .collect();
    ips.sort();
    ips.dedup();
    ips
}
