// # Router Session Trait
//
// Defines the interface for running shell commands on the router.
//
// ## Implementations
//
// - SSH (libssh2): `wrtsync-ssh` crate
// - Test doubles: scripted sessions in `tests/common`
//
// ## Usage
//
// ```rust,ignore
// use wrtsync_core::traits::{RouterSession, commands};
//
// let mut session = /* RouterSession implementation */;
// session.connect()?;
// let leases = session.execute(commands::DHCP_LEASES);
// session.disconnect();
// ```
//
// Sessions are blocking. The engine drives them from a blocking worker so the
// async runtime never stalls on router I/O.

use crate::error::Result;

/// Fixed commands issued verbatim on the router
pub mod commands {
    /// dnsmasq lease database
    pub const DHCP_LEASES: &str = "cat /var/lib/misc/dnsmasq.leases";

    /// Kernel neighbor table
    pub const ARP_TABLE: &str = "cat /proc/net/arp";

    /// WAN interface name from the router's nvram
    pub const WAN_IFNAME: &str = "nvram get wan_ifname";

    /// Per-interface byte counters
    pub const NET_DEV: &str = "cat /proc/net/dev";

    /// Build the time-boxed reachability probe for a set of addresses
    ///
    /// Every ping runs in the background with a one second deadline, so the
    /// whole command returns after roughly one second regardless of count.
    pub fn probe(ips: &[String]) -> String {
        let mut command = String::new();
        for ip in ips {
            command.push_str("ping -c 1 -W 1 ");
            command.push_str(ip);
            command.push_str(" >/dev/null 2>&1 & ");
        }
        command.push_str("wait");
        command
    }
}

/// Trait for router session implementations
///
/// A session is a single authenticated connection to one router. It is a
/// leaf component: it reports failures and never retries.
///
/// # Contract
///
/// - `connect()` either leaves an open session or returns
///   [`Error::Connection`](crate::Error::Connection) with nothing left open
/// - `execute()` without an open session returns
///   [`Error::Execution`](crate::Error::Execution)
/// - `disconnect()` is idempotent and safe to call before `connect()`
pub trait RouterSession: Send {
    /// Open an authenticated session
    fn connect(&mut self) -> Result<()>;

    /// Run one command and return its decoded standard output
    fn execute(&mut self, command: &str) -> Result<String>;

    /// Close the session if one is open
    fn disconnect(&mut self);

    /// Ping the given addresses from the router to refresh its neighbor table
    fn probe(&mut self, ips: &[String]) -> Result<()> {
        if ips.is_empty() {
            return Ok(());
        }
        self.execute(&commands::probe(ips)).map(|_| ())
    }
}

impl<S: RouterSession + ?Sized> RouterSession for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn execute(&mut self, command: &str) -> Result<String> {
        (**self).execute(command)
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn probe(&mut self, ips: &[String]) -> Result<()> {
        (**self).probe(ips)
    }
}

/// Helper trait for constructing sessions from configuration
pub trait RouterSessionFactory: Send + Sync {
    /// Create a session for the given router settings
    fn create(
        &self,
        router: &crate::config::RouterConfig,
        engine: &crate::config::EngineConfig,
    ) -> Result<Box<dyn RouterSession>>;
}
