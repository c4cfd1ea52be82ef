// # SSH Router Session
//
// This crate provides the libssh2-backed RouterSession for the wrtsync engine.
//
// ## Purpose
//
// Opens one authenticated session to the router, runs shell commands and
// returns their standard output as text. It is a leaf component: every
// failure is reported to the caller, nothing is retried here.
//
// ## Authentication
//
// Exactly one credential is configured per router:
// - Password
// - Private key file (Ed25519, ECDSA, RSA or DSA; no passphrase)
//
// The key file is read and identified before any network traffic, so a bad
// key path fails fast without touching the router.
//
// ## Blocking
//
// libssh2 is blocking. The engine drives sessions from a blocking worker;
// nothing here must be called from an async task directly.

use wrtsync_core::config::{EngineConfig, RouterAuth, RouterConfig};
use wrtsync_core::traits::{RouterSession, RouterSessionFactory};
use wrtsync_core::{Error, Result};

use ssh2::Session;
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default connect timeout
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Private key algorithms, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Ed25519,
    Ecdsa,
    Rsa,
    Dsa,
}

impl KeyAlgorithm {
    pub const ORDER: [KeyAlgorithm; 4] = [
        KeyAlgorithm::Ed25519,
        KeyAlgorithm::Ecdsa,
        KeyAlgorithm::Rsa,
        KeyAlgorithm::Dsa,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Ecdsa => "ecdsa",
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Dsa => "dsa",
        }
    }

    /// Whether a key with this PEM label can hold this algorithm
    fn accepts(&self, label: &str) -> bool {
        match (self, label) {
            (_, "OPENSSH PRIVATE KEY") => true,
            (KeyAlgorithm::Ecdsa, "EC PRIVATE KEY") => true,
            (KeyAlgorithm::Rsa, "RSA PRIVATE KEY") => true,
            (KeyAlgorithm::Dsa, "DSA PRIVATE KEY") => true,
            _ => false,
        }
    }

    /// First algorithm in [`KeyAlgorithm::ORDER`] the key's format can hold
    ///
    /// OpenSSH-format keys do not name their algorithm in the armor; they
    /// match the first candidate and libssh2 reads the real type. Generic
    /// PKCS#8 keys fall back to RSA.
    pub fn identify(pem: &str) -> Option<KeyAlgorithm> {
        let label = pem_label(pem)?;
        Self::ORDER
            .iter()
            .copied()
            .find(|alg| alg.accepts(label))
            .or_else(|| (label == "PRIVATE KEY").then_some(KeyAlgorithm::Rsa))
    }
}

/// The `XXX` in `-----BEGIN XXX-----`
fn pem_label(pem: &str) -> Option<&str> {
    pem.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("-----BEGIN "))
        .and_then(|rest| rest.strip_suffix("-----"))
}

/// Passphrase-protected keys cannot be used unattended
fn is_encrypted(pem: &str) -> bool {
    pem.contains("ENCRYPTED")
}

/// libssh2-backed router session
pub struct SshSession {
    host: String,
    port: u16,
    username: String,
    auth: RouterAuth,
    timeout: Duration,
    session: Option<Session>,
}

impl SshSession {
    /// Create a session for the given router (not yet connected)
    pub fn new(router: &RouterConfig) -> Self {
        Self {
            host: router.host.clone(),
            port: router.port,
            username: router.username.clone(),
            auth: router.auth.clone(),
            timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            session: None,
        }
    }

    /// Create with a custom connect and I/O timeout
    pub fn with_timeout(router: &RouterConfig, timeout: Duration) -> Self {
        let mut session = Self::new(router);
        session.timeout = timeout;
        session
    }

    /// Whether a session is currently open
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::connection(format!("Cannot resolve {}: {}", self.target(), e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::connection(format!("No address for {}", self.target())));
        }
        Ok(addrs)
    }

    fn open_tcp(&self) -> Result<TcpStream> {
        let mut last_error = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(Error::connection(format!(
            "Failed to connect to {}: {}",
            self.target(),
            last_error.map_or_else(|| "no address".to_string(), |e| e.to_string())
        )))
    }

    /// Read and identify the key file before any network traffic
    fn check_key(path: &Path) -> Result<KeyAlgorithm> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            Error::connection(format!("Failed to load SSH key from {}: {}", path.display(), e))
        })?;
        if is_encrypted(&pem) {
            return Err(Error::connection(format!(
                "SSH key {} is passphrase-protected",
                path.display()
            )));
        }
        KeyAlgorithm::identify(&pem).ok_or_else(|| {
            Error::connection(format!("Unrecognized SSH key format in {}", path.display()))
        })
    }

    /// Authenticate with the configured credential; `key` is the identified key type
    fn authenticate(&self, session: &Session, key: Option<KeyAlgorithm>) -> Result<()> {
        match &self.auth {
            RouterAuth::Password { password } => session
                .userauth_password(&self.username, password)
                .map_err(|e| Error::connection(format!("Password authentication failed: {}", e))),
            RouterAuth::KeyFile { path } => {
                if let Some(algorithm) = key {
                    debug!("Using {} key {}", algorithm.name(), path.display());
                }
                session
                    .userauth_pubkey_file(&self.username, None, path, None)
                    .map_err(|e| {
                        Error::connection(format!(
                            "Key authentication with {} failed: {}",
                            path.display(),
                            e
                        ))
                    })
            }
        }
    }

    fn open(&self) -> Result<Session> {
        let key = match &self.auth {
            RouterAuth::KeyFile { path } => Some(Self::check_key(path)?),
            RouterAuth::Password { .. } => None,
        };

        let tcp = self.open_tcp()?;
        let mut session =
            Session::new().map_err(|e| Error::connection(format!("SSH init failed: {}", e)))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| Error::connection(format!("SSH handshake with {} failed: {}", self.target(), e)))?;

        self.authenticate(&session, key)?;
        if !session.authenticated() {
            return Err(Error::connection(format!(
                "Router {} rejected authentication",
                self.target()
            )));
        }
        Ok(session)
    }
}

impl RouterSession for SshSession {
    fn connect(&mut self) -> Result<()> {
        self.disconnect();
        let session = self.open()?;
        debug!("SSH session open to {}", self.target());
        self.session = Some(session);
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<String> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::execution("Not connected to router"))?;

        let fail = |e: ssh2::Error| Error::execution(format!("Failed to execute {}: {}", command, e));
        let io_fail = |e: std::io::Error| Error::execution(format!("Failed to read output of {}: {}", command, e));

        let mut channel = session.channel_session().map_err(fail)?;
        channel.exec(command).map_err(fail)?;

        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout).map_err(io_fail)?;
        let mut stderr = Vec::new();
        channel.stderr().read_to_end(&mut stderr).map_err(io_fail)?;
        channel.wait_close().map_err(fail)?;

        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.trim().is_empty() {
            warn!("Command {} wrote to stderr: {}", command, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.disconnect(None, "wrtsync done", None) {
                debug!("Error closing SSH session: {}", e);
            }
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Factory for SSH router sessions
pub struct SshSessionFactory;

impl RouterSessionFactory for SshSessionFactory {
    fn create(&self, router: &RouterConfig, engine: &EngineConfig) -> Result<Box<dyn RouterSession>> {
        router.validate()?;
        info!(
            "SSH session to {}@{}:{} ({})",
            router.username,
            router.host,
            router.port,
            match &router.auth {
                RouterAuth::Password { .. } => "password".to_string(),
                RouterAuth::KeyFile { path } => format!("key {}", path.display()),
            }
        );
        Ok(Box::new(SshSession::with_timeout(
            router,
            Duration::from_secs(engine.connect_timeout_secs),
        )))
    }
}
