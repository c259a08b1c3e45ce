//! Server configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the transport binds to.
    pub bind_addr: SocketAddr,
    /// Path to the master file.
    pub master_file: PathBuf,
    /// Path to the JSON users file.
    pub users_file: PathBuf,
    /// Path to the audit log.
    pub log_file: PathBuf,
    /// Lifetime of sync records; `None` keeps them for the whole process.
    pub record_ttl: Option<Duration>,
    /// How often expired records are reaped.
    pub reap_interval: Duration,
    /// Create the master file with default content if it is missing.
    pub create_missing_master: bool,
}

impl ServerConfig {
    /// Creates a configuration with all files under `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            master_file: data_dir.join("master.txt"),
            users_file: data_dir.join("users.json"),
            log_file: data_dir.join("sync.log"),
            record_ttl: Some(Duration::from_secs(24 * 60 * 60)), // 24 hours
            reap_interval: Duration::from_secs(60),
            create_missing_master: true,
        }
    }

    /// Sets the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the master file path.
    pub fn with_master_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.master_file = path.into();
        self
    }

    /// Sets the users file path.
    pub fn with_users_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.users_file = path.into();
        self
    }

    /// Sets the audit log path.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    /// Sets the sync record lifetime. `None` disables reaping.
    pub fn with_record_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// Sets the reap interval.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Sets whether a missing master file is created on startup.
    pub fn with_create_missing_master(mut self, create: bool) -> Self {
        self.create_missing_master = create;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Path::new("."))
    }
}
