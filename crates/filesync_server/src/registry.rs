//! Sync record registry.
//!
//! Tracks in-flight RR/RRA exchanges between the moment content is served
//! and the moment the client confirms and/or acknowledges it.

use crate::protocol::Protocol;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use uuid::Uuid;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur in the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live record has this id.
    #[error("Unknown sync ID: {0}")]
    UnknownSyncId(String),
}

/// Server-generated identifier of one sync exchange.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncId(Uuid);

impl SyncId {
    /// Creates a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id received from a client.
    ///
    /// Only the lowercase hyphenated form handed out by the server is
    /// accepted. Uppercase, simple, braced and URN spellings of the same
    /// UUID return `None`, as does anything that is not a UUID.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let uuid = Uuid::parse_str(s).ok()?;
        let mut buf = Uuid::encode_buffer();
        let canonical: &str = uuid.hyphenated().encode_lower(&mut buf);
        (canonical == s).then_some(Self(uuid))
    }
}

impl Default for SyncId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncId({})", self.0)
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for SyncId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// State of one tracked exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Record id.
    pub id: SyncId,
    /// Address of the client content was served to.
    pub client_addr: String,
    /// Authenticated user.
    pub username: String,
    /// Protocol the content was requested with.
    pub protocol: Protocol,
    /// When the content was served.
    pub created_at: SystemTime,
    /// Set once the client has confirmed.
    pub confirmed_at: Option<SystemTime>,
    /// Set once the client has acknowledged.
    pub acknowledged_at: Option<SystemTime>,
}

impl SyncRecord {
    fn new(id: SyncId, client_addr: &str, username: &str, protocol: Protocol) -> Self {
        Self {
            id,
            client_addr: client_addr.to_string(),
            username: username.to_string(),
            protocol,
            created_at: SystemTime::now(),
            confirmed_at: None,
            acknowledged_at: None,
        }
    }

    /// Returns true once the exchange has been confirmed.
    pub fn confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// Returns true once the exchange has been acknowledged.
    pub fn acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }
}

/// Registry of sync records keyed by id.
///
/// A single mutex guards the map; every operation holds it for the
/// duration of one map access.
#[derive(Debug, Default)]
pub struct SyncRecordRegistry {
    records: Mutex<HashMap<SyncId, SyncRecord>>,
    ttl: Option<Duration>,
}

impl SyncRecordRegistry {
    /// Creates a registry whose records live for the whole process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose records may be reaped after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    /// Returns the configured record lifetime.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Stores a fresh unconfirmed, unacknowledged record and returns its id.
    pub fn create(&self, client_addr: &str, username: &str, protocol: Protocol) -> SyncId {
        let mut records = self.records.lock();
        let mut id = SyncId::new();
        while records.contains_key(&id) {
            id = SyncId::new();
        }
        records.insert(id, SyncRecord::new(id, client_addr, username, protocol));
        tracing::debug!("Created sync record {} for {}@{}", id, username, client_addr);
        id
    }

    /// Marks a record confirmed.
    ///
    /// Repeated confirmation succeeds and keeps the first `confirmed_at`.
    pub fn confirm(&self, id: &str) -> RegistryResult<SyncRecord> {
        self.update(id, |record| {
            if record.confirmed_at.is_none() {
                record.confirmed_at = Some(SystemTime::now());
                tracing::debug!("Confirmed sync record {}", record.id);
            }
        })
    }

    /// Marks a record acknowledged. Does not require prior confirmation.
    ///
    /// Repeated acknowledgment succeeds and keeps the first `acknowledged_at`.
    pub fn acknowledge(&self, id: &str) -> RegistryResult<SyncRecord> {
        self.update(id, |record| {
            if record.acknowledged_at.is_none() {
                record.acknowledged_at = Some(SystemTime::now());
                tracing::debug!("Acknowledged sync record {}", record.id);
            }
        })
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut SyncRecord)) -> RegistryResult<SyncRecord> {
        let unknown = || RegistryError::UnknownSyncId(id.to_string());
        let key = SyncId::parse(id).ok_or_else(unknown)?;

        let mut records = self.records.lock();
        let record = records.get_mut(&key).ok_or_else(unknown)?;
        apply(record);
        Ok(record.clone())
    }

    /// Returns a copy of a record.
    pub fn get(&self, id: &SyncId) -> Option<SyncRecord> {
        self.records.lock().get(id).cloned()
    }

    /// Returns true if a record with this id is live.
    pub fn contains(&self, id: &SyncId) -> bool {
        self.records.lock().contains_key(id)
    }

    /// Returns the number of live records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if there are no live records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Removes records older than the configured TTL.
    ///
    /// Returns the number of records removed; always zero without a TTL.
    pub fn reap_expired(&self) -> usize {
        match self.ttl {
            Some(ttl) => self.reap_older_than(SystemTime::now(), ttl),
            None => 0,
        }
    }

    fn reap_older_than(&self, now: SystemTime, ttl: Duration) -> usize {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| {
            now.duration_since(record.created_at)
                .map(|age| age < ttl)
                .unwrap_or(true)
        });
        before - records.len()
    }
}
