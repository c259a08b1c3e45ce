//! # File Sync Server
//!
//! Remote-method dispatcher that keeps clients in sync with a single
//! server-held master file.
//!
//! This crate provides:
//! - A dispatcher resolving four remote operations through an explicit allowlist
//! - Credential checks against a JSON users file (SHA-256 verifiers)
//! - Content-addressed versioning of the master file
//! - A registry of in-flight RR/RRA exchanges with optional expiry
//! - An append-only audit trail of every attempt
//!
//! # Protocols
//!
//! Content can be requested under three delivery guarantees:
//! - `R`: fire-and-forget, nothing is tracked
//! - `RR`: a sync record is created, the client calls `confirm_sync`
//! - `RRA`: a sync record is created, the client calls `confirm_sync`
//!   and `acknowledge_sync`, in any order
//!
//! # Example
//!
//! ```rust,ignore
//! use filesync_server::{Dispatcher, Params, ServerConfig};
//! use serde_json::json;
//!
//! let dispatcher = Dispatcher::from_config(&ServerConfig::new("data".as_ref()))?;
//!
//! let params: Params = serde_json::from_value(json!({
//!     "username": "admin",
//!     "password": "password",
//!     "protocol": "RR",
//! }))?;
//! let response = dispatcher.handle_request("get_file_content", &params, "127.0.0.1");
//! assert!(response.success);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod audit;
mod auth;
pub mod cleanup;
mod config;
mod dispatcher;
mod error;
mod protocol;
mod registry;
mod tracker;

pub use audit::{AuditRecord, AuditSink, AuditStatus, FileAuditLog, MemoryAuditLog};
pub use auth::{AuthError, AuthResult, AuthenticationGate, CredentialStore, PasswordVerifier};
pub use cleanup::spawn_reaper;
pub use config::ServerConfig;
pub use dispatcher::{Call, Dispatcher, Params, REMOTE_METHODS};
pub use error::{DispatchError, DispatchResult, ServerError, ServerResult};
pub use protocol::{Payload, Protocol, Response};
pub use registry::{RegistryError, RegistryResult, SyncId, SyncRecord, SyncRecordRegistry};
pub use tracker::{
    unix_secs, FileSnapshot, FileVersionTracker, TrackerError, TrackerResult, Version,
    DEFAULT_MASTER_CONTENT,
};
