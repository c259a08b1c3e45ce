//! Remote method dispatcher (skeleton).
//!
//! Inbound calls name one of four remote operations. Names are resolved
//! against an explicit allowlist; nothing else on [`Dispatcher`] is
//! reachable remotely. Every call is authenticated first and produces
//! exactly one audit record and one [`Response`] envelope.

use crate::audit::{AuditRecord, AuditSink, AuditStatus, FileAuditLog};
use crate::auth::{AuthenticationGate, CredentialStore};
use crate::config::ServerConfig;
use crate::error::{DispatchError, DispatchResult, ServerResult};
use crate::protocol::{Payload, Protocol, Response};
use crate::registry::SyncRecordRegistry;
use crate::tracker::FileVersionTracker;
use serde_json::Value;
use std::sync::Arc;

/// Named parameters of a remote call.
pub type Params = serde_json::Map<String, Value>;

/// Remote operation names, in allowlist order.
pub const REMOTE_METHODS: [&str; 4] = [
    "get_file_content",
    "check_master_version",
    "confirm_sync",
    "acknowledge_sync",
];

type Handler = fn(&Dispatcher, &Call<'_>, &Params) -> Response;

/// The only table remote names are resolved against.
const HANDLERS: [(&str, Handler); 4] = [
    ("get_file_content", Dispatcher::remote_get_file_content),
    ("check_master_version", Dispatcher::remote_check_master_version),
    ("confirm_sync", Dispatcher::remote_confirm_sync),
    ("acknowledge_sync", Dispatcher::remote_acknowledge_sync),
];

fn lookup(method: &str) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, handler)| *handler)
}

/// Caller identity for one remote call.
#[derive(Debug, Clone, Copy)]
pub struct Call<'a> {
    /// Caller address supplied by the transport.
    pub client_addr: &'a str,
    /// Claimed username.
    pub username: &'a str,
    /// Claimed password.
    pub password: &'a str,
}

impl<'a> Call<'a> {
    /// Creates a call context.
    pub fn new(client_addr: &'a str, username: &'a str, password: &'a str) -> Self {
        Self {
            client_addr,
            username,
            password,
        }
    }

    fn from_params(client_addr: &'a str, params: &'a Params) -> Self {
        let text = |name: &str| params.get(name).and_then(Value::as_str).unwrap_or("");
        Self::new(client_addr, text("username"), text("password"))
    }

    fn audit_username(&self) -> &'a str {
        if self.username.is_empty() {
            "unknown"
        } else {
            self.username
        }
    }
}

/// The server-side skeleton shared by all transport workers.
pub struct Dispatcher {
    gate: AuthenticationGate,
    tracker: FileVersionTracker,
    registry: SyncRecordRegistry,
    audit: Arc<dyn AuditSink>,
}

impl Dispatcher {
    /// Creates a dispatcher from its collaborators.
    pub fn new(
        gate: AuthenticationGate,
        tracker: FileVersionTracker,
        registry: SyncRecordRegistry,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            gate,
            tracker,
            registry,
            audit,
        }
    }

    /// Builds a dispatcher from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the credential store cannot be loaded, the master file
    /// cannot be opened, or the audit log cannot be created.
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let store = CredentialStore::load(&config.users_file)?;
        let tracker = if config.create_missing_master {
            FileVersionTracker::open_or_create(&config.master_file)?
        } else {
            FileVersionTracker::open(&config.master_file)?
        };
        let registry = match config.record_ttl {
            Some(ttl) => SyncRecordRegistry::with_ttl(ttl),
            None => SyncRecordRegistry::new(),
        };
        let audit = Arc::new(FileAuditLog::open(&config.log_file)?);

        tracing::info!(
            "Dispatcher ready: master={}, users={}, log={}",
            config.master_file.display(),
            store.len(),
            config.log_file.display()
        );

        Ok(Self::new(
            AuthenticationGate::new(store),
            tracker,
            registry,
            audit,
        ))
    }

    /// Returns the sync record registry.
    pub fn registry(&self) -> &SyncRecordRegistry {
        &self.registry
    }

    /// Returns the file version tracker.
    pub fn tracker(&self) -> &FileVersionTracker {
        &self.tracker
    }

    /// Handles one remote invocation.
    ///
    /// `params` carries `username` and `password` plus operation arguments
    /// (`protocol`, `sync_id`). Unknown keys are ignored.
    pub fn handle_request(&self, method: &str, params: &Params, client_addr: &str) -> Response {
        let call = Call::from_params(client_addr, params);

        match lookup(method) {
            Some(handler) => handler(self, &call, params),
            None => self.finish(
                &call,
                method,
                Err(DispatchError::MethodNotFound(method.to_string())),
            ),
        }
    }

    /// Serves the master file content.
    ///
    /// RR and RRA create a sync record whose id is returned with the content.
    pub fn get_file_content(&self, call: &Call<'_>, protocol: Protocol) -> Response {
        self.serve_content(call, protocol.as_str())
    }

    /// Returns the master version and modification time.
    pub fn check_master_version(&self, call: &Call<'_>) -> Response {
        self.guarded(call, "check_master_version", || {
            let (snapshot, changed) = self.tracker.observe()?;
            if changed {
                tracing::debug!("Master file now at version {}", snapshot.version);
            }
            Ok(Payload::MasterVersion {
                last_modified: snapshot.last_modified_secs(),
                version: snapshot.version.to_string(),
            })
        })
    }

    /// Confirms receipt of an RR/RRA exchange.
    pub fn confirm_sync(&self, call: &Call<'_>, sync_id: &str) -> Response {
        self.guarded(call, "confirm_sync", || {
            let record = self.registry.confirm(sync_id)?;
            Ok(Payload::Confirmed {
                sync_id: record.id,
                confirmed: true,
            })
        })
    }

    /// Acknowledges an exchange. Confirmation is not required first.
    pub fn acknowledge_sync(&self, call: &Call<'_>, sync_id: &str) -> Response {
        self.guarded(call, "acknowledge_sync", || {
            let record = self.registry.acknowledge(sync_id)?;
            Ok(Payload::Acknowledged {
                sync_id: record.id,
                acknowledged: true,
            })
        })
    }

    fn serve_content(&self, call: &Call<'_>, raw_protocol: &str) -> Response {
        self.guarded(call, &content_operation(raw_protocol), || {
            let protocol: Protocol = raw_protocol.parse().map_err(DispatchError::InvalidParams)?;

            let snapshot = self.tracker.status()?;
            let version = snapshot.version.to_string();
            let content =
                String::from_utf8(snapshot.content).map_err(|_| self.tracker.not_utf8())?;

            // Only record the exchange once the content is in hand.
            let sync_id = protocol
                .is_tracked()
                .then(|| self.registry.create(call.client_addr, call.username, protocol));

            Ok(Payload::FileContent {
                content,
                version,
                protocol,
                sync_id,
            })
        })
    }

    fn remote_get_file_content(&self, call: &Call<'_>, params: &Params) -> Response {
        match optional_str(params, "protocol") {
            Ok(raw) => self.serve_content(call, raw.unwrap_or(Protocol::Request.as_str())),
            Err(err) => {
                let raw = params.get("protocol").map(Value::to_string).unwrap_or_default();
                self.guarded(call, &content_operation(&raw), || Err(err))
            }
        }
    }

    fn remote_check_master_version(&self, call: &Call<'_>, _params: &Params) -> Response {
        self.check_master_version(call)
    }

    fn remote_confirm_sync(&self, call: &Call<'_>, params: &Params) -> Response {
        match required_str(params, "sync_id") {
            Ok(sync_id) => self.confirm_sync(call, sync_id),
            Err(err) => self.guarded(call, "confirm_sync", || Err(err)),
        }
    }

    fn remote_acknowledge_sync(&self, call: &Call<'_>, params: &Params) -> Response {
        match required_str(params, "sync_id") {
            Ok(sync_id) => self.acknowledge_sync(call, sync_id),
            Err(err) => self.guarded(call, "acknowledge_sync", || Err(err)),
        }
    }

    /// Authenticates, runs `op`, and records the outcome.
    fn guarded(
        &self,
        call: &Call<'_>,
        operation: &str,
        op: impl FnOnce() -> DispatchResult<Payload>,
    ) -> Response {
        if !self.gate.authenticate(call.username, call.password) {
            return self.finish(call, "authentication", Err(DispatchError::AuthenticationFailed));
        }
        self.finish(call, operation, op())
    }

    /// Writes the single audit record for a call and builds its envelope.
    fn finish(&self, call: &Call<'_>, operation: &str, result: DispatchResult<Payload>) -> Response {
        let username = call.audit_username();
        match result {
            Ok(payload) => {
                self.audit.record(&AuditRecord::new(
                    AuditStatus::Success,
                    call.client_addr,
                    username,
                    operation,
                    None,
                ));
                tracing::info!(client = call.client_addr, user = username, "{} succeeded", operation);
                Response::success(payload)
            }
            Err(err) => {
                let message = err.to_string();
                self.audit.record(&AuditRecord::new(
                    AuditStatus::Failed,
                    call.client_addr,
                    username,
                    operation,
                    Some(message.clone()),
                ));
                tracing::warn!(
                    client = call.client_addr,
                    user = username,
                    "{} failed: {}",
                    operation,
                    message
                );
                Response::from_error(&err)
            }
        }
    }
}

/// Audit label for a content request.
fn content_operation(raw_protocol: &str) -> String {
    format!("get_file_content ({})", raw_protocol)
}

fn optional_str<'a>(params: &'a Params, name: &str) -> DispatchResult<Option<&'a str>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(DispatchError::InvalidParams(format!("{} must be a string", name))),
    }
}

fn required_str<'a>(params: &'a Params, name: &str) -> DispatchResult<&'a str> {
    optional_str(params, name)?
        .ok_or_else(|| DispatchError::InvalidParams(format!("missing {}", name)))
}
