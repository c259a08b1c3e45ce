//! Wire types: delivery protocols and the uniform response envelope.

use crate::error::DispatchError;
use crate::registry::SyncId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Delivery guarantee requested for a file-content exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Protocol {
    /// `R`: content delivered, nothing tracked.
    #[default]
    #[serde(rename = "R")]
    Request,
    /// `RR`: content delivered, client must confirm.
    #[serde(rename = "RR")]
    RequestReply,
    /// `RRA`: content delivered, client must confirm and acknowledge.
    #[serde(rename = "RRA")]
    RequestReplyAck,
}

impl Protocol {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Request => "R",
            Protocol::RequestReply => "RR",
            Protocol::RequestReplyAck => "RRA",
        }
    }

    /// Returns true if serving content under this protocol creates a record.
    pub fn is_tracked(&self) -> bool {
        !matches!(self, Protocol::Request)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R" => Ok(Protocol::Request),
            "RR" => Ok(Protocol::RequestReply),
            "RRA" => Ok(Protocol::RequestReplyAck),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

/// Operation-specific response fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Result of `get_file_content`.
    FileContent {
        /// File text.
        content: String,
        /// Version of exactly this content.
        version: String,
        /// Protocol the content was served under.
        protocol: Protocol,
        /// Record id for RR/RRA; absent for R.
        #[serde(skip_serializing_if = "Option::is_none")]
        sync_id: Option<SyncId>,
    },
    /// Result of `check_master_version`.
    MasterVersion {
        /// Current version.
        version: String,
        /// Modification time in Unix seconds.
        last_modified: f64,
    },
    /// Result of `confirm_sync`.
    Confirmed {
        /// Record id.
        sync_id: SyncId,
        /// Always true.
        confirmed: bool,
    },
    /// Result of `acknowledge_sync`.
    Acknowledged {
        /// Record id.
        sync_id: SyncId,
        /// Always true.
        acknowledged: bool,
    },
}

/// Uniform envelope returned by every remote call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Whether the call succeeded.
    pub success: bool,
    /// Failure text; absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server time in Unix seconds.
    pub timestamp: f64,
    /// Operation fields, flattened into the envelope.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    /// Set when the failure was the server's fault rather than the caller's.
    #[serde(skip)]
    pub server_fault: bool,
}

impl Response {
    /// Creates a successful response.
    pub fn success(payload: Payload) -> Self {
        Self {
            success: true,
            error: None,
            timestamp: now_secs(),
            payload: Some(payload),
            server_fault: false,
        }
    }

    /// Creates a failed response.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            timestamp: now_secs(),
            payload: None,
            server_fault: false,
        }
    }

    /// Creates a failed response from a dispatch error.
    pub fn from_error(err: &DispatchError) -> Self {
        Self {
            server_fault: err.is_server_error(),
            ..Self::failure(err.to_string())
        }
    }

    /// Returns the record id carried by the response, if any.
    pub fn sync_id(&self) -> Option<SyncId> {
        match &self.payload {
            Some(Payload::FileContent { sync_id, .. }) => *sync_id,
            Some(Payload::Confirmed { sync_id, .. })
            | Some(Payload::Acknowledged { sync_id, .. }) => Some(*sync_id),
            _ => None,
        }
    }

    /// Returns the version carried by the response, if any.
    pub fn version(&self) -> Option<&str> {
        match &self.payload {
            Some(Payload::FileContent { version, .. })
            | Some(Payload::MasterVersion { version, .. }) => Some(version),
            _ => None,
        }
    }

    /// Serializes to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "success": false,
                "error": format!("failed to encode response: {}", e),
            })
        })
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn protocol_wire_names() {
        for protocol in [
            Protocol::Request,
            Protocol::RequestReply,
            Protocol::RequestReplyAck,
        ] {
            assert_eq!(protocol.as_str().parse::<Protocol>(), Ok(protocol));
            assert_eq!(
                serde_json::to_value(protocol).unwrap(),
                json!(protocol.as_str())
            );
        }
        assert!("rr".parse::<Protocol>().is_err());
        assert!(!Protocol::Request.is_tracked());
        assert!(Protocol::RequestReplyAck.is_tracked());
    }

    #[test]
    fn failure_envelope_shape() {
        let json = Response::failure("Invalid credentials").to_json();
        assert_eq!(json["success"], json!(false));
        assert_eq!(json["error"], json!("Invalid credentials"));
        assert!(json["timestamp"].is_f64());
        assert!(json.get("content").is_none());
    }

    #[test]
    fn server_fault_is_not_serialized() {
        let response = Response::from_error(&DispatchError::Internal("disk gone".into()));
        assert!(response.server_fault);
        assert!(response.to_json().get("server_fault").is_none());

        let response = Response::from_error(&DispatchError::AuthenticationFailed);
        assert!(!response.server_fault);
        assert_eq!(response.error.as_deref(), Some("Invalid credentials"));
    }

    #[test]
    fn fire_and_forget_content_has_no_sync_id() {
        let response = Response::success(Payload::FileContent {
            content: "abc".into(),
            version: "v1".into(),
            protocol: Protocol::Request,
            sync_id: None,
        });
        let json = response.to_json();
        assert_eq!(json["success"], json!(true));
        assert!(json.get("error").is_none());
        assert_eq!(json["content"], json!("abc"));
        assert_eq!(json["version"], json!("v1"));
        assert_eq!(json["protocol"], json!("R"));
        assert!(json.get("sync_id").is_none());
        assert_eq!(response.sync_id(), None);
    }

    #[test]
    fn confirmation_fields_are_flattened() {
        let id = SyncId::new();
        let json = Response::success(Payload::Confirmed {
            sync_id: id,
            confirmed: true,
        })
        .to_json();
        assert_eq!(json["confirmed"], json!(true));
        assert_eq!(json["sync_id"], json!(id.to_string()));
    }
}
