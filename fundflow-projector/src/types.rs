//! Identity event payload types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire type of a user update
pub const USER_UPDATE: &str = "user_update";

/// Wire type of a user deletion
pub const USER_DELETE: &str = "user_delete";

/// Message envelope as published by the identity service.
///
/// `body` is either a JSON object or a JSON-encoded string holding one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub body: serde_json::Value,
}

/// `user_update` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub user_uuid: Uuid,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub version: Option<i64>,
}

/// `user_delete` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeleted {
    pub user_uuid: Uuid,
    #[serde(default)]
    pub version: Option<i64>,
}

/// Decoded, validated identity event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEvent {
    Updated(UserUpdated),
    Deleted(UserDeleted),
}

impl UserEvent {
    /// Wire type name
    pub fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Updated(_) => USER_UPDATE,
            UserEvent::Deleted(_) => USER_DELETE,
        }
    }

    /// User the event is about
    pub fn user_uuid(&self) -> Uuid {
        match self {
            UserEvent::Updated(e) => e.user_uuid,
            UserEvent::Deleted(e) => e.user_uuid,
        }
    }

    /// Optional producer version
    pub fn version(&self) -> Option<i64> {
        match self {
            UserEvent::Updated(e) => e.version,
            UserEvent::Deleted(e) => e.version,
        }
    }
}
