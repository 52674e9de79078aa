//! Decoding and application of identity events.
//!
//! Application is idempotent and safe for replay: updates upsert by UUID,
//! deletes only flip `active`, and versioned events older than the stored
//! version are skipped.

use crate::error::{ProjectionError, Result};
use crate::types::{UserDeleted, UserEvent, UserEventEnvelope, UserUpdated, USER_DELETE, USER_UPDATE};
use fundflow_domain::validate_email;
use fundflow_store::{ProjectionOutcome, UserProjection};
use serde::de::DeserializeOwned;

/// Decode a raw `{type, body}` envelope.
pub fn decode_envelope(raw: &[u8]) -> Result<UserEvent> {
    let envelope: UserEventEnvelope = serde_json::from_slice(raw)?;
    decode_message(&envelope.event_type, envelope.body)
}

/// Decode and validate a message body for `event_type`.
pub fn decode_message(event_type: &str, body: serde_json::Value) -> Result<UserEvent> {
    let event = match event_type {
        USER_UPDATE => {
            let payload: UserUpdated = parse_body(event_type, body)?;
            validate_email(&payload.email)
                .map_err(|e| ProjectionError::invalid(event_type, e.to_string()))?;
            UserEvent::Updated(UserUpdated {
                email: payload.email.trim().to_string(),
                ..payload
            })
        },
        USER_DELETE => UserEvent::Deleted(parse_body::<UserDeleted>(event_type, body)?),
        other => {
            tracing::warn!(event_type = other, "Unrecognized user message type");
            return Err(ProjectionError::UnknownEventType(other.to_string()));
        },
    };

    if matches!(event.version(), Some(v) if v < 0) {
        return Err(ProjectionError::invalid(event_type, "version must not be negative"));
    }
    Ok(event)
}

fn parse_body<T: DeserializeOwned>(event_type: &str, body: serde_json::Value) -> Result<T> {
    // Producers may send the body as a JSON-encoded string
    let body = match body {
        serde_json::Value::String(encoded) => serde_json::from_str(&encoded)
            .map_err(|e| ProjectionError::invalid(event_type, e.to_string()))?,
        other => other,
    };
    serde_json::from_value(body).map_err(|e| ProjectionError::invalid(event_type, e.to_string()))
}

/// Apply a decoded event to the projection.
pub async fn apply_user_event(
    projection: &dyn UserProjection,
    event: &UserEvent,
) -> Result<ProjectionOutcome> {
    let outcome = match event {
        UserEvent::Updated(e) => {
            projection.upsert_user(e.user_uuid, &e.email, &e.roles, e.version).await?
        },
        UserEvent::Deleted(e) => projection.deactivate_user(e.user_uuid, e.version).await?,
    };

    match (event, outcome) {
        (UserEvent::Updated(_), ProjectionOutcome::Applied) => tracing::info!(
            user_uuid = %event.user_uuid(),
            version = ?event.version(),
            "User projection updated"
        ),
        (UserEvent::Deleted(_), ProjectionOutcome::Applied) => tracing::info!(
            user_uuid = %event.user_uuid(),
            version = ?event.version(),
            "User projection deactivated"
        ),
        (_, ProjectionOutcome::Stale) => tracing::debug!(
            user_uuid = %event.user_uuid(),
            event_type = event.event_type(),
            version = ?event.version(),
            "User projection event stale, skipped"
        ),
        (_, ProjectionOutcome::Missing) => tracing::debug!(
            user_uuid = %event.user_uuid(),
            "User projection delete for unknown user, skipped"
        ),
    }

    Ok(outcome)
}

// =============================================================================
// Tests
// =============================================================================
