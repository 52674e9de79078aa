//! Fundflow Projector
//!
//! Keeps the local user projection in sync with the identity service.
//! Messages are decoded from `{type, body}` envelopes and applied
//! idempotently: updates upsert by UUID, deletes deactivate.

pub mod apply;
pub mod error;
pub mod types;

pub use apply::{apply_user_event, decode_envelope, decode_message};
pub use error::{ProjectionError, Result};
pub use types::{UserDeleted, UserEvent, UserEventEnvelope, UserUpdated};
