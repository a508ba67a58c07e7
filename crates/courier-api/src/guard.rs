//! Per-operation authorization rules. Each check takes the verified caller
//! identity and the already-fetched target resource and either allows the
//! operation or denies it with the user-visible reason.

use courier_db::models::{MessageRow, UserRow};

use crate::error::ApiError;

/// A message is visible to its two parties only.
pub fn ensure_can_view(caller: &str, message: &MessageRow) -> Result<(), ApiError> {
    if caller == message.from_username || caller == message.to_username {
        Ok(())
    } else {
        Err(ApiError::NotAuthorized(
            "Not authorized to view message details.",
        ))
    }
}

/// Only the recipient may mark a message read. The sender counts as any
/// other third party here.
pub fn ensure_can_mark_read(caller: &str, message: &MessageRow) -> Result<(), ApiError> {
    if caller == message.to_username {
        Ok(())
    } else {
        Err(ApiError::NotAuthorized(
            "Not authorized to mark this message as read.",
        ))
    }
}

/// Sending is open to every authenticated caller; the only resource-level
/// constraint is that the recipient exists. The sender identity always
/// comes from the verified token, never from the request body.
pub fn resolve_recipient(recipient: Option<UserRow>) -> Result<UserRow, ApiError> {
    recipient.ok_or(ApiError::UnknownRecipient)
}
