//! Attachment policy of the external attachment store, applied to the
//! metadata a send presents. The store enforces the same limits at upload
//! time; re-checking here keeps a rejected reference out of the message log.

use thiserror::Error;

use hirewire_types::models::Attachment;

/// 10 MiB upload limit.
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// Mime types the attachment store accepts: PDF, PNG, JPEG, the common
/// office document formats, and plain text.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/plain",
];

#[derive(Debug, Error)]
pub enum AttachmentViolation {
    #[error("attachment too large: {size_bytes} bytes (limit {limit_bytes})")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },

    #[error("unsupported attachment type: {mime_type}")]
    UnsupportedType { mime_type: String },
}

pub fn check_policy(attachment: &Attachment) -> Result<(), AttachmentViolation> {
    if attachment.size_bytes > MAX_ATTACHMENT_BYTES {
        return Err(AttachmentViolation::TooLarge {
            size_bytes: attachment.size_bytes,
            limit_bytes: MAX_ATTACHMENT_BYTES,
        });
    }

    if !ALLOWED_MIME_TYPES.contains(&attachment.mime_type.as_str()) {
        return Err(AttachmentViolation::UnsupportedType {
            mime_type: attachment.mime_type.clone(),
        });
    }

    Ok(())
}
