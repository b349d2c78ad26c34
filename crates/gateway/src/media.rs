//! Attachment loading for the CLI.

use std::path::Path;

use anyhow::Context;

use pl_sessions::{Attachment, AttachmentKind};

/// Guess a MIME type from the file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Read a file into an [`Attachment`].  Unsupported types are still
/// returned; the caller decides whether to warn.
pub fn load_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let attachment = Attachment {
        mime_type: mime_for_path(path).to_owned(),
        filename: path.file_name().and_then(|n| n.to_str()).map(str::to_owned),
        data,
    };
    if attachment.kind() == AttachmentKind::Unsupported {
        tracing::warn!(path = %path.display(), "unsupported attachment type; it will be skipped");
    }
    Ok(attachment)
}
