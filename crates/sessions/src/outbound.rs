//! Composition of an outbound message into individual provider sends.
//!
//! Images go first with the text as the caption of the first image.  When
//! documents are present the text is also sent as a standalone message,
//! after any images and before the documents.  Attachments with an empty
//! body or an unsupported MIME type are dropped.

use serde::{Deserialize, Serialize};

use crate::provider::{MessageContent, SendOptions};

/// A binary payload with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    #[serde(default)]
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Document,
    Unsupported,
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        let mime = self.mime_type.to_ascii_lowercase();
        if mime.starts_with("image/") {
            AttachmentKind::Image
        } else if mime.contains("pdf") || mime.contains("doc") {
            AttachmentKind::Document
        } else {
            AttachmentKind::Unsupported
        }
    }
}

/// What a caller asks to deliver to one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// One provider call produced by [`OutboundMessage::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSend {
    pub content: MessageContent,
    pub options: SendOptions,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Order the sends this message expands to.  Empty when there is
    /// nothing deliverable.
    pub fn plan(&self) -> Vec<PlannedSend> {
        let text = self.text.as_deref().filter(|t| !t.is_empty());

        let (mut images, mut documents) = (Vec::new(), Vec::new());
        for att in self.attachments.iter().filter(|a| !a.data.is_empty()) {
            match att.kind() {
                AttachmentKind::Image => images.push(att),
                AttachmentKind::Document => documents.push(att),
                AttachmentKind::Unsupported => {
                    tracing::debug!(mime = %att.mime_type, "dropping unsupported attachment");
                }
            }
        }

        let mut plan = Vec::with_capacity(images.len() + documents.len() + 1);
        for (i, img) in images.iter().enumerate() {
            plan.push(PlannedSend {
                content: MessageContent::Media((*img).clone()),
                options: SendOptions {
                    caption: if i == 0 { text.map(str::to_owned) } else { None },
                },
            });
        }

        let text_standalone = images.is_empty() || !documents.is_empty();
        if let (Some(t), true) = (text, text_standalone) {
            plan.push(PlannedSend {
                content: MessageContent::Text(t.to_owned()),
                options: SendOptions::default(),
            });
        }

        for doc in documents {
            plan.push(PlannedSend {
                content: MessageContent::Media(doc.clone()),
                options: SendOptions::default(),
            });
        }
        plan
    }
}
