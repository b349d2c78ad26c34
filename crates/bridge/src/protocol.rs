//! Wire types exchanged with the helper process.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pl_sessions::{Attachment, HandleEvent, MessageContent, SendOptions};

/// A request written to the helper's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeRequest {
    pub id: u64,
    #[serde(flatten)]
    pub op: BridgeOp,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeOp {
    Initialize,
    Send {
        target: String,
        content: WireContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    ResolveTarget {
        address: String,
    },
    ConnectionState,
    Destroy,
}

impl BridgeOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Send { .. } => "send",
            Self::ResolveTarget { .. } => "resolve_target",
            Self::ConnectionState => "connection_state",
            Self::Destroy => "destroy",
        }
    }

    pub fn send(target: &str, content: &MessageContent, options: &SendOptions) -> Self {
        Self::Send {
            target: target.to_owned(),
            content: WireContent::from(content),
            caption: options.caption.clone(),
        }
    }
}

/// Message content with media bodies base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContent {
    Text {
        text: String,
    },
    Media {
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        data: String,
    },
}

impl From<&MessageContent> for WireContent {
    fn from(content: &MessageContent) -> Self {
        match content {
            MessageContent::Text(text) => Self::Text { text: text.clone() },
            MessageContent::Media(Attachment {
                mime_type,
                filename,
                data,
            }) => Self::Media {
                mime_type: mime_type.clone(),
                filename: filename.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(data),
            },
        }
    }
}

/// Anything the helper writes to stdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Response(BridgeResponse),
    Event { event: HandleEvent },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BridgeResponse {
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
