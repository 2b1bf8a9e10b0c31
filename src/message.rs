//! Chat messages and attachments exchanged with LLM providers.
//!
//! Messages form the cross-node conversation history and the payload of
//! every provider call. Content is either plain text or a sequence of
//! multimodal parts; attachments supplied with the run input are folded
//! into user messages subject to model capabilities.

use serde::{Deserialize, Serialize};

/// A message in a conversation, carrying a role and content.
///
/// # Examples
///
/// ```
/// use canvasflow::message::ChatMessage;
///
/// let user = ChatMessage::user("What's in the attached file?");
/// let system = ChatMessage::system("You are a careful analyst.");
/// assert!(user.has_role(ChatMessage::USER));
/// assert_eq!(system.text(), "You are a careful analyst.");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (`user`, `assistant`, `system`).
    pub role: String,
    /// Plain text or multimodal content parts.
    pub content: MessageContent,
}

impl ChatMessage {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new text message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// Creates a user message with the specified text content.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified text content.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified text content.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Creates a user message from multimodal content parts.
    #[must_use]
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Self::USER.to_string(),
            content: MessageContent::Parts(parts),
        }
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    /// The textual rendering of the content; multimodal parts are joined
    /// with newlines, non-text parts contribute a placeholder.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.to_text()
    }
}

/// Message content: a plain string or ordered multimodal parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::ImageUrl { .. } => "[image]".to_string(),
                    ContentPart::File { name, .. } => format!("[file: {name}]"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

/// One part of a multimodal message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
    File { name: String, data: String },
}

/// A file or image supplied alongside the run input.
///
/// Attachments travel with the execution context; the agent handler folds
/// them into user messages, gating images on the model's input
/// modalities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    /// Base64 payload or data URL, passed to the provider verbatim.
    pub data: String,
    pub kind: AttachmentKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

impl Attachment {
    /// Convert this attachment into the content part sent to providers.
    #[must_use]
    pub fn to_part(&self) -> ContentPart {
        match self.kind {
            AttachmentKind::Image => ContentPart::ImageUrl {
                url: self.data.clone(),
            },
            AttachmentKind::File => ContentPart::File {
                name: self.name.clone(),
                data: self.data.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convenience_constructors_set_roles() {
        assert_eq!(ChatMessage::user("hi").role, ChatMessage::USER);
        assert_eq!(ChatMessage::assistant("hi").role, ChatMessage::ASSISTANT);
        assert_eq!(ChatMessage::system("hi").role, ChatMessage::SYSTEM);
    }

    #[test]
    fn text_content_round_trips_through_json() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hello"}"#);
        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn multimodal_content_renders_placeholders() {
        let msg = ChatMessage::user_parts(vec![
            ContentPart::Text {
                text: "look at this".into(),
            },
            ContentPart::ImageUrl {
                url: "data:image/png;base64,AAA".into(),
            },
        ]);
        assert_eq!(msg.text(), "look at this\n[image]");
    }

    #[test]
    fn image_attachment_becomes_image_part() {
        let attachment = Attachment {
            name: "chart.png".into(),
            mime_type: "image/png".into(),
            data: "data:image/png;base64,AAA".into(),
            kind: AttachmentKind::Image,
        };
        assert!(matches!(
            attachment.to_part(),
            ContentPart::ImageUrl { .. }
        ));
    }
}
