use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one conversation: a contact plus an optional estimate the
/// thread is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub contact_id: String,
    pub estimate_id: Option<String>,
}

impl ConversationKey {
    pub fn new(contact_id: impl Into<String>, estimate_id: Option<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            estimate_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SenderType {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Photo,
    Video,
    Audio,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: Option<String>,
}

/// A single chat message. The `id` is server-assigned and absent only while
/// a locally-sent message awaits its save confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Option<String>,
    pub contact_id: String,
    #[serde(default)]
    pub estimate_id: Option<String>,
    pub sender_type: SenderType,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey {
            contact_id: self.contact_id.clone(),
            estimate_id: self.estimate_id.clone(),
        }
    }

    /// Whether this message belongs to the given conversation.
    pub fn belongs_to(&self, key: &ConversationKey) -> bool {
        self.contact_id == key.contact_id && self.estimate_id == key.estimate_id
    }
}

/// Pagination counters for one conversation's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl Pagination {
    pub fn has_more(&self) -> bool {
        u64::from(self.page) * u64::from(self.per_page) < self.total
    }
}
