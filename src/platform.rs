//! Contract the reconciliation core needs from the chat platform.
use crate::emoji::EmojiRef;
use crate::model::{Attachment, ChannelId, Message, MessageId, ReactionSnapshot};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}

/// Handle for posting into a starboard channel as someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: u64,
    pub token: String,
    pub channel_id: ChannelId,
}

/// The link button under a mirror. Its label is the only part of a mirror
/// that changes after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarButton {
    pub star_count: u32,
    pub emoji: Option<EmojiRef>,
    pub url: String,
}

impl StarButton {
    pub fn label(&self) -> String {
        format!("{} | Original Message", self.star_count)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorContent {
    pub username: String,
    pub avatar_url: Option<String>,
    pub content: String,
    pub embeds: Vec<Value>,
    /// Re-hosted by the platform adapter.
    pub attachments: Vec<Attachment>,
    pub button: StarButton,
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Message, PlatformError>;

    /// Users per emoji, in the message's reaction order.
    async fn list_reactions(&self, message: &Message) -> Result<ReactionSnapshot, PlatformError>;

    async fn resolve_or_create_identity(
        &self,
        channel_id: ChannelId,
        name: &str,
    ) -> Result<Identity, PlatformError>;

    async fn publish(
        &self,
        identity: &Identity,
        content: &MirrorContent,
    ) -> Result<MessageId, PlatformError>;

    async fn edit(
        &self,
        identity: &Identity,
        mirror_id: MessageId,
        button: &StarButton,
    ) -> Result<(), PlatformError>;

    async fn delete(&self, identity: &Identity, mirror_id: MessageId) -> Result<(), PlatformError>;
}
