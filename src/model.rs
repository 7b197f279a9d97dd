use crate::emoji::EmojiRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub type GuildId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type UserId = u64;

/// Why a reaction-changed event fired. All causes share one entry point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReactionCause {
    Add,
    Remove,
    Clear,
    ClearEmoji,
}

impl ReactionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionCause::Add => "add",
            ReactionCause::Remove => "remove",
            ReactionCause::Clear => "clear",
            ReactionCause::ClearEmoji => "clear_emoji",
        }
    }
}

/// Normalized reaction-changed event. `emoji` is absent for a full clear.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionEvent {
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub emoji: Option<EmojiRef>,
    pub cause: ReactionCause,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    pub content_type: Option<String>,
}

/// A chat message as the reconciliation core sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author: Author,
    pub content: String,
    /// Platform embed payloads, forwarded untouched.
    pub embeds: Vec<Value>,
    pub attachments: Vec<Attachment>,
    /// Emojis reacted on the message, in platform order.
    pub reactions: Vec<EmojiRef>,
    pub referenced: Option<Box<Message>>,
    pub webhook_id: Option<u64>,
}

impl Message {
    pub fn jump_url(&self, guild_id: GuildId) -> String {
        jump_url(guild_id, self.channel_id, self.id)
    }
}

pub fn jump_url(guild_id: GuildId, channel_id: ChannelId, message_id: MessageId) -> String {
    format!(
        "https://discord.com/channels/{}/{}/{}",
        guild_id, channel_id, message_id
    )
}

/// Users per emoji for one message, kept in insertion order so that tie
/// breaks downstream are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSnapshot {
    entries: Vec<(EmojiRef, BTreeSet<UserId>)>,
}

impl ReactionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds users under `emoji`, merging into an existing entry that is the
    /// same emoji under another representation.
    pub fn insert(&mut self, emoji: EmojiRef, users: impl IntoIterator<Item = UserId>) {
        match self.entries.iter_mut().find(|(e, _)| *e == emoji) {
            Some((_, existing)) => existing.extend(users),
            None => self.entries.push((emoji, users.into_iter().collect())),
        }
    }

    pub fn with(mut self, emoji: EmojiRef, users: impl IntoIterator<Item = UserId>) -> Self {
        self.insert(emoji, users);
        self
    }

    pub fn get(&self, emoji: &EmojiRef) -> Option<&BTreeSet<UserId>> {
        self.entries.iter().find(|(e, _)| e == emoji).map(|(_, u)| u)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EmojiRef, &BTreeSet<UserId>)> {
        self.entries.iter().map(|(e, u)| (e, u))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_merges_equivalent_emojis_in_first_position() {
        let snapshot = ReactionSnapshot::new()
            .with(EmojiRef::unicode("⭐"), [1, 2])
            .with(EmojiRef::unicode("🔥"), [3])
            .with(EmojiRef::unicode("⭐\u{fe0f}"), [4]);
        assert_eq!(snapshot.len(), 2);
        let order: Vec<_> = snapshot.iter().map(|(e, _)| e.to_string()).collect();
        assert_eq!(order, vec!["⭐", "🔥"]);
        assert_eq!(snapshot.get(&EmojiRef::unicode("⭐")).unwrap().len(), 3);
    }

    #[test]
    fn event_parses_from_json() {
        let raw = r#"{"guild_id":1,"channel_id":2,"message_id":3,"emoji":"⭐","cause":"clear_emoji"}"#;
        let event: ReactionEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.cause, ReactionCause::ClearEmoji);
        assert_eq!(event.emoji, Some(EmojiRef::unicode("⭐")));
    }
}
