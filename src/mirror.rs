//! Mirror composition and execution of create / update / delete intents.
//!
//! Ordering rules: create and update perform the platform action first and
//! commit the local row only on success. Delete removes the local row
//! whatever the upstream delete returned, but only after the starboard's
//! identity resolved.
use crate::aggregate::Aggregate;
use crate::db::{self, MirrorRecord, MirrorStoreError, Pool};
use crate::model::{ChannelId, GuildId, Message, MessageId};
use crate::platform::{MirrorContent, Platform, PlatformError, StarButton};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Discord rejects messages with more embeds than this.
pub const MAX_EMBEDS: usize = 10;
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("mirror store error: {0}")]
    Store(#[from] MirrorStoreError),
    #[error("mirror {mirror_id} of message {original_id} is missing from starboard {starboard_channel_id}; record dropped")]
    MirrorMissing {
        original_id: MessageId,
        mirror_id: MessageId,
        starboard_channel_id: ChannelId,
    },
}

pub fn star_button(guild_id: GuildId, message: &Message, tally: &Aggregate) -> StarButton {
    StarButton {
        star_count: tally.unique_count,
        emoji: tally.top_emoji.clone(),
        url: message.jump_url(guild_id),
    }
}

/// Build the mirror of `message`. A reply gets a preview of the message it
/// answers as its first embed.
pub fn compose(guild_id: GuildId, message: &Message, button: StarButton) -> MirrorContent {
    let mut embeds: Vec<Value> = Vec::with_capacity(message.embeds.len() + 1);
    if let Some(referenced) = &message.referenced {
        embeds.push(reply_preview(guild_id, referenced));
    }
    embeds.extend(message.embeds.iter().cloned());
    embeds.truncate(MAX_EMBEDS);

    MirrorContent {
        username: message.author.display_name.clone(),
        avatar_url: message.author.avatar_url.clone(),
        content: message.content.clone(),
        embeds,
        attachments: message.attachments.clone(),
        button,
    }
}

pub fn reply_preview(guild_id: GuildId, referenced: &Message) -> Value {
    let mut author = Map::new();
    author.insert(
        "name".into(),
        json!(format!("Replying to {}", referenced.author.display_name)),
    );
    author.insert("url".into(), json!(referenced.jump_url(guild_id)));
    if let Some(avatar) = &referenced.author.avatar_url {
        author.insert("icon_url".into(), json!(avatar));
    }

    let mut embed = Map::new();
    embed.insert("author".into(), Value::Object(author));
    let text = referenced.content.trim();
    if !text.is_empty() {
        embed.insert("description".into(), json!(truncate(text, PREVIEW_CHARS)));
    }
    Value::Object(embed)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Executes intents for one starboard channel.
pub struct Publisher<'a> {
    pub platform: &'a dyn Platform,
    pub pool: &'a Pool,
    pub webhook_name: &'a str,
    pub guild_id: GuildId,
    pub starboard_channel_id: ChannelId,
}

impl<'a> Publisher<'a> {
    /// Returns `false` when the original turned out to be one of our own
    /// mirrors and nothing was posted.
    #[instrument(skip_all, fields(starboard = self.starboard_channel_id, original = message.id))]
    pub async fn create(&self, message: &Message, tally: &Aggregate) -> Result<bool, ReconcileError> {
        let identity = self
            .platform
            .resolve_or_create_identity(self.starboard_channel_id, self.webhook_name)
            .await?;
        if message.webhook_id == Some(identity.id) {
            debug!("message was posted by the starboard webhook; not mirroring");
            return Ok(false);
        }

        let content = compose(
            self.guild_id,
            message,
            star_button(self.guild_id, message, tally),
        );
        let mirror_id = self.platform.publish(&identity, &content).await?;

        let record = MirrorRecord::new(
            message.id,
            mirror_id,
            self.starboard_channel_id,
            tally.unique_count,
        );
        if let Err(err) = db::insert_mirror(self.pool, &record).await {
            error!(?err, mirror_id, "could not record new mirror; retracting it");
            if let Err(cleanup) = self.platform.delete(&identity, mirror_id).await {
                warn!(?cleanup, mirror_id, "failed to retract unrecorded mirror");
            }
            return Err(err.into());
        }
        info!(mirror_id, stars = tally.unique_count, "mirror created");
        Ok(true)
    }

    /// Only the button changes; mirror content is never re-synced.
    #[instrument(skip_all, fields(starboard = self.starboard_channel_id, original = record.original_id))]
    pub async fn update(
        &self,
        record: &MirrorRecord,
        message: &Message,
        tally: &Aggregate,
    ) -> Result<(), ReconcileError> {
        let identity = self
            .platform
            .resolve_or_create_identity(self.starboard_channel_id, self.webhook_name)
            .await?;
        let button = star_button(self.guild_id, message, tally);

        match self.platform.edit(&identity, record.mirror_id, &button).await {
            Ok(()) => {
                db::update_star_count(
                    self.pool,
                    record.original_id,
                    self.starboard_channel_id,
                    tally.unique_count,
                )
                .await?;
                info!(
                    mirror_id = record.mirror_id,
                    from = record.star_count,
                    to = tally.unique_count,
                    "mirror updated"
                );
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                db::delete_mirror(self.pool, record.original_id, self.starboard_channel_id).await?;
                Err(ReconcileError::MirrorMissing {
                    original_id: record.original_id,
                    mirror_id: record.mirror_id,
                    starboard_channel_id: self.starboard_channel_id,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Upstream "not found" counts as success. Once the starboard's identity
    /// is resolved the local row is removed even if the upstream delete
    /// fails, and that failure is still returned. If the identity cannot be
    /// resolved nothing changes.
    #[instrument(skip_all, fields(starboard = self.starboard_channel_id, original = record.original_id))]
    pub async fn delete(&self, record: &MirrorRecord) -> Result<(), ReconcileError> {
        let identity = self
            .platform
            .resolve_or_create_identity(self.starboard_channel_id, self.webhook_name)
            .await?;
        let upstream = match self.platform.delete(&identity, record.mirror_id).await {
            Err(err) if err.is_not_found() => {
                debug!(mirror_id = record.mirror_id, "mirror already gone upstream");
                Ok(())
            }
            other => other,
        };

        db::delete_mirror(self.pool, record.original_id, self.starboard_channel_id).await?;
        upstream?;
        info!(mirror_id = record.mirror_id, "mirror retracted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emoji::EmojiRef;
    use crate::model::{Author, ReactionSnapshot};

    fn message(id: MessageId, content: &str) -> Message {
        Message {
            id,
            channel_id: 20,
            author: Author {
                id: 5,
                display_name: "Ada".into(),
                avatar_url: Some("https://cdn.example/ada.png".into()),
            },
            content: content.into(),
            embeds: vec![],
            attachments: vec![],
            reactions: vec![],
            referenced: None,
            webhook_id: None,
        }
    }

    fn tally(count: u32) -> Aggregate {
        Aggregate {
            unique_count: count,
            top_emoji: Some(EmojiRef::unicode("⭐")),
            per_emoji_users: ReactionSnapshot::new(),
        }
    }

    #[test]
    fn button_carries_count_emoji_and_jump_url() {
        let button = star_button(1, &message(30, "hi"), &tally(4));
        assert_eq!(button.label(), "4 | Original Message");
        assert_eq!(button.url, "https://discord.com/channels/1/20/30");
        assert_eq!(button.emoji, Some(EmojiRef::unicode("⭐")));
    }

    #[test]
    fn reply_preview_goes_first_and_embeds_are_capped() {
        let mut msg = message(30, "answer");
        msg.embeds = (0..MAX_EMBEDS).map(|i| json!({ "title": i })).collect();
        msg.referenced = Some(Box::new(message(29, &"q".repeat(300))));

        let content = compose(1, &msg, star_button(1, &msg, &tally(3)));
        assert_eq!(content.embeds.len(), MAX_EMBEDS);
        assert_eq!(content.embeds[0]["author"]["name"], "Replying to Ada");
        assert_eq!(
            content.embeds[0]["author"]["url"],
            "https://discord.com/channels/1/20/29"
        );
        let description = content.embeds[0]["description"].as_str().unwrap();
        assert_eq!(description.chars().count(), PREVIEW_CHARS + 1);
        assert!(description.ends_with('…'));
        assert_eq!(content.embeds[1]["title"], 0);
        assert_eq!(content.username, "Ada");
    }

    #[test]
    fn preview_of_empty_reply_has_no_description() {
        let preview = reply_preview(1, &message(29, "   "));
        assert!(preview.get("description").is_none());
    }
}
