//! Wire types for the subset of the Discord HTTP API we touch.
use crate::emoji::EmojiRef;
use crate::model::{Attachment, Author, Message};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const CDN_BASE: &str = "https://cdn.discordapp.com";

/// Discord encodes snowflakes as JSON strings.
fn snowflake<'de, D: Deserializer<'de>>(de: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(de)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn opt_snowflake<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u64>, D::Error> {
    let raw = Option::<String>::deserialize(de)?;
    raw.map(|s| s.parse().map_err(serde::de::Error::custom))
        .transpose()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    #[serde(deserialize_with = "snowflake")]
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMember {
    #[serde(default)]
    pub nick: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiAttachment {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEmoji {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
}

impl ApiEmoji {
    /// `None` for emojis that were deleted from their guild (no name left).
    pub fn to_ref(&self) -> Option<EmojiRef> {
        let name = self.name.clone()?;
        match &self.id {
            Some(id) => Some(EmojiRef::Custom {
                name,
                id: id.parse().ok()?,
                animated: self.animated.unwrap_or(false),
            }),
            None => Some(EmojiRef::Unicode(name)),
        }
    }

    pub fn from_ref(emoji: &EmojiRef) -> Self {
        match emoji {
            EmojiRef::Unicode(value) => ApiEmoji {
                id: None,
                name: Some(value.clone()),
                animated: None,
            },
            EmojiRef::Custom { name, id, animated } => ApiEmoji {
                id: Some(id.to_string()),
                name: Some(name.clone()),
                animated: Some(*animated),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiReaction {
    pub count: u32,
    pub emoji: ApiEmoji,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    #[serde(deserialize_with = "snowflake")]
    pub id: u64,
    #[serde(deserialize_with = "snowflake")]
    pub channel_id: u64,
    pub author: ApiUser,
    #[serde(default)]
    pub member: Option<ApiMember>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<Value>,
    #[serde(default)]
    pub attachments: Vec<ApiAttachment>,
    #[serde(default)]
    pub reactions: Vec<ApiReaction>,
    #[serde(default)]
    pub referenced_message: Option<Box<ApiMessage>>,
    #[serde(default, deserialize_with = "opt_snowflake")]
    pub webhook_id: Option<u64>,
}

impl ApiMessage {
    pub fn into_message(self) -> Message {
        let display_name = self
            .member
            .and_then(|m| m.nick)
            .or(self.author.global_name.clone())
            .unwrap_or_else(|| self.author.username.clone());
        let avatar_url = self.author.avatar.as_ref().map(|hash| {
            let ext = if hash.starts_with("a_") { "gif" } else { "png" };
            format!("{}/avatars/{}/{}.{}", CDN_BASE, self.author.id, hash, ext)
        });

        Message {
            id: self.id,
            channel_id: self.channel_id,
            author: Author {
                id: self.author.id,
                display_name,
                avatar_url,
            },
            content: self.content,
            // Embeds generated by the platform for links cannot be re-sent.
            embeds: self
                .embeds
                .into_iter()
                .filter(|e| e.get("type").and_then(Value::as_str).unwrap_or("rich") == "rich")
                .collect(),
            attachments: self
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    filename: a.filename,
                    url: a.url,
                    content_type: a.content_type,
                })
                .collect(),
            reactions: self
                .reactions
                .iter()
                .filter_map(|r| r.emoji.to_ref())
                .collect(),
            referenced: self
                .referenced_message
                .map(|m| Box::new(m.into_message())),
            webhook_id: self.webhook_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiWebhook {
    #[serde(deserialize_with = "snowflake")]
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// Absent for webhooks owned by other applications.
    #[serde(default)]
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_maps_to_domain() {
        let raw = json!({
            "id": "30",
            "channel_id": "20",
            "author": { "id": "5", "username": "ada", "global_name": "Ada L", "avatar": "a_abc" },
            "content": "hello",
            "embeds": [{ "type": "rich", "title": "kept" }, { "type": "link", "url": "https://x" }],
            "attachments": [{ "filename": "a.png", "url": "https://cdn/a.png", "content_type": "image/png" }],
            "reactions": [
                { "count": 2, "emoji": { "id": null, "name": "⭐" } },
                { "count": 1, "emoji": { "id": "77", "name": "pog", "animated": false } },
                { "count": 1, "emoji": { "id": "78", "name": null } }
            ],
            "referenced_message": {
                "id": "29", "channel_id": "20",
                "author": { "id": "6", "username": "bob" },
                "content": "question"
            },
            "webhook_id": null
        });
        let msg: ApiMessage = serde_json::from_value(raw).unwrap();
        let msg = msg.into_message();
        assert_eq!(msg.author.display_name, "Ada L");
        assert_eq!(
            msg.author.avatar_url.as_deref(),
            Some("https://cdn.discordapp.com/avatars/5/a_abc.gif")
        );
        assert_eq!(msg.embeds.len(), 1);
        assert_eq!(msg.reactions, vec![EmojiRef::unicode("⭐"), EmojiRef::custom("pog", 77)]);
        let reply = msg.referenced.unwrap();
        assert_eq!(reply.author.display_name, "bob");
        assert_eq!(reply.author.avatar_url, None);
    }

    #[test]
    fn emoji_wire_form() {
        let custom = ApiEmoji::from_ref(&EmojiRef::custom("pog", 77));
        assert_eq!(
            serde_json::to_value(&custom).unwrap(),
            json!({ "id": "77", "name": "pog", "animated": false })
        );
        let unicode = ApiEmoji::from_ref(&EmojiRef::unicode("⭐"));
        assert_eq!(serde_json::to_value(&unicode).unwrap(), json!({ "name": "⭐" }));
    }
}
