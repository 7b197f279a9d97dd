use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::discord::model::{ApiEmoji, ApiMessage, ApiUser, ApiWebhook};
use crate::model::{ChannelId, Message, MessageId, ReactionSnapshot};
use crate::platform::{Identity, MirrorContent, Platform, PlatformError, StarButton};

pub mod model;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10/";
const REACTION_PAGE: usize = 100;

#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for DiscordClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteWebhookResponse {
    id: String,
}

impl DiscordClient {
    pub fn new(token: String) -> anyhow::Result<Self> {
        let base_url = Url::parse(DISCORD_API_BASE).context("invalid default Discord URL")?;
        Self::with_base_url(token, base_url)
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let base_url = Url::parse(&cfg.discord.api_base).context("invalid discord.api_base")?;
        Self::with_base_url(cfg.discord.bot_token.clone(), base_url)
    }

    pub fn with_base_url(token: String, base_url: Url) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("DiscordBot (breadboard, ", env!("CARGO_PKG_VERSION"), ")"))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, PlatformError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| anyhow!("Discord base URL cannot be a base"))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token))
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response, PlatformError> {
        let res = builder
            .send()
            .await
            .with_context(|| format!("failed to reach Discord ({})", what))?;
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        debug!(%status, what, body = %body, "discord request failed");
        Err(match status {
            StatusCode::NOT_FOUND => PlatformError::NotFound(format!("{}: {}", what, body)),
            StatusCode::FORBIDDEN => PlatformError::Forbidden(format!("{}: {}", what, body)),
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(what, "rate limited by Discord");
                PlatformError::RateLimited(format!("{}: {}", what, body))
            }
            _ => PlatformError::Other(anyhow!("discord error {} on {}: {}", status, what, body)),
        })
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T, PlatformError> {
        let res = self.send(builder, what).await?;
        let body = res
            .json::<T>()
            .await
            .with_context(|| format!("invalid Discord response ({})", what))?;
        Ok(body)
    }

    async fn users_for(
        &self,
        message: &Message,
        emoji: &ApiEmoji,
        path: &str,
    ) -> Result<Vec<u64>, PlatformError> {
        let mut users = Vec::new();
        let mut after: Option<u64> = None;
        loop {
            let mut url = self.endpoint(&[
                "channels",
                &message.channel_id.to_string(),
                "messages",
                &message.id.to_string(),
                "reactions",
                path,
            ])?;
            url.query_pairs_mut()
                .append_pair("limit", &REACTION_PAGE.to_string());
            if let Some(after) = after {
                url.query_pairs_mut().append_pair("after", &after.to_string());
            }
            let page: Vec<ApiUser> = self
                .json(self.request(Method::GET, url), "list reaction users")
                .await?;
            let len = page.len();
            after = page.last().map(|u| u.id);
            users.extend(page.into_iter().map(|u| u.id));
            if len < REACTION_PAGE {
                break;
            }
        }
        debug!(emoji = ?emoji.name, count = users.len(), "listed reaction users");
        Ok(users)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, PlatformError> {
        // CDN links are pre-signed; no bot authorization header.
        let res = self.send(self.http.get(url), "download attachment").await?;
        let bytes = res
            .bytes()
            .await
            .context("failed to read attachment body")?;
        Ok(bytes.to_vec())
    }

    fn webhook_url(&self, identity: &Identity, tail: &[&str]) -> Result<Url, PlatformError> {
        let id = identity.id.to_string();
        let mut segments = vec!["webhooks", id.as_str(), identity.token.as_str()];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }
}

/// Action row holding the single link button.
pub fn button_components(button: &StarButton) -> Value {
    let mut link = json!({
        "type": 2,
        "style": 5,
        "label": button.label(),
        "url": button.url,
    });
    if let Some(emoji) = &button.emoji {
        link["emoji"] = json!(ApiEmoji::from_ref(emoji));
    }
    json!([{ "type": 1, "components": [link] }])
}

pub fn build_publish_payload(content: &MirrorContent) -> Value {
    let attachments: Vec<Value> = content
        .attachments
        .iter()
        .enumerate()
        .map(|(i, a)| json!({ "id": i, "filename": a.filename }))
        .collect();
    let mut payload = json!({
        "username": content.username,
        "content": content.content,
        "embeds": content.embeds,
        "attachments": attachments,
        "allowed_mentions": { "parse": [] },
        "components": button_components(&content.button),
    });
    if let Some(avatar) = &content.avatar_url {
        payload["avatar_url"] = json!(avatar);
    }
    payload
}

#[async_trait]
impl Platform for DiscordClient {
    #[instrument(skip(self))]
    async fn fetch_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Message, PlatformError> {
        let url = self.endpoint(&[
            "channels",
            &channel_id.to_string(),
            "messages",
            &message_id.to_string(),
        ])?;
        let msg: ApiMessage = self
            .json(self.request(Method::GET, url), "fetch message")
            .await?;
        Ok(msg.into_message())
    }

    #[instrument(skip_all, fields(message = message.id))]
    async fn list_reactions(&self, message: &Message) -> Result<ReactionSnapshot, PlatformError> {
        let mut snapshot = ReactionSnapshot::new();
        for emoji in &message.reactions {
            let wire = ApiEmoji::from_ref(emoji);
            let users = self.users_for(message, &wire, &emoji.api_path()).await?;
            snapshot.insert(emoji.clone(), users);
        }
        Ok(snapshot)
    }

    #[instrument(skip(self))]
    async fn resolve_or_create_identity(
        &self,
        channel_id: ChannelId,
        name: &str,
    ) -> Result<Identity, PlatformError> {
        let url = self.endpoint(&["channels", &channel_id.to_string(), "webhooks"])?;
        let hooks: Vec<ApiWebhook> = self
            .json(self.request(Method::GET, url.clone()), "list webhooks")
            .await?;
        let existing = hooks
            .into_iter()
            .find(|h| h.name.as_deref() == Some(name) && h.token.is_some());
        let hook = match existing {
            Some(hook) => hook,
            None => {
                info!(channel_id, name, "creating starboard webhook");
                self.json(
                    self.request(Method::POST, url).json(&json!({ "name": name })),
                    "create webhook",
                )
                .await?
            }
        };
        let token = hook
            .token
            .ok_or_else(|| anyhow!("webhook {} came back without a token", hook.id))?;
        Ok(Identity {
            id: hook.id,
            token,
            channel_id,
        })
    }

    #[instrument(skip_all, fields(webhook = identity.id))]
    async fn publish(
        &self,
        identity: &Identity,
        content: &MirrorContent,
    ) -> Result<MessageId, PlatformError> {
        let files = try_join_all(content.attachments.iter().map(|a| self.download(&a.url))).await?;

        let payload = build_publish_payload(content);
        let mut form = Form::new().text("payload_json", payload.to_string());
        for (i, (attachment, bytes)) in content.attachments.iter().zip(files).enumerate() {
            let mut part = Part::bytes(bytes).file_name(attachment.filename.clone());
            if let Some(mime) = &attachment.content_type {
                part = part.mime_str(mime).context("invalid attachment content type")?;
            }
            form = form.part(format!("files[{}]", i), part);
        }

        let mut url = self.webhook_url(identity, &[])?;
        url.query_pairs_mut()
            .append_pair("wait", "true")
            .append_pair("with_components", "true");
        let res: ExecuteWebhookResponse = self
            .json(self.http.post(url).multipart(form), "execute webhook")
            .await?;
        let id = res
            .id
            .parse()
            .context("webhook message id is not a snowflake")?;
        Ok(id)
    }

    #[instrument(skip_all, fields(webhook = identity.id, mirror_id = mirror_id))]
    async fn edit(
        &self,
        identity: &Identity,
        mirror_id: MessageId,
        button: &StarButton,
    ) -> Result<(), PlatformError> {
        let mirror = mirror_id.to_string();
        let url = self.webhook_url(identity, &["messages", &mirror])?;
        let body = json!({ "components": button_components(button) });
        self.send(self.http.patch(url).json(&body), "edit mirror")
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(webhook = identity.id, mirror_id = mirror_id))]
    async fn delete(&self, identity: &Identity, mirror_id: MessageId) -> Result<(), PlatformError> {
        let mirror = mirror_id.to_string();
        let url = self.webhook_url(identity, &["messages", &mirror])?;
        self.send(self.http.delete(url), "delete mirror").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emoji::EmojiRef;
    use crate::model::Attachment;

    fn button() -> StarButton {
        StarButton {
            star_count: 5,
            emoji: Some(EmojiRef::custom("pog", 77)),
            url: "https://discord.com/channels/1/2/3".into(),
        }
    }

    #[test]
    fn endpoint_encodes_unicode_emoji_segments() {
        let client = DiscordClient::new("t".into()).unwrap();
        let url = client
            .endpoint(&["channels", "2", "messages", "3", "reactions", "⭐"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://discord.com/api/v10/channels/2/messages/3/reactions/%E2%AD%90"
        );
    }

    #[test]
    fn button_payload_shape() {
        let components = button_components(&button());
        let link = &components[0]["components"][0];
        assert_eq!(components[0]["type"], 1);
        assert_eq!(link["style"], 5);
        assert_eq!(link["label"], "5 | Original Message");
        assert_eq!(link["emoji"]["id"], "77");
    }

    #[test]
    fn publish_payload_disables_mentions_and_lists_files() {
        let content = MirrorContent {
            username: "Ada".into(),
            avatar_url: None,
            content: "@everyone look".into(),
            embeds: vec![],
            attachments: vec![Attachment {
                filename: "cat.png".into(),
                url: "https://cdn/cat.png".into(),
                content_type: Some("image/png".into()),
            }],
            button: button(),
        };
        let payload = build_publish_payload(&content);
        assert_eq!(payload["allowed_mentions"]["parse"], json!([]));
        assert_eq!(payload["attachments"][0]["filename"], "cat.png");
        assert!(payload.get("avatar_url").is_none());
    }

    #[test]
    fn webhook_url_includes_token() {
        let client = DiscordClient::new("t".into()).unwrap();
        let identity = Identity {
            id: 9,
            token: "secret".into(),
            channel_id: 4,
        };
        let url = client.webhook_url(&identity, &["messages", "11"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://discord.com/api/v10/webhooks/9/secret/messages/11"
        );
    }
}
