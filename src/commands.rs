//! Starboard management commands.
//!
//! Every mutating command runs through [`ConfigStore::mutate`] under the
//! guild's exclusive lock; a rejected command changes nothing.
use crate::config::ConfigError;
use crate::emoji::EmojiRef;
use crate::guilds::{ChannelConfig, ConfigStore, GuildConfig, Override};
use crate::model::{ChannelId, GuildId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    AddStarboard {
        channel_id: ChannelId,
        required_reactions: u32,
        emojis: Vec<EmojiRef>,
    },
    SetThreshold {
        channel_id: ChannelId,
        required_reactions: u32,
    },
    RemoveStarboard {
        channel_id: ChannelId,
    },
    AddEmoji {
        channel_id: ChannelId,
        emoji: EmojiRef,
    },
    RemoveEmoji {
        channel_id: ChannelId,
        emoji: EmojiRef,
    },
    SetOverride {
        channel_id: ChannelId,
        source_channel_id: ChannelId,
        required_reactions: Option<u32>,
        extra_emojis: Option<Vec<EmojiRef>>,
    },
    ClearOverride {
        channel_id: ChannelId,
        source_channel_id: ChannelId,
    },
    AddExclude {
        channel_id: ChannelId,
        source_channel_id: ChannelId,
    },
    RemoveExclude {
        channel_id: ChannelId,
        source_channel_id: ChannelId,
    },
    ListExcludes {
        channel_id: ChannelId,
    },
    /// Flips the mode when `include` is absent.
    SetExcludeMode {
        channel_id: ChannelId,
        include: Option<bool>,
    },
    ListStarboards,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddStarboard { .. } => "add_starboard",
            Command::SetThreshold { .. } => "set_threshold",
            Command::RemoveStarboard { .. } => "remove_starboard",
            Command::AddEmoji { .. } => "add_emoji",
            Command::RemoveEmoji { .. } => "remove_emoji",
            Command::SetOverride { .. } => "set_override",
            Command::ClearOverride { .. } => "clear_override",
            Command::AddExclude { .. } => "add_exclude",
            Command::RemoveExclude { .. } => "remove_exclude",
            Command::ListExcludes { .. } => "list_excludes",
            Command::SetExcludeMode { .. } => "set_exclude_mode",
            Command::ListStarboards => "list_starboards",
        }
    }
}

/// Rejections, phrased for the person who issued the command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("The reaction threshold must be at least 1.")]
    InvalidThreshold,
    #[error("<#{0}> is already a starboard.")]
    AlreadyStarboard(ChannelId),
    #[error("<#{0}> is not a starboard.")]
    NotAStarboard(ChannelId),
    #[error("A starboard needs at least one emoji.")]
    NoEmojis,
    #[error("{0} is already watched in <#{1}>.")]
    EmojiAlreadyWatched(EmojiRef, ChannelId),
    #[error("{0} is not watched in <#{1}>.")]
    EmojiNotWatched(EmojiRef, ChannelId),
    #[error("{0} is the last emoji of <#{1}>; remove the starboard instead.")]
    LastEmoji(EmojiRef, ChannelId),
    #[error("An override needs a threshold, extra emojis, or both.")]
    EmptyOverride,
    #[error("<#{0}> has no override for <#{1}>.")]
    NoOverride(ChannelId, ChannelId),
    #[error("<#{1}> is already on the list of <#{0}>.")]
    AlreadyListed(ChannelId, ChannelId),
    #[error("<#{1}> is not on the list of <#{0}>.")]
    NotListed(ChannelId, ChannelId),
    #[error("Configuration could not be saved: {0}")]
    Config(#[from] ConfigError),
}

fn check_threshold(required: u32) -> Result<(), CommandError> {
    if required == 0 {
        return Err(CommandError::InvalidThreshold);
    }
    Ok(())
}

fn starboard_mut(
    guild: &mut GuildConfig,
    channel_id: ChannelId,
) -> Result<&mut ChannelConfig, CommandError> {
    guild
        .channels
        .get_mut(&channel_id)
        .ok_or(CommandError::NotAStarboard(channel_id))
}

/// Run `command` for `guild_id` and return the reply to show the caller.
#[instrument(skip(store, command), fields(command = command.name()))]
pub async fn execute(
    store: &ConfigStore,
    guild_id: GuildId,
    command: Command,
) -> Result<String, CommandError> {
    let reply = match command {
        Command::ListStarboards => {
            let guild = store.guild_snapshot(guild_id).await.unwrap_or_default();
            return Ok(describe_starboards(&guild));
        }
        Command::ListExcludes { channel_id } => {
            let cfg = store
                .config_for(guild_id, channel_id)
                .await
                .ok_or(CommandError::NotAStarboard(channel_id))?;
            return Ok(describe_excludes(channel_id, &cfg));
        }
        Command::AddStarboard {
            channel_id,
            required_reactions,
            emojis,
        } => {
            check_threshold(required_reactions)?;
            if emojis.is_empty() {
                return Err(CommandError::NoEmojis);
            }
            store
                .mutate(guild_id, |guild| {
                    if guild.channels.contains_key(&channel_id) {
                        return Err(CommandError::AlreadyStarboard(channel_id));
                    }
                    guild
                        .channels
                        .insert(channel_id, ChannelConfig::new(required_reactions, emojis));
                    Ok(())
                })
                .await?;
            format!(
                "<#{}> is now a starboard requiring {} reactions.",
                channel_id, required_reactions
            )
        }
        Command::SetThreshold {
            channel_id,
            required_reactions,
        } => {
            check_threshold(required_reactions)?;
            store
                .mutate(guild_id, |guild| {
                    starboard_mut(guild, channel_id)?.required_reactions = required_reactions;
                    Ok::<_, CommandError>(())
                })
                .await?;
            format!(
                "<#{}> now requires {} reactions.",
                channel_id, required_reactions
            )
        }
        Command::RemoveStarboard { channel_id } => {
            store
                .mutate(guild_id, |guild| {
                    guild
                        .channels
                        .remove(&channel_id)
                        .map(|_| ())
                        .ok_or(CommandError::NotAStarboard(channel_id))
                })
                .await?;
            format!("<#{}> is no longer a starboard.", channel_id)
        }
        Command::AddEmoji { channel_id, emoji } => {
            store
                .mutate(guild_id, |guild| {
                    let cfg = starboard_mut(guild, channel_id)?;
                    if !cfg.watched_emojis.insert(emoji.clone()) {
                        return Err(CommandError::EmojiAlreadyWatched(emoji.clone(), channel_id));
                    }
                    Ok(())
                })
                .await?;
            format!("<#{}> now watches {}.", channel_id, emoji)
        }
        Command::RemoveEmoji { channel_id, emoji } => {
            store
                .mutate(guild_id, |guild| {
                    let cfg = starboard_mut(guild, channel_id)?;
                    if !cfg.watched_emojis.contains(&emoji) {
                        return Err(CommandError::EmojiNotWatched(emoji.clone(), channel_id));
                    }
                    if cfg.watched_emojis.len() == 1 {
                        return Err(CommandError::LastEmoji(emoji.clone(), channel_id));
                    }
                    cfg.watched_emojis.remove(&emoji);
                    Ok(())
                })
                .await?;
            format!("<#{}> no longer watches {}.", channel_id, emoji)
        }
        Command::SetOverride {
            channel_id,
            source_channel_id,
            required_reactions,
            extra_emojis,
        } => {
            if let Some(required) = required_reactions {
                check_threshold(required)?;
            }
            let extra: Option<BTreeSet<EmojiRef>> = extra_emojis
                .map(|e| e.into_iter().collect::<BTreeSet<_>>())
                .filter(|e| !e.is_empty());
            if required_reactions.is_none() && extra.is_none() {
                return Err(CommandError::EmptyOverride);
            }
            store
                .mutate(guild_id, |guild| {
                    starboard_mut(guild, channel_id)?.overrides.insert(
                        source_channel_id,
                        Override {
                            required_reactions,
                            extra_emojis: extra,
                        },
                    );
                    Ok::<_, CommandError>(())
                })
                .await?;
            format!(
                "<#{}> now has an override for <#{}>.",
                channel_id, source_channel_id
            )
        }
        Command::ClearOverride {
            channel_id,
            source_channel_id,
        } => {
            store
                .mutate(guild_id, |guild| {
                    starboard_mut(guild, channel_id)?
                        .overrides
                        .remove(&source_channel_id)
                        .map(|_| ())
                        .ok_or(CommandError::NoOverride(channel_id, source_channel_id))
                })
                .await?;
            format!(
                "Removed the override of <#{}> for <#{}>.",
                channel_id, source_channel_id
            )
        }
        Command::AddExclude {
            channel_id,
            source_channel_id,
        } => {
            store
                .mutate(guild_id, |guild| {
                    if !starboard_mut(guild, channel_id)?.exclude.insert(source_channel_id) {
                        return Err(CommandError::AlreadyListed(channel_id, source_channel_id));
                    }
                    Ok(())
                })
                .await?;
            format!(
                "Added <#{}> to the list of <#{}>.",
                source_channel_id, channel_id
            )
        }
        Command::RemoveExclude {
            channel_id,
            source_channel_id,
        } => {
            store
                .mutate(guild_id, |guild| {
                    if !starboard_mut(guild, channel_id)?.exclude.remove(&source_channel_id) {
                        return Err(CommandError::NotListed(channel_id, source_channel_id));
                    }
                    Ok(())
                })
                .await?;
            format!(
                "Removed <#{}> from the list of <#{}>.",
                source_channel_id, channel_id
            )
        }
        Command::SetExcludeMode {
            channel_id,
            include,
        } => {
            let now_include = store
                .mutate(guild_id, |guild| {
                    let cfg = starboard_mut(guild, channel_id)?;
                    cfg.exclude_is_include = include.unwrap_or(!cfg.exclude_is_include);
                    Ok::<_, CommandError>(cfg.exclude_is_include)
                })
                .await?;
            let mode = if now_include { "an allow-list" } else { "a deny-list" };
            format!("The channel list of <#{}> is now {}.", channel_id, mode)
        }
    };
    info!(guild_id, "command applied");
    Ok(reply)
}

fn join_emojis<'a>(emojis: impl IntoIterator<Item = &'a EmojiRef>) -> String {
    emojis
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_starboards(guild: &GuildConfig) -> String {
    if guild.channels.is_empty() {
        return "No starboards are configured.".to_string();
    }
    let mut lines = Vec::with_capacity(guild.channels.len());
    for (channel_id, cfg) in &guild.channels {
        let mut line = format!(
            "<#{}>: {} × {}",
            channel_id,
            cfg.required_reactions,
            join_emojis(&cfg.watched_emojis)
        );
        for (source, o) in &cfg.overrides {
            line.push_str(&format!("\n  override <#{}>:", source));
            if let Some(required) = o.required_reactions {
                line.push_str(&format!(" {} reactions", required));
            }
            if let Some(extra) = &o.extra_emojis {
                line.push_str(&format!(" +{}", join_emojis(extra)));
            }
        }
        if !cfg.exclude.is_empty() || cfg.exclude_is_include {
            let verb = if cfg.exclude_is_include { "only" } else { "excluding" };
            line.push_str(&format!("\n  {} {} channel(s)", verb, cfg.exclude.len()));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn describe_excludes(channel_id: ChannelId, cfg: &ChannelConfig) -> String {
    let kind = if cfg.exclude_is_include {
        "Allowed"
    } else {
        "Excluded"
    };
    if cfg.exclude.is_empty() {
        return format!("{} channels for <#{}>: none", kind, channel_id);
    }
    let list = cfg
        .exclude
        .iter()
        .map(|c| format!("<#{}>", c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} channels for <#{}>: {}", kind, channel_id, list)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> EmojiRef {
        EmojiRef::unicode("⭐")
    }

    async fn store_with_board() -> ConfigStore {
        let store = ConfigStore::in_memory();
        execute(
            &store,
            1,
            Command::AddStarboard {
                channel_id: 100,
                required_reactions: 3,
                emojis: vec![star()],
            },
        )
        .await
        .unwrap();
        store
    }

    #[tokio::test]
    async fn rejects_non_positive_thresholds() {
        let store = store_with_board().await;
        let err = execute(
            &store,
            1,
            Command::SetThreshold {
                channel_id: 100,
                required_reactions: 0,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidThreshold));
        assert_eq!(err.to_string(), "The reaction threshold must be at least 1.");

        let err = execute(
            &store,
            1,
            Command::SetOverride {
                channel_id: 100,
                source_channel_id: 5,
                required_reactions: Some(0),
                extra_emojis: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::InvalidThreshold));
        assert!(store.config_for(1, 100).await.unwrap().overrides.is_empty());
    }

    #[tokio::test]
    async fn emoji_management() {
        let store = store_with_board().await;
        let fire = EmojiRef::unicode("🔥");
        execute(&store, 1, Command::AddEmoji { channel_id: 100, emoji: fire.clone() })
            .await
            .unwrap();
        let err = execute(&store, 1, Command::AddEmoji { channel_id: 100, emoji: fire.clone() })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::EmojiAlreadyWatched(..)));

        execute(&store, 1, Command::RemoveEmoji { channel_id: 100, emoji: star() })
            .await
            .unwrap();
        let err = execute(&store, 1, Command::RemoveEmoji { channel_id: 100, emoji: fire })
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::LastEmoji(..)));
    }

    #[tokio::test]
    async fn exclude_mode_toggles() {
        let store = store_with_board().await;
        execute(&store, 1, Command::AddExclude { channel_id: 100, source_channel_id: 7 })
            .await
            .unwrap();
        let reply = execute(&store, 1, Command::SetExcludeMode { channel_id: 100, include: None })
            .await
            .unwrap();
        assert!(reply.contains("allow-list"));
        let cfg = store.config_for(1, 100).await.unwrap();
        assert!(cfg.exclude_is_include);
        assert!(cfg.admits(7));
        assert!(!cfg.admits(8));

        let listing = execute(&store, 1, Command::ListExcludes { channel_id: 100 })
            .await
            .unwrap();
        assert_eq!(listing, "Allowed channels for <#100>: <#7>");
    }

    #[tokio::test]
    async fn unknown_starboard_is_rejected() {
        let store = ConfigStore::in_memory();
        let err = execute(&store, 1, Command::RemoveStarboard { channel_id: 9 })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "<#9> is not a starboard.");
        let reply = execute(&store, 1, Command::ListStarboards).await.unwrap();
        assert_eq!(reply, "No starboards are configured.");
    }

    #[test]
    fn commands_parse_from_json() {
        let raw = r#"{"action":"set_override","channel_id":1,"source_channel_id":2,"required_reactions":1,"extra_emojis":null}"#;
        let cmd: Command = serde_json::from_str(raw).unwrap();
        assert_eq!(cmd.name(), "set_override");
    }
}
