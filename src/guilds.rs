//! Per-guild starboard configuration and the store that guards it.
//!
//! Readers (the reconciliation engine) take a cloned [`GuildConfig`] under a
//! short read lock, so a single event always sees one consistent snapshot.
//! Writers go through [`ConfigStore::mutate`], which holds the guild's write
//! lock while the candidate is validated and persisted, and only swaps it in
//! once the snapshot file has been written.
use crate::config::ConfigError;
use crate::emoji::EmojiRef;
use crate::model::{ChannelId, GuildId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

/// Configuration of one starboard channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub required_reactions: u32,
    pub watched_emojis: BTreeSet<EmojiRef>,
    /// Keyed by source channel.
    pub overrides: BTreeMap<ChannelId, Override>,
    pub exclude: BTreeSet<ChannelId>,
    /// Turns `exclude` into an allow-list.
    pub exclude_is_include: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Override {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_reactions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_emojis: Option<BTreeSet<EmojiRef>>,
}

impl ChannelConfig {
    pub fn new(required_reactions: u32, watched: impl IntoIterator<Item = EmojiRef>) -> Self {
        Self {
            required_reactions,
            watched_emojis: watched.into_iter().collect(),
            overrides: BTreeMap::new(),
            exclude: BTreeSet::new(),
            exclude_is_include: false,
        }
    }

    pub fn is_watched(&self, emoji: &EmojiRef, source: ChannelId) -> bool {
        if self.watched_emojis.contains(emoji) {
            return true;
        }
        self.overrides
            .get(&source)
            .and_then(|o| o.extra_emojis.as_ref())
            .is_some_and(|extra| extra.contains(emoji))
    }

    pub fn effective_threshold(&self, source: ChannelId) -> u32 {
        self.overrides
            .get(&source)
            .and_then(|o| o.required_reactions)
            .unwrap_or(self.required_reactions)
    }

    pub fn admits(&self, source: ChannelId) -> bool {
        !self.exclude.contains(&source) ^ self.exclude_is_include
    }

    fn validate(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), ConfigError> {
        let at = || format!("guild {} starboard {}", guild_id, channel_id);
        if self.required_reactions == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: required_reactions must be > 0",
                at()
            )));
        }
        if self.watched_emojis.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{}: watched_emojis must not be empty",
                at()
            )));
        }
        for (source, o) in &self.overrides {
            if o.required_reactions.is_none() && o.extra_emojis.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{}: override for channel {} sets nothing",
                    at(),
                    source
                )));
            }
            if o.required_reactions == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "{}: override for channel {} must require > 0 reactions",
                    at(),
                    source
                )));
            }
            if o.extra_emojis.as_ref().is_some_and(BTreeSet::is_empty) {
                return Err(ConfigError::Invalid(format!(
                    "{}: override for channel {} has an empty extra_emojis set",
                    at(),
                    source
                )));
            }
        }
        Ok(())
    }
}

/// All starboards of one guild, keyed by starboard channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GuildConfig {
    pub channels: BTreeMap<ChannelId, ChannelConfig>,
}

impl GuildConfig {
    pub fn is_starboard(&self, channel_id: ChannelId) -> bool {
        self.channels.contains_key(&channel_id)
    }

    /// Starboards that care about `emoji` on a message in `source`. A missing
    /// emoji (full clear) matches every starboard admitting the source.
    pub fn relevant(
        &self,
        emoji: Option<&EmojiRef>,
        source: ChannelId,
    ) -> Vec<(ChannelId, &ChannelConfig)> {
        self.channels
            .iter()
            .filter(|(_, cfg)| cfg.admits(source))
            .filter(|(_, cfg)| emoji.map_or(true, |e| cfg.is_watched(e, source)))
            .map(|(id, cfg)| (*id, cfg))
            .collect()
    }

    pub fn validate(&self, guild_id: GuildId) -> Result<(), ConfigError> {
        for (channel_id, cfg) in &self.channels {
            cfg.validate(guild_id, *channel_id)?;
        }
        Ok(())
    }
}

/// Persisted form of the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigSnapshot {
    pub guilds: BTreeMap<GuildId, GuildConfig>,
}

impl ConfigSnapshot {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (guild_id, guild) in &self.guilds {
            guild.validate(*guild_id)?;
        }
        Ok(())
    }
}

type GuildSlot = Arc<RwLock<GuildConfig>>;

#[derive(Debug, Default)]
pub struct ConfigStore {
    guilds: RwLock<HashMap<GuildId, GuildSlot>>,
    /// Serializes writers so that persisting never waits on another writer.
    writer: Mutex<()>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot after validating every guild.
    pub fn from_snapshot(
        snapshot: ConfigSnapshot,
        path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        snapshot.validate()?;
        let guilds = snapshot
            .guilds
            .into_iter()
            .map(|(id, cfg)| (id, Arc::new(RwLock::new(cfg))))
            .collect();
        Ok(Self {
            guilds: RwLock::new(guilds),
            writer: Mutex::new(()),
            path,
        })
    }

    /// Load the snapshot at `path`. A missing file yields an empty store that
    /// will be written to `path` on the first checkpoint.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let snapshot = match fs::read_to_string(path).await {
            Ok(content) => serde_yaml::from_str::<ConfigSnapshot>(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("no guild configuration yet; starting empty");
                ConfigSnapshot::default()
            }
            Err(err) => return Err(err.into()),
        };
        let store = Self::from_snapshot(snapshot, Some(path.to_path_buf()))?;
        info!(guilds = store.guilds.read().await.len(), "guild configuration loaded");
        Ok(store)
    }

    async fn slot(&self, guild_id: GuildId) -> Option<GuildSlot> {
        self.guilds.read().await.get(&guild_id).cloned()
    }

    async fn slot_or_insert(&self, guild_id: GuildId) -> GuildSlot {
        if let Some(slot) = self.slot(guild_id).await {
            return slot;
        }
        self.guilds
            .write()
            .await
            .entry(guild_id)
            .or_default()
            .clone()
    }

    /// Consistent copy of one guild's configuration.
    pub async fn guild_snapshot(&self, guild_id: GuildId) -> Option<GuildConfig> {
        let slot = self.slot(guild_id).await?;
        let guard = slot.read().await;
        Some(guard.clone())
    }

    pub async fn config_for(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Option<ChannelConfig> {
        let slot = self.slot(guild_id).await?;
        let guard = slot.read().await;
        guard.channels.get(&channel_id).cloned()
    }

    /// Whole-store snapshot. Guilds without starboards are left out.
    pub async fn dump(&self) -> ConfigSnapshot {
        let slots: Vec<(GuildId, GuildSlot)> = self
            .guilds
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();
        let mut snapshot = ConfigSnapshot::default();
        for (id, slot) in slots {
            let guard = slot.read().await;
            if !guard.channels.is_empty() {
                snapshot.guilds.insert(id, guard.clone());
            }
        }
        snapshot
    }

    /// Apply `apply` to a copy of the guild's configuration, validate and
    /// persist the result, then make it visible. On any error neither memory
    /// nor disk changes.
    #[instrument(skip(self, apply))]
    pub async fn mutate<T, E, F>(&self, guild_id: GuildId, apply: F) -> Result<T, E>
    where
        F: FnOnce(&mut GuildConfig) -> Result<T, E>,
        E: From<ConfigError>,
    {
        let _writer = self.writer.lock().await;
        let slot = self.slot_or_insert(guild_id).await;
        let mut guard = slot.write().await;

        let mut candidate = guard.clone();
        let out = apply(&mut candidate)?;
        candidate.validate(guild_id)?;

        if let Some(path) = &self.path {
            let mut snapshot = self.dump_except(guild_id).await;
            if !candidate.channels.is_empty() {
                snapshot.guilds.insert(guild_id, candidate.clone());
            }
            write_snapshot(path, &snapshot).await?;
        }

        *guard = candidate;
        debug!(guild_id, "guild configuration updated");
        Ok(out)
    }

    async fn dump_except(&self, skip: GuildId) -> ConfigSnapshot {
        let slots: Vec<(GuildId, GuildSlot)> = self
            .guilds
            .read()
            .await
            .iter()
            .filter(|(id, _)| **id != skip)
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();
        let mut snapshot = ConfigSnapshot::default();
        for (id, slot) in slots {
            let guard = slot.read().await;
            if !guard.channels.is_empty() {
                snapshot.guilds.insert(id, guard.clone());
            }
        }
        snapshot
    }

    /// Rewrite the snapshot file from memory. No-op for in-memory stores.
    pub async fn checkpoint(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _writer = self.writer.lock().await;
        let snapshot = self.dump().await;
        write_snapshot(path, &snapshot).await?;
        info!(path = %path.display(), guilds = snapshot.guilds.len(), "guild configuration saved");
        Ok(())
    }
}

/// Write via a sibling temp file and rename so readers never see a torn file.
async fn write_snapshot(path: &Path, snapshot: &ConfigSnapshot) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(snapshot)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, yaml).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
