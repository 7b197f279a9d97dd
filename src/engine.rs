//! Reconciliation engine: turns one reaction-changed event into create,
//! update or delete intents for every starboard that cares about it.
//!
//! A message is either UNSTARRED (no mirror row) or STARRED (row present).
//! Nothing else is persisted; each event recomputes the transition from the
//! live reaction state. Work on the same original message is serialized by
//! [`MessageLocks`]; different messages proceed in parallel.
use crate::aggregate::{aggregate, Aggregate};
use crate::db::{self, MirrorRecord, MirrorStoreError, Pool};
use crate::guilds::{ChannelConfig, ConfigStore};
use crate::mirror::{Publisher, ReconcileError};
use crate::model::{ChannelId, GuildId, Message, MessageId, ReactionEvent, ReactionSnapshot};
use crate::platform::{Platform, PlatformError};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Create,
    Update,
    Delete,
    Noop,
}

/// The whole state machine. Reaching the threshold exactly keeps or creates
/// a mirror; one below it retracts or declines.
pub fn decide(count: u32, threshold: u32, record: Option<&MirrorRecord>) -> Intent {
    match (count >= threshold, record) {
        (true, None) => Intent::Create,
        (true, Some(r)) if r.star_count != count => Intent::Update,
        (true, Some(_)) => Intent::Noop,
        (false, Some(_)) => Intent::Delete,
        (false, None) => Intent::Noop,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Direct messages have no guild.
    NoGuild,
    UnconfiguredGuild,
    /// Messages inside a starboard are never mirrored again.
    StarboardChannel,
    /// No starboard watches the emoji or admits the channel.
    NotRelevant,
    /// The original vanished; that says nothing about its reactions.
    MessageGone,
}

#[derive(Debug)]
pub struct ConfigOutcome {
    pub starboard_channel_id: ChannelId,
    pub intent: Intent,
    pub star_count: u32,
    pub result: Result<(), ReconcileError>,
}

#[derive(Debug)]
pub enum EventOutcome {
    Skipped(SkipReason),
    Reconciled(Vec<ConfigOutcome>),
}

impl EventOutcome {
    pub fn outcomes(&self) -> &[ConfigOutcome] {
        match self {
            EventOutcome::Skipped(_) => &[],
            EventOutcome::Reconciled(outcomes) => outcomes,
        }
    }
}

/// Per-original-message mutual exclusion. Entries nobody holds or waits on
/// are pruned on the next acquire.
#[derive(Debug, Default)]
pub struct MessageLocks {
    inner: Mutex<HashMap<MessageId, Arc<Mutex<()>>>>,
}

impl MessageLocks {
    pub async fn acquire(&self, message_id: MessageId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(message_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub webhook_name: String,
    pub self_star_allowed: bool,
}

pub struct Engine {
    platform: Arc<dyn Platform>,
    pool: Pool,
    configs: Arc<ConfigStore>,
    locks: MessageLocks,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        platform: Arc<dyn Platform>,
        pool: Pool,
        configs: Arc<ConfigStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            platform,
            pool,
            configs,
            locks: MessageLocks::default(),
            settings,
        }
    }

    pub fn configs(&self) -> &Arc<ConfigStore> {
        &self.configs
    }

    /// Single entry point for every reaction cause. Per-starboard failures
    /// are reported inside the outcome; only a failure to read the original
    /// message fails the whole event.
    #[instrument(skip_all, fields(
        guild = ?event.guild_id,
        channel = event.channel_id,
        message = event.message_id,
        cause = event.cause.as_str(),
    ))]
    pub async fn handle(&self, event: &ReactionEvent) -> Result<EventOutcome, PlatformError> {
        let Some(guild_id) = event.guild_id else {
            return Ok(EventOutcome::Skipped(SkipReason::NoGuild));
        };
        let Some(guild) = self.configs.guild_snapshot(guild_id).await else {
            return Ok(EventOutcome::Skipped(SkipReason::UnconfiguredGuild));
        };
        if guild.is_starboard(event.channel_id) {
            return Ok(EventOutcome::Skipped(SkipReason::StarboardChannel));
        }
        let relevant = guild.relevant(event.emoji.as_ref(), event.channel_id);
        if relevant.is_empty() {
            debug!("no starboard is interested");
            return Ok(EventOutcome::Skipped(SkipReason::NotRelevant));
        }

        let _guard = self.locks.acquire(event.message_id).await;

        let message = match self
            .platform
            .fetch_message(event.channel_id, event.message_id)
            .await
        {
            Ok(message) => message,
            Err(err) if err.is_not_found() => {
                self.note_orphans(event.message_id).await;
                return Ok(EventOutcome::Skipped(SkipReason::MessageGone));
            }
            Err(err) => return Err(err),
        };
        let reactions = match self.platform.list_reactions(&message).await {
            Ok(reactions) => reactions,
            Err(err) if err.is_not_found() => {
                self.note_orphans(event.message_id).await;
                return Ok(EventOutcome::Skipped(SkipReason::MessageGone));
            }
            Err(err) => return Err(err),
        };

        let outcomes = join_all(
            relevant
                .into_iter()
                .map(|(starboard, config)| self.reconcile(guild_id, starboard, config, &message, &reactions)),
        )
        .await;
        Ok(EventOutcome::Reconciled(outcomes))
    }

    /// Mirrors of a deleted original stay where they are; just report them.
    async fn note_orphans(&self, original_id: MessageId) {
        match db::list_for_original(&self.pool, original_id).await {
            Ok(mirrors) if mirrors.is_empty() => info!("original message is gone; skipping"),
            Ok(mirrors) => info!(
                mirrors = mirrors.len(),
                starboards = ?mirrors.iter().map(|m| m.starboard_channel_id).collect::<Vec<_>>(),
                "original message is gone; leaving its mirrors in place"
            ),
            Err(err) => warn!(?err, "original message is gone; could not list its mirrors"),
        }
    }

    async fn reconcile(
        &self,
        guild_id: GuildId,
        starboard_channel_id: ChannelId,
        config: &ChannelConfig,
        message: &Message,
        reactions: &ReactionSnapshot,
    ) -> ConfigOutcome {
        let source = message.channel_id;
        let tally: Aggregate = aggregate(
            reactions,
            config,
            source,
            self.settings.self_star_allowed,
            message.author.id,
        );
        let threshold = config.effective_threshold(source);
        let publisher = Publisher {
            platform: self.platform.as_ref(),
            pool: &self.pool,
            webhook_name: &self.settings.webhook_name,
            guild_id,
            starboard_channel_id,
        };

        let (intent, result) = match db::get_mirror(&self.pool, message.id, starboard_channel_id).await {
            Err(err) => (Intent::Noop, Err(ReconcileError::from(err))),
            Ok(record) => {
                let intent = decide(tally.unique_count, threshold, record.as_ref());
                debug!(
                    starboard = starboard_channel_id,
                    stars = tally.unique_count,
                    threshold,
                    ?intent,
                    "decided"
                );
                match (intent, record) {
                    (Intent::Create, _) => match publisher.create(message, &tally).await {
                        Ok(true) => (Intent::Create, Ok(())),
                        Ok(false) => (Intent::Noop, Ok(())),
                        Err(err) => (Intent::Create, Err(err)),
                    },
                    (Intent::Update, Some(record)) => {
                        (intent, publisher.update(&record, message, &tally).await)
                    }
                    (Intent::Delete, Some(record)) => (intent, publisher.delete(&record).await),
                    _ => (Intent::Noop, Ok(())),
                }
            }
        };

        if let Err(err) = &result {
            report_failure(guild_id, starboard_channel_id, message, intent, err);
        }
        ConfigOutcome {
            starboard_channel_id,
            intent,
            star_count: tally.unique_count,
            result,
        }
    }
}

fn report_failure(
    guild_id: GuildId,
    starboard: ChannelId,
    message: &Message,
    intent: Intent,
    err: &ReconcileError,
) {
    let channel = message.channel_id;
    let original = message.id;
    match err {
        ReconcileError::Platform(PlatformError::Forbidden(detail)) => warn!(
            guild_id,
            channel,
            original,
            starboard,
            detail = %detail,
            "missing permission to manage webhooks in starboard channel"
        ),
        ReconcileError::Store(
            store_err @ (MirrorStoreError::DuplicateKey { .. } | MirrorStoreError::NotFound { .. }),
        ) => error!(
            guild_id,
            channel,
            original,
            starboard,
            ?intent,
            err = %store_err,
            "mirror store invariant violated"
        ),
        ReconcileError::MirrorMissing { .. } => warn!(
            guild_id,
            channel,
            original,
            starboard,
            err = %err,
            "mirror drifted from store"
        ),
        _ => warn!(guild_id, channel, original, starboard, ?intent, err = %err, "reconcile failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(count: u32) -> MirrorRecord {
        MirrorRecord::new(1, 2, 3, count)
    }

    #[test]
    fn decision_table() {
        assert_eq!(decide(3, 3, None), Intent::Create);
        assert_eq!(decide(2, 3, None), Intent::Noop);
        assert_eq!(decide(4, 3, Some(&record(3))), Intent::Update);
        assert_eq!(decide(3, 3, Some(&record(3))), Intent::Noop);
        assert_eq!(decide(2, 3, Some(&record(3))), Intent::Delete);
    }

    #[tokio::test]
    async fn same_message_is_serialized() {
        let locks = Arc::new(MessageLocks::default());
        let first = locks.acquire(7).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(7).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different message is not blocked.
        let other = tokio::time::timeout(Duration::from_millis(100), locks.acquire(8)).await;
        assert!(other.is_ok());
        drop(other);

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let locks = MessageLocks::default();
        drop(locks.acquire(1).await);
        drop(locks.acquire(2).await);
        let _held = locks.acquire(3).await;
        assert_eq!(locks.tracked().await, 1);
    }
}
