//! Unique-reactor counting for one starboard configuration.
use crate::emoji::EmojiRef;
use crate::guilds::ChannelConfig;
use crate::model::{ChannelId, ReactionSnapshot, UserId};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    /// Distinct users across all watched emojis. This is the star count.
    pub unique_count: u32,
    /// Watched emoji with the most users; the first one wins a tie.
    pub top_emoji: Option<EmojiRef>,
    /// Watched emojis only, after the self-star filter, in snapshot order.
    pub per_emoji_users: ReactionSnapshot,
}

pub fn aggregate(
    reactions: &ReactionSnapshot,
    config: &ChannelConfig,
    source: ChannelId,
    self_star_allowed: bool,
    author_id: UserId,
) -> Aggregate {
    let mut per_emoji_users = ReactionSnapshot::new();
    let mut everyone: BTreeSet<UserId> = BTreeSet::new();
    let mut top: Option<(&EmojiRef, usize)> = None;

    for (emoji, users) in reactions.iter() {
        if !config.is_watched(emoji, source) {
            continue;
        }
        let users: BTreeSet<UserId> = users
            .iter()
            .copied()
            .filter(|user| self_star_allowed || *user != author_id)
            .collect();

        if top.map_or(true, |(_, best)| users.len() > best) {
            top = Some((emoji, users.len()));
        }
        everyone.extend(users.iter().copied());
        per_emoji_users.insert(emoji.clone(), users);
    }

    Aggregate {
        unique_count: u32::try_from(everyone.len()).unwrap_or(u32::MAX),
        top_emoji: top.map(|(emoji, _)| emoji.clone()),
        per_emoji_users,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guilds::Override;

    const AUTHOR: UserId = 1;

    fn star() -> EmojiRef {
        EmojiRef::unicode("⭐")
    }

    fn fire() -> EmojiRef {
        EmojiRef::unicode("🔥")
    }

    fn heart() -> EmojiRef {
        EmojiRef::unicode("❤️")
    }

    fn watching(emojis: &[EmojiRef]) -> ChannelConfig {
        ChannelConfig::new(3, emojis.iter().cloned())
    }

    #[test]
    fn user_on_two_watched_emojis_counts_once() {
        let snapshot = ReactionSnapshot::new()
            .with(star(), [2, 3])
            .with(fire(), [3, 4]);
        let agg = aggregate(&snapshot, &watching(&[star(), fire()]), 9, false, AUTHOR);
        assert_eq!(agg.unique_count, 3);
    }

    #[test]
    fn unwatched_emojis_do_not_count() {
        let base = ReactionSnapshot::new().with(star(), [2, 3]);
        let cfg = watching(&[star()]);
        let before = aggregate(&base, &cfg, 9, false, AUTHOR).unique_count;
        let after = aggregate(&base.clone().with(heart(), 10..50), &cfg, 9, false, AUTHOR);
        assert_eq!(before, after.unique_count);
        assert!(after.per_emoji_users.get(&heart()).is_none());
    }

    #[test]
    fn count_is_monotonic_in_watched_users() {
        let cfg = watching(&[star(), fire()]);
        let mut snapshot = ReactionSnapshot::new();
        let mut last = 0;
        for user in 2..20u64 {
            let emoji = if user % 2 == 0 { star() } else { fire() };
            snapshot.insert(emoji, [user, user / 2]);
            let count = aggregate(&snapshot, &cfg, 9, false, AUTHOR).unique_count;
            assert!(count >= last);
            last = count;
        }
    }

    #[test]
    fn author_is_removed_when_self_star_disallowed() {
        let snapshot = ReactionSnapshot::new().with(star(), [AUTHOR]);
        let cfg = watching(&[star()]);
        assert_eq!(aggregate(&snapshot, &cfg, 9, false, AUTHOR).unique_count, 0);
        assert_eq!(aggregate(&snapshot, &cfg, 9, true, AUTHOR).unique_count, 1);
    }

    #[test]
    fn top_emoji_ties_go_to_first_seen() {
        let snapshot = ReactionSnapshot::new()
            .with(heart(), [2, 3, 4, 5])
            .with(fire(), [2, 3])
            .with(star(), [4, 5]);
        let agg = aggregate(&snapshot, &watching(&[star(), fire()]), 9, false, AUTHOR);
        assert_eq!(agg.top_emoji, Some(fire()));

        let snapshot = ReactionSnapshot::new()
            .with(star(), [2])
            .with(fire(), [2, 3]);
        let agg = aggregate(&snapshot, &watching(&[star(), fire()]), 9, false, AUTHOR);
        assert_eq!(agg.top_emoji, Some(fire()));
    }

    #[test]
    fn top_emoji_uses_filtered_sizes() {
        // Author's own star makes ⭐ look bigger before filtering.
        let snapshot = ReactionSnapshot::new()
            .with(star(), [AUTHOR, 2])
            .with(fire(), [3, 4]);
        let agg = aggregate(&snapshot, &watching(&[star(), fire()]), 9, false, AUTHOR);
        assert_eq!(agg.top_emoji, Some(fire()));
        assert_eq!(agg.unique_count, 3);
    }

    #[test]
    fn override_emojis_count_only_in_their_channel() {
        let mut cfg = watching(&[star()]);
        cfg.overrides.insert(
            50,
            Override {
                required_reactions: None,
                extra_emojis: Some([fire()].into_iter().collect()),
            },
        );
        let snapshot = ReactionSnapshot::new().with(fire(), [2, 3]);
        assert_eq!(aggregate(&snapshot, &cfg, 50, false, AUTHOR).unique_count, 2);
        assert_eq!(aggregate(&snapshot, &cfg, 51, false, AUTHOR).unique_count, 0);
    }

    #[test]
    fn nothing_watched_means_no_top_emoji() {
        let snapshot = ReactionSnapshot::new().with(heart(), [2]);
        let agg = aggregate(&snapshot, &watching(&[star()]), 9, false, AUTHOR);
        assert_eq!(agg.unique_count, 0);
        assert_eq!(agg.top_emoji, None);
        assert!(agg.per_emoji_users.is_empty());
    }
}
