//! Row types returned by the repository.

use crate::model::{ChannelId, MessageId};
use chrono::{DateTime, Utc};

/// Correlation between an original message and its mirror in one starboard.
/// Never authoritative over message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRecord {
    pub original_id: MessageId,
    pub mirror_id: MessageId,
    pub starboard_channel_id: ChannelId,
    pub star_count: u32,
    pub starred_at: DateTime<Utc>,
}

impl MirrorRecord {
    pub fn new(
        original_id: MessageId,
        mirror_id: MessageId,
        starboard_channel_id: ChannelId,
        star_count: u32,
    ) -> Self {
        Self {
            original_id,
            mirror_id,
            starboard_channel_id,
            star_count,
            starred_at: Utc::now(),
        }
    }
}
