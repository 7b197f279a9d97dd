//! Database module: the mirror-state store.
//!
//! - `model`: the `MirrorRecord` row type.
//! - `repo`: SQL-only functions over the `mirrors` table.
//!
//! The presence of a row is the canonical "this message is starred" flag.

pub mod model;
pub mod repo;

pub use model::MirrorRecord;
pub use repo::*;

use crate::model::{ChannelId, MessageId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorStoreError {
    #[error("mirror already recorded (original {original_id}, mirror {mirror_id})")]
    DuplicateKey {
        original_id: MessageId,
        mirror_id: MessageId,
    },
    #[error("no mirror recorded for original {original_id} in starboard {starboard_channel_id}")]
    NotFound {
        original_id: MessageId,
        starboard_channel_id: ChannelId,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
