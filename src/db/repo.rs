use super::model::MirrorRecord;
use super::MirrorStoreError;
use crate::model::{ChannelId, MessageId};
use anyhow::Result;
use chrono::Utc;
use std::str::FromStr;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

const RECORD_COLUMNS: &str =
    "original_id, mirror_id, starboard_channel_id, star_count, starred_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // Applied to every pooled connection: a row must be on disk before the
    // publish it records counts as done.
    let options = SqliteConnectOptions::from_str(&normalized)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL, create its parent
/// directory and ask SQLite to create the file. In-memory and non-sqlite URLs
/// pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn to_db(id: u64) -> i64 {
    id as i64
}

fn record_from_row(row: &SqliteRow) -> Result<MirrorRecord, sqlx::Error> {
    let star_count: i64 = row.try_get("star_count")?;
    Ok(MirrorRecord {
        original_id: row.try_get::<i64, _>("original_id")? as u64,
        mirror_id: row.try_get::<i64, _>("mirror_id")? as u64,
        starboard_channel_id: row.try_get::<i64, _>("starboard_channel_id")? as u64,
        star_count: u32::try_from(star_count).unwrap_or(0),
        starred_at: row.try_get("starred_at")?,
    })
}

#[instrument(skip(pool))]
pub async fn get_mirror(
    pool: &Pool,
    original_id: MessageId,
    starboard_channel_id: ChannelId,
) -> Result<Option<MirrorRecord>, MirrorStoreError> {
    let sql = format!(
        "SELECT {} FROM mirrors WHERE original_id = ? AND starboard_channel_id = ?",
        RECORD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(to_db(original_id))
        .bind(to_db(starboard_channel_id))
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(record_from_row).transpose()?)
}

/// Every mirror of one original, across all starboards of its guild.
#[instrument(skip(pool))]
pub async fn list_for_original(
    pool: &Pool,
    original_id: MessageId,
) -> Result<Vec<MirrorRecord>, MirrorStoreError> {
    let sql = format!(
        "SELECT {} FROM mirrors WHERE original_id = ? ORDER BY starboard_channel_id",
        RECORD_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(to_db(original_id))
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>, _>>()?)
}

/// Insert a new record. Never overwrites: an existing row for the same
/// original in the same starboard, or for the same mirror id, is reported as
/// `DuplicateKey`.
#[instrument(skip_all, fields(original_id = record.original_id, mirror_id = record.mirror_id))]
pub async fn insert_mirror(pool: &Pool, record: &MirrorRecord) -> Result<(), MirrorStoreError> {
    let res = sqlx::query(
        "INSERT INTO mirrors (original_id, mirror_id, starboard_channel_id, star_count, starred_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(to_db(record.original_id))
    .bind(to_db(record.mirror_id))
    .bind(to_db(record.starboard_channel_id))
    .bind(i64::from(record.star_count))
    .bind(record.starred_at)
    .bind(Utc::now())
    .execute(pool)
    .await;

    match res {
        Ok(_) => {
            debug!("mirror recorded");
            Ok(())
        }
        Err(sqlx::Error::Database(db_err))
            if db_err.is_unique_violation()
                || db_err.message().contains("UNIQUE constraint failed") =>
        {
            Err(MirrorStoreError::DuplicateKey {
                original_id: record.original_id,
                mirror_id: record.mirror_id,
            })
        }
        Err(err) => Err(err.into()),
    }
}

#[instrument(skip(pool))]
pub async fn update_star_count(
    pool: &Pool,
    original_id: MessageId,
    starboard_channel_id: ChannelId,
    star_count: u32,
) -> Result<(), MirrorStoreError> {
    let res = sqlx::query(
        "UPDATE mirrors SET star_count = ?, updated_at = ? WHERE original_id = ? AND starboard_channel_id = ?",
    )
    .bind(i64::from(star_count))
    .bind(Utc::now())
    .bind(to_db(original_id))
    .bind(to_db(starboard_channel_id))
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(MirrorStoreError::NotFound {
            original_id,
            starboard_channel_id,
        });
    }
    Ok(())
}

/// Idempotent. Returns whether a row was removed.
#[instrument(skip(pool))]
pub async fn delete_mirror(
    pool: &Pool,
    original_id: MessageId,
    starboard_channel_id: ChannelId,
) -> Result<bool, MirrorStoreError> {
    let res = sqlx::query("DELETE FROM mirrors WHERE original_id = ? AND starboard_channel_id = ?")
        .bind(to_db(original_id))
        .bind(to_db(starboard_channel_id))
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn count_mirrors(pool: &Pool) -> Result<i64, MirrorStoreError> {
    let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mirrors")
        .fetch_one(pool)
        .await?;
    Ok(cnt)
}
