//! Line-delimited JSON intake feeding the engine.
use crate::commands::{self, Command};
use crate::engine::{Engine, EventOutcome};
use crate::model::{GuildId, ReactionEvent};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// One line of input, as forwarded by the gateway bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Reaction(ReactionEvent),
    Command { guild_id: GuildId, command: Command },
}

/// Spawn every line of `reader` as its own task until input ends or
/// `shutdown` resolves, then wait for the tasks in flight.
pub async fn run<R, S>(engine: Arc<Engine>, reader: R, shutdown: S) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    S: Future,
{
    let mut lines = reader.lines();
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("input closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Inbound>(line) {
                    Ok(inbound) => {
                        let engine = engine.clone();
                        let span = info_span!("event", id = %Uuid::new_v4());
                        tasks.spawn(dispatch(engine, inbound).instrument(span));
                    }
                    Err(err) => warn!(?err, "skipping malformed input line"),
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined {
                    error!(?err, "event task panicked");
                }
            }
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
    }

    info!(in_flight = tasks.len(), "draining");
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(?err, "event task panicked");
        }
    }
    Ok(())
}

async fn dispatch(engine: Arc<Engine>, inbound: Inbound) {
    match inbound {
        Inbound::Reaction(event) => match engine.handle(&event).await {
            Ok(EventOutcome::Skipped(reason)) => debug!(?reason, "event skipped"),
            Ok(EventOutcome::Reconciled(outcomes)) => {
                for outcome in &outcomes {
                    debug!(
                        starboard = outcome.starboard_channel_id,
                        intent = ?outcome.intent,
                        stars = outcome.star_count,
                        ok = outcome.result.is_ok(),
                        "reconciled"
                    );
                }
            }
            Err(err) => warn!(?err, message = event.message_id, "could not read original message"),
        },
        Inbound::Command { guild_id, command } => {
            let name = command.name();
            match commands::execute(engine.configs(), guild_id, command).await {
                Ok(reply) => info!(guild_id, command = name, %reply, "command succeeded"),
                Err(err) => warn!(guild_id, command = name, reply = %err, "command rejected"),
            }
        }
    }
}
