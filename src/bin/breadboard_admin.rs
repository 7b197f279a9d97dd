use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use breadboard::commands::{self, Command};
use breadboard::config;
use breadboard::emoji::EmojiRef;
use breadboard::guilds::ConfigStore;
use breadboard::model::{ChannelId, GuildId};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Edit the starboard configuration snapshot while the daemon is stopped"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Use this snapshot file instead of the one named by the config
    #[arg(long)]
    guilds_file: Option<PathBuf>,

    /// Guild to operate on
    #[arg(long)]
    guild: GuildId,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Turn a channel into a starboard
    AddStarboard {
        channel: ChannelId,
        #[arg(long)]
        required: u32,
        /// Unicode emoji, `<:name:id>` or `name:id`
        #[arg(long = "emoji", required = true)]
        emojis: Vec<EmojiRef>,
    },
    SetThreshold {
        channel: ChannelId,
        required: u32,
    },
    RemoveStarboard {
        channel: ChannelId,
    },
    AddEmoji {
        channel: ChannelId,
        emoji: EmojiRef,
    },
    RemoveEmoji {
        channel: ChannelId,
        emoji: EmojiRef,
    },
    /// Per-source-channel threshold and/or extra emojis
    SetOverride {
        channel: ChannelId,
        source: ChannelId,
        #[arg(long)]
        required: Option<u32>,
        #[arg(long = "emoji")]
        extra_emojis: Vec<EmojiRef>,
    },
    ClearOverride {
        channel: ChannelId,
        source: ChannelId,
    },
    AddExclude {
        channel: ChannelId,
        source: ChannelId,
    },
    RemoveExclude {
        channel: ChannelId,
        source: ChannelId,
    },
    ListExcludes {
        channel: ChannelId,
    },
    /// Switch between deny-list and allow-list; toggles without a flag
    SetExcludeMode {
        channel: ChannelId,
        #[arg(long, conflicts_with = "exclude")]
        include: bool,
        #[arg(long)]
        exclude: bool,
    },
    ListStarboards,
}

impl From<Action> for Command {
    fn from(action: Action) -> Self {
        match action {
            Action::AddStarboard {
                channel,
                required,
                emojis,
            } => Command::AddStarboard {
                channel_id: channel,
                required_reactions: required,
                emojis,
            },
            Action::SetThreshold { channel, required } => Command::SetThreshold {
                channel_id: channel,
                required_reactions: required,
            },
            Action::RemoveStarboard { channel } => Command::RemoveStarboard {
                channel_id: channel,
            },
            Action::AddEmoji { channel, emoji } => Command::AddEmoji {
                channel_id: channel,
                emoji,
            },
            Action::RemoveEmoji { channel, emoji } => Command::RemoveEmoji {
                channel_id: channel,
                emoji,
            },
            Action::SetOverride {
                channel,
                source,
                required,
                extra_emojis,
            } => Command::SetOverride {
                channel_id: channel,
                source_channel_id: source,
                required_reactions: required,
                extra_emojis: (!extra_emojis.is_empty()).then_some(extra_emojis),
            },
            Action::ClearOverride { channel, source } => Command::ClearOverride {
                channel_id: channel,
                source_channel_id: source,
            },
            Action::AddExclude { channel, source } => Command::AddExclude {
                channel_id: channel,
                source_channel_id: source,
            },
            Action::RemoveExclude { channel, source } => Command::RemoveExclude {
                channel_id: channel,
                source_channel_id: source,
            },
            Action::ListExcludes { channel } => Command::ListExcludes {
                channel_id: channel,
            },
            Action::SetExcludeMode {
                channel,
                include,
                exclude,
            } => Command::SetExcludeMode {
                channel_id: channel,
                include: match (include, exclude) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            },
            Action::ListStarboards => Command::ListStarboards,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let path = match args.guilds_file {
        Some(path) => path,
        None => {
            let cfg = config::load(Some(&args.config))?;
            cfg.ensure_dirs()?;
            cfg.app.guilds_path()
        }
    };

    let store = ConfigStore::load(&path).await?;
    let reply = commands::execute(&store, args.guild, args.action.into()).await?;
    info!(path = %path.display(), "done");
    println!("{}", reply);
    Ok(())
}
