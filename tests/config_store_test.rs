use breadboard::commands::{self, Command, CommandError};
use breadboard::config::ConfigError;
use breadboard::emoji::EmojiRef;
use breadboard::guilds::ConfigStore;

fn star() -> EmojiRef {
    EmojiRef::unicode("⭐")
}

fn pog() -> EmojiRef {
    EmojiRef::Custom {
        name: "pog".into(),
        id: 77,
        animated: true,
    }
}

#[tokio::test]
async fn commands_persist_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("guilds.yaml");

    let store = ConfigStore::load(&path).await.unwrap();
    commands::execute(
        &store,
        1,
        Command::AddStarboard {
            channel_id: 100,
            required_reactions: 3,
            emojis: vec![star(), pog()],
        },
    )
    .await
    .unwrap();
    commands::execute(
        &store,
        1,
        Command::SetOverride {
            channel_id: 100,
            source_channel_id: 10,
            required_reactions: Some(1),
            extra_emojis: None,
        },
    )
    .await
    .unwrap();
    commands::execute(
        &store,
        1,
        Command::AddExclude {
            channel_id: 100,
            source_channel_id: 11,
        },
    )
    .await
    .unwrap();
    commands::execute(
        &store,
        1,
        Command::AddStarboard {
            channel_id: 200,
            required_reactions: 2,
            emojis: vec![star()],
        },
    )
    .await
    .unwrap();
    commands::execute(
        &store,
        1,
        Command::SetOverride {
            channel_id: 200,
            source_channel_id: 20,
            required_reactions: None,
            extra_emojis: Some(vec![EmojiRef::unicode("🔥")]),
        },
    )
    .await
    .unwrap();
    commands::execute(
        &store,
        1,
        Command::AddExclude {
            channel_id: 200,
            source_channel_id: 20,
        },
    )
    .await
    .unwrap();
    commands::execute(
        &store,
        1,
        Command::SetExcludeMode {
            channel_id: 200,
            include: Some(true),
        },
    )
    .await
    .unwrap();
    assert!(path.exists());

    let reloaded = ConfigStore::load(&path).await.unwrap();
    assert_eq!(reloaded.dump().await, store.dump().await);
    let cfg = reloaded.config_for(1, 100).await.unwrap();
    assert_eq!(cfg.effective_threshold(10), 1);
    assert_eq!(cfg.effective_threshold(12), 3);
    assert!(!cfg.admits(11));
    assert!(cfg.is_watched(&EmojiRef::custom("renamed", 77), 12));

    let allow = reloaded.config_for(1, 200).await.unwrap();
    assert!(allow.exclude_is_include);
    assert!(allow.admits(20));
    assert!(!allow.admits(21));
    assert_eq!(allow.effective_threshold(20), 2);
    assert!(allow.is_watched(&EmojiRef::unicode("🔥"), 20));
    assert!(!allow.is_watched(&EmojiRef::unicode("🔥"), 21));
    assert_eq!(
        allow.overrides[&20].extra_emojis,
        Some([EmojiRef::unicode("🔥")].into_iter().collect())
    );
}

#[tokio::test]
async fn rejected_command_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guilds.yaml");

    let store = ConfigStore::load(&path).await.unwrap();
    commands::execute(
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
    let before = std::fs::read_to_string(&path).unwrap();

    let err = commands::execute(
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

    let err = commands::execute(
        &store,
        1,
        Command::AddStarboard {
            channel_id: 100,
            required_reactions: 2,
            emojis: vec![star()],
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CommandError::AlreadyStarboard(100)));

    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    assert_eq!(store.config_for(1, 100).await.unwrap().required_reactions, 3);
}

#[tokio::test]
async fn invalid_snapshot_fails_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guilds.yaml");
    std::fs::write(
        &path,
        r#"guilds:
  1:
    channels:
      100:
        required_reactions: 0
        watched_emojis: ["⭐"]
        overrides: {}
        exclude: []
        exclude_is_include: false
"#,
    )
    .unwrap();

    let err = ConfigStore::load(&path).await.unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    std::fs::write(&path, "guilds:\n  1:\n    channels: {}\n    colour: red\n").unwrap();
    let err = ConfigStore::load(&path).await.unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[tokio::test]
async fn removing_the_last_starboard_drops_the_guild_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("guilds.yaml");

    let store = ConfigStore::load(&path).await.unwrap();
    commands::execute(
        &store,
        1,
        Command::AddStarboard {
            channel_id: 100,
            required_reactions: 1,
            emojis: vec![star()],
        },
    )
    .await
    .unwrap();
    commands::execute(&store, 1, Command::RemoveStarboard { channel_id: 100 })
        .await
        .unwrap();

    let reloaded = ConfigStore::load(&path).await.unwrap();
    assert!(reloaded.dump().await.guilds.is_empty());
    assert!(reloaded.guild_snapshot(1).await.is_none());
}
