use std::path::PathBuf;

use clap::Parser;
use pl_gateway::cli::{Cli, Command, ConfigCommand};

#[test]
fn no_subcommand_means_serve() {
    let cli = Cli::try_parse_from(["pairlink"]).unwrap();
    assert!(cli.command.is_none());
}

#[test]
fn send_collects_repeated_attachments() {
    let cli = Cli::try_parse_from([
        "pairlink", "send", "--key", "user_42_1", "--to", "15550001111", "--text", "hi",
        "--attach", "a.png", "--attach", "b.pdf",
    ])
    .unwrap();
    match cli.command {
        Some(Command::Send {
            key,
            to,
            text,
            attachments,
        }) => {
            assert_eq!(key, "user_42_1");
            assert_eq!(to, "15550001111");
            assert_eq!(text.as_deref(), Some("hi"));
            assert_eq!(attachments, vec![PathBuf::from("a.png"), PathBuf::from("b.pdf")]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn pair_accepts_owner_only() {
    let cli = Cli::try_parse_from(["pairlink", "pair", "--owner", "42", "--no-wait"]).unwrap();
    match cli.command {
        Some(Command::Pair { key, owner, no_wait }) => {
            assert!(key.is_none());
            assert_eq!(owner.as_deref(), Some("42"));
            assert!(no_wait);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn send_requires_target() {
    assert!(Cli::try_parse_from(["pairlink", "send", "--key", "k"]).is_err());
}

#[test]
fn config_subcommands_parse() {
    let cli = Cli::try_parse_from(["pairlink", "config", "validate"]).unwrap();
    assert!(matches!(cli.command, Some(Command::Config(ConfigCommand::Validate))));
}

#[test]
fn load_config_reads_file_and_env_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pairlink.toml");
    std::fs::write(
        &path,
        "[sessions]\ncapacity = 4\n\n[bridge]\ncommand = \"node\"\n",
    )
    .unwrap();

    // The only test in this binary touching these variables.
    std::env::set_var("PL_CONFIG", &path);
    std::env::set_var("MAX_ACTIVE_CLIENTS", "7");
    let (config, used) = pl_gateway::cli::load_config().unwrap();
    std::env::remove_var("PL_CONFIG");
    std::env::remove_var("MAX_ACTIVE_CLIENTS");

    assert_eq!(used, path.display().to_string());
    assert_eq!(config.sessions.capacity, 7);
    assert_eq!(config.bridge.command, "node");
    assert_eq!(config.queue.max_concurrent_per_owner, 3);
}
