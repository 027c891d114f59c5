// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use super::commands::scan::ScanCommand;
use clap::CommandFactory;

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn scan_create_requires_a_url() {
    let err = Cli::try_parse_from(["strix", "scan", "create"]).unwrap_err();
    assert_eq!(err.exit_code(), EXIT_INVALID_ARGS as i32);
}

#[test]
fn scan_create_parses_urls_and_flags() {
    let cli = Cli::try_parse_from([
        "strix",
        "scan",
        "create",
        "https://example.test/",
        "--no-nuclei",
        "--title",
        "demo",
        "--follow",
    ])
    .unwrap();
    match cli.command {
        Commands::Scan(args) => match args.command {
            ScanCommand::Create(create) => {
                assert_eq!(create.urls, vec!["https://example.test/"]);
                assert!(create.no_nuclei);
                assert!(!create.no_websocket);
                assert_eq!(create.title, "demo");
                assert!(create.follow);
                assert_eq!(create.workspace, 1);
            }
            _ => panic!("expected scan create"),
        },
        _ => panic!("expected scan subcommand"),
    }
}

#[test]
fn scan_lifecycle_subcommands_parse_ids() {
    for verb in ["pause", "resume", "cancel", "delete", "show"] {
        let cli = Cli::try_parse_from(["strix", "scan", verb, "7"]).unwrap();
        assert!(matches!(cli.command, Commands::Scan(_)), "{verb} parses");
    }

    let cli = Cli::try_parse_from(["strix", "scan", "jobs", "7", "--status", "failed"]).unwrap();
    match cli.command {
        Commands::Scan(args) => match args.command {
            ScanCommand::Jobs(jobs) => {
                assert_eq!(jobs.id, 7);
                assert_eq!(jobs.status, Some(strix_core::JobStatus::Failed));
            }
            _ => panic!("expected scan jobs"),
        },
        _ => panic!("expected scan subcommand"),
    }
}

#[test]
fn scan_list_rejects_unknown_status() {
    let err =
        Cli::try_parse_from(["strix", "scan", "list", "--status", "exploded"]).unwrap_err();
    assert_eq!(err.exit_code(), EXIT_INVALID_ARGS as i32);
}

#[test]
fn state_flag_is_global() {
    let cli = Cli::try_parse_from(["strix", "scan", "list", "--state", "strix.json"]).unwrap();
    assert_eq!(cli.state.as_deref(), Some(std::path::Path::new("strix.json")));
}

#[test]
fn exit_codes_map_engine_errors() {
    let unavailable: anyhow::Error = EngineError::Storage(
        strix_storage::StorageError::Unavailable("down".to_string()),
    )
    .into();
    assert_eq!(exit_code_for(&unavailable), EXIT_DB_UNAVAILABLE);

    let invalid: anyhow::Error = EngineError::InvalidConfig("bad".to_string()).into();
    assert_eq!(exit_code_for(&invalid), EXIT_INVALID_ARGS);

    let generic = anyhow::anyhow!("boom");
    assert_eq!(exit_code_for(&generic), EXIT_FAILURE);
}

#[test]
fn missing_config_defaults() {
    let config = load_config(None).unwrap();
    assert_eq!(config.job.default_max_attempts, 3);
}
