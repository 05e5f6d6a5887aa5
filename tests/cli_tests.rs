//! Command line parsing and config overrides.

use certflash::cli::Cli;
use certflash::orchestrator::RunOptions;
use certflash::{ErasePolicy, ProvisionConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_positional_port_and_flags() {
    let cli = Cli::try_parse_from(["certflash", "COM3", "--erase", "--no-build"]).unwrap();

    assert_eq!(cli.port, "COM3");
    assert_eq!(
        cli.run_options(),
        RunOptions {
            erase: true,
            skip_build: true
        }
    );
    assert!(!cli.verbose);
}

#[test]
fn test_port_is_required() {
    assert!(Cli::try_parse_from(["certflash"]).is_err());
}

#[test]
fn test_defaults_leave_config_untouched() {
    let cli = Cli::try_parse_from(["certflash", "/dev/ttyUSB0"]).unwrap();
    let mut config = ProvisionConfig::default();
    cli.apply_overrides(&mut config);

    assert_eq!(config, ProvisionConfig::default());
    assert_eq!(cli.run_options(), RunOptions::default());
}

#[test]
fn test_overrides_apply() {
    let cli = Cli::try_parse_from([
        "certflash",
        "/dev/ttyUSB0",
        "--project-dir",
        "/srv/fw",
        "--certs-dir",
        "/srv/certs",
        "--env",
        "esp32s3",
        "--partition-profile",
        "min_spiffs",
        "--stage-timeout-secs",
        "45",
        "--erase-failure",
        "abort",
        "-v",
    ])
    .unwrap();

    let mut config = ProvisionConfig::default();
    cli.apply_overrides(&mut config);

    assert_eq!(config.project_dir, PathBuf::from("/srv/fw"));
    assert_eq!(config.certs_dir, PathBuf::from("/srv/certs"));
    assert_eq!(config.build_env, "esp32s3");
    assert_eq!(config.partition().unwrap().filesystem_offset, 0x3D0000);
    assert_eq!(config.timeouts.build(), Duration::from_secs(45));
    assert_eq!(config.timeouts.version(), Duration::from_secs(45));
    assert_eq!(config.erase_failure, ErasePolicy::Abort);
    assert!(cli.verbose);
}

#[test]
fn test_invalid_erase_policy_rejected() {
    assert!(Cli::try_parse_from(["certflash", "COM3", "--erase-failure", "ignore"]).is_err());
}

#[test]
fn test_config_path_flag() {
    let cli = Cli::try_parse_from(["certflash", "COM3", "-c", "site.toml"]).unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("site.toml")));
}
