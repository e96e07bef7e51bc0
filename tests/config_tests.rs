//! Configuration layering: CLI flags over env over config file over defaults

use clap::Parser;
use farm_ledger::{CliArgs, ServerConfig};
use rust_decimal_macros::dec;
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

fn parse(args: &[&str]) -> ServerConfig {
    let mut argv = vec!["farm-ledger"];
    argv.extend_from_slice(args);
    ServerConfig::from_args(CliArgs::try_parse_from(argv).unwrap()).unwrap()
}

#[test]
#[serial]
fn test_defaults() {
    let config = parse(&[]);

    assert_eq!(config.http_bind_address.to_string(), "127.0.0.1:8079");
    assert_eq!(config.production_interval(), Duration::from_secs(2));
    assert_eq!(config.lifecycle_interval(), Duration::from_secs(10));
    assert_eq!(config.registration_balance, dec!(1000));
    assert_eq!(config.reset_balance, dec!(5000));
    assert_eq!(config.default_farm_name, "My Farm");
    assert_eq!(config.seconds_per_sim_year, 30);
    assert_eq!(config.transaction_max_attempts, 5);
    config.validate().unwrap();
}

#[test]
#[serial]
fn test_yaml_file_overrides_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("farm.yaml");
    fs::write(
        &path,
        "production_interval_ms: 500\nreset_balance: \"2500.50\"\ndefault_farm_name: Homestead\n",
    )
    .unwrap();

    let config = parse(&["--config", path.to_str().unwrap()]);

    assert_eq!(config.production_interval_ms, 500);
    assert_eq!(config.reset_balance, dec!(2500.50));
    assert_eq!(config.default_farm_name, "Homestead");
    assert_eq!(config.lifecycle_interval_ms, 10_000);
}

#[test]
#[serial]
fn test_cli_flag_beats_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("farm.json");
    fs::write(
        &path,
        r#"{"lifecycle_interval_ms": 4000, "seconds_per_sim_year": 12}"#,
    )
    .unwrap();

    let config = parse(&[
        "--config",
        path.to_str().unwrap(),
        "--lifecycle-interval-ms",
        "250",
    ]);

    assert_eq!(config.lifecycle_interval_ms, 250);
    assert_eq!(config.seconds_per_sim_year, 12);
}

#[test]
#[serial]
fn test_env_variable_is_read() {
    // SAFETY: tests touching the environment are serialized
    unsafe { std::env::set_var("FARM_LEDGER_REGISTRATION_BALANCE", "42") };
    let config = parse(&[]);
    unsafe { std::env::remove_var("FARM_LEDGER_REGISTRATION_BALANCE") };

    assert_eq!(config.registration_balance, dec!(42));
}

#[test]
#[serial]
fn test_unknown_file_keys_and_extensions_are_rejected() {
    let dir = tempdir().unwrap();
    let unknown = dir.path().join("farm.yaml");
    fs::write(&unknown, "tick_everything: true\n").unwrap();
    let args = CliArgs::try_parse_from(["farm-ledger", "--config", unknown.to_str().unwrap()])
        .unwrap();
    assert!(ServerConfig::from_args(args).is_err());

    let toml = dir.path().join("farm.toml");
    fs::write(&toml, "x = 1\n").unwrap();
    let args =
        CliArgs::try_parse_from(["farm-ledger", "--config", toml.to_str().unwrap()]).unwrap();
    assert!(ServerConfig::from_args(args).is_err());

    let missing = dir.path().join("absent.yaml");
    let args =
        CliArgs::try_parse_from(["farm-ledger", "--config", missing.to_str().unwrap()]).unwrap();
    assert!(ServerConfig::from_args(args).is_err());
}

#[test]
fn test_validate_rejects_unusable_settings() {
    let zero_tick = ServerConfig {
        production_interval_ms: 0,
        ..ServerConfig::default()
    };
    assert!(zero_tick.validate().is_err());

    let negative = ServerConfig {
        reset_balance: dec!(-1),
        ..ServerConfig::default()
    };
    assert!(negative.validate().is_err());

    let blank_name = ServerConfig {
        default_farm_name: "  ".to_string(),
        ..ServerConfig::default()
    };
    assert!(blank_name.validate().is_err());

    let no_attempts = ServerConfig {
        transaction_max_attempts: 0,
        ..ServerConfig::default()
    };
    assert!(no_attempts.validate().is_err());
}
