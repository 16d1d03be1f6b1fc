// rdds/tests/cli_integration.rs

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::NamedTempFile;

const VALID_CONFIG: &str = r#"
[database]
host = "db.internal"
name = "registry"
user = "rdds"
password = "secret"

[registrar]
name = "Example Registrar"
iana_id = 9999
abuse_email = "abuse@example.net"
abuse_phone = "+1.5555550100"
url = "https://example.net"
whois_server = "whois.example.net"
rdap_url = "https://rdap.example.net"

[policy]
allowed_tlds = [".test"]

[rdap]
bind = "127.0.0.1:7500"

[whois]
bind = "127.0.0.1:4343"
"#;

/// Helper to write a config file
fn config_file(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("Failed to create temp file");
    fs::write(file.path(), content).expect("Failed to write to temp file");
    file
}

fn rdds() -> Command {
    let mut cmd = Command::cargo_bin("rdds").unwrap();
    for var in [
        "RDDS_CONFIG",
        "RDDS_DB_HOST",
        "RDDS_DB_PORT",
        "RDDS_DB_NAME",
        "RDDS_DB_USER",
        "RDDS_PRIVACY",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_lists_flags() {
    rdds()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--check-config"));
}

#[test]
fn test_version() {
    rdds()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_check_config_valid() {
    let file = config_file(VALID_CONFIG);

    rdds()
        .args(["--check-config", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("Example Registrar"))
        .stdout(predicate::str::contains("127.0.0.1:7500"));
}

#[test]
fn test_check_config_env_override() {
    let file = config_file(VALID_CONFIG);

    rdds()
        .env("RDDS_PRIVACY", "off")
        .args(["--check-config", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("privacy off"));
}

#[test]
fn test_check_config_bad_env_override() {
    let file = config_file(VALID_CONFIG);

    rdds()
        .env("RDDS_DB_PORT", "not-a-port")
        .args(["--check-config", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("RDDS_DB_PORT"));
}

#[test]
fn test_check_config_invalid_value() {
    let file = config_file(&VALID_CONFIG.replace("iana_id = 9999", "iana_id = 0"));

    rdds()
        .args(["--check-config", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_check_config_unparseable() {
    let file = config_file("[registrar\nname = ");

    rdds()
        .args(["--check-config", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_missing_config_file() {
    rdds()
        .args(["--check-config", "--config", "/nonexistent/rdds.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/rdds.toml"));
}

#[test]
fn test_config_from_environment_variable() {
    let file = config_file(VALID_CONFIG);

    rdds()
        .env("RDDS_CONFIG", file.path())
        .arg("--check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"));
}
