//! Integration tests for config

use sandcheck_config::*;
use sandcheck_errors::ErrorFamily;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::NamedTempFile;

// Mutex to ensure env var tests don't run concurrently
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

const ENV_VARS: [&str; 5] = [
    "SANDCHECK_IMAGE",
    "SANDCHECK_WORKSPACE_ROOT",
    "SANDCHECK_RUNTIME",
    "SANDCHECK_MAX_RECOVERY_ATTEMPTS",
    "SANDCHECK_STOP_GRACE_SECONDS",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

#[tokio::test]
async fn load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[lifecycle]
runtime = "podman"
image = "node:22-alpine"
stop_grace_seconds = 3

[retry.network]
max_attempts = 7
base_delay_ms = 100
max_delay_ms = 1000

[circuit_breaker]
failure_threshold = 2

[security]
extra_patterns = ["curl\\s+[^|]*\\|\\s*python"]

[workflow.tools.custom-lint]
command = ["lint", "--json"]
        "#
    )
    .unwrap();

    let config = Config::load_from_file(temp_file.path()).await.unwrap();
    assert_eq!(config.lifecycle.runtime, RuntimeBackend::Podman);
    assert_eq!(config.lifecycle.image, "node:22-alpine");
    assert_eq!(config.lifecycle.stop_grace_seconds, 3);
    assert_eq!(config.retry.network.max_attempts, 7);
    assert!((config.retry.network.multiplier - 2.0).abs() < f64::EPSILON);
    // untouched sections keep their defaults
    assert_eq!(config.retry.container_creation.max_attempts, 3);
    assert_eq!(config.circuit_breaker.failure_threshold, 2);
    assert_eq!(config.circuit_breaker.cooldown_ms, 60_000);
    assert_eq!(config.security.extra_patterns.len(), 1);
    assert_eq!(config.security.pids_limit, 256);
    let custom = &config.workflow.tools["custom-lint"];
    assert_eq!(custom.category, "codeQualityIssues");
    assert_eq!(config.recovery.max_recovery_attempts, 3);
}

#[tokio::test]
async fn invalid_toml_is_a_configuration_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[lifecycle\nimage = ").unwrap();
    let err = Config::load_from_file(temp_file.path()).await.unwrap_err();
    assert_eq!(err.family(), ErrorFamily::Configuration);
}

#[tokio::test]
async fn zero_threshold_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[circuit_breaker]\nfailure_threshold = 0").unwrap();
    let err = Config::load_from_file(temp_file.path()).await.unwrap_err();
    assert_eq!(err.context_value("field"), Some("circuit_breaker"));
}

#[tokio::test]
async fn missing_file_is_reported_with_path() {
    let err = Config::load_or_default(Some(std::path::Path::new("/nonexistent/sandcheck.toml")))
        .await
        .unwrap_err();
    assert_eq!(err.family(), ErrorFamily::Configuration);
    assert_eq!(err.context_value("path"), Some("/nonexistent/sandcheck.toml"));
}

#[test]
fn merge_env_overrides_file_values() {
    let _guard = ENV_TEST_MUTEX.lock().unwrap();
    clear_env();

    std::env::set_var("SANDCHECK_IMAGE", "node:18");
    std::env::set_var("SANDCHECK_WORKSPACE_ROOT", "/srv/checkouts");
    std::env::set_var("SANDCHECK_RUNTIME", "podman");
    std::env::set_var("SANDCHECK_MAX_RECOVERY_ATTEMPTS", "5");
    std::env::set_var("SANDCHECK_STOP_GRACE_SECONDS", "2");

    let mut config = Config::default();
    config.merge_env().unwrap();

    assert_eq!(config.lifecycle.image, "node:18");
    assert_eq!(
        config.lifecycle.workspace_root,
        Some(PathBuf::from("/srv/checkouts"))
    );
    assert_eq!(config.lifecycle.runtime, RuntimeBackend::Podman);
    assert_eq!(config.recovery.max_recovery_attempts, 5);
    assert_eq!(config.lifecycle.stop_grace_seconds, 2);
    assert!(config
        .allowed_mount_roots()
        .contains(&PathBuf::from("/srv/checkouts")));

    clear_env();
}

#[test]
fn invalid_env_value_is_rejected() {
    let _guard = ENV_TEST_MUTEX.lock().unwrap();
    clear_env();

    std::env::set_var("SANDCHECK_RUNTIME", "lxc");
    let mut config = Config::default();
    let err = config.merge_env().unwrap_err();
    assert_eq!(err.family(), ErrorFamily::Configuration);
    assert_eq!(err.context_value("field"), Some("SANDCHECK_RUNTIME"));

    clear_env();
    std::env::set_var("SANDCHECK_MAX_RECOVERY_ATTEMPTS", "many");
    assert!(Config::default().merge_env().is_err());

    clear_env();
}

#[test]
fn relative_workspace_root_is_rejected() {
    let _guard = ENV_TEST_MUTEX.lock().unwrap();
    clear_env();

    std::env::set_var("SANDCHECK_WORKSPACE_ROOT", "relative/dir");
    assert!(Config::default().merge_env().is_err());

    clear_env();
}

#[test]
fn default_tools_cover_the_catalog() {
    let config = Config::default();
    for tool in ["dependency-audit", "eslint", "npm-test", "slither", "solhint"] {
        assert!(config.workflow.tools.contains_key(tool), "missing {tool}");
    }
}
