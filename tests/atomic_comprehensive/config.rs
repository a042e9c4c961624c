//! Configuration file tests

use super::*;
use kmsprobe::kmsprobe_device::SimConfig;
use kmsprobe::{ConfigError, KmsContext, Outcome, ProbeConfig, Scenario, VerifyError};
use tempfile::tempdir;

/// The shipped template parses to the defaults and drives a run
#[test]
fn test_default_template_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(kmsprobe::config::CONFIG_FILE_NAME);
    ProbeConfig::write_default_if_missing(&path).unwrap();

    let config = ProbeConfig::from_file(&path).unwrap();
    assert_eq!(config, ProbeConfig::default());

    let mut ctx = ctx_with(config);
    assert!(matches!(Scenario::TestOnly.run(&mut ctx), Outcome::Passed));
}

/// An existing file is never overwritten by the template
#[test]
fn test_existing_file_is_kept() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kmsprobe.toml");
    let custom = ProbeConfig {
        fence_timeout_ms: 250,
        device: SimConfig {
            pipes: 2,
            overlays_per_pipe: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    custom.write_to_file(&path).unwrap();
    ProbeConfig::write_default_if_missing(&path).unwrap();
    assert_eq!(ProbeConfig::from_file(&path).unwrap(), custom);
}

/// The file's topology is what the context discovers
#[test]
fn test_topology_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kmsprobe.toml");
    std::fs::write(
        &path,
        "fence_timeout_ms = 300\n\n[device]\npipes = 3\noverlays_per_pipe = 2\ncursor = false\n",
    )
    .unwrap();

    let config = ProbeConfig::load_or_default(&path).unwrap();
    assert_eq!(config.test_only_repeats, 3);
    assert_eq!(config.device_config().fence_timeout_ms, 300);
    let ctx = ctx_with(config);
    assert_eq!(ctx.model().pipe_handles().count(), 3);
    let pipe = ctx.pipe(2).unwrap();
    assert_eq!(ctx.model().pipe(pipe).overlays().len(), 2);
    assert!(ctx.model().pipe(pipe).cursor().is_none());
}

/// A missing file means defaults
#[test]
fn test_missing_file_is_default() {
    let dir = tempdir().unwrap();
    let config = ProbeConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, ProbeConfig::default());
    assert!(matches!(
        ProbeConfig::from_file(&dir.path().join("absent.toml")),
        Err(ConfigError::Io(_))
    ));
}

/// Syntax errors and out-of-range values are reported, not defaulted
#[test]
fn test_bad_files_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kmsprobe.toml");

    std::fs::write(&path, "fence_timeout_ms = \"soon\"\n").unwrap();
    assert!(matches!(ProbeConfig::from_file(&path), Err(ConfigError::Parse(_))));

    std::fs::write(&path, "test_only_repeats = 0\n").unwrap();
    assert!(matches!(ProbeConfig::from_file(&path), Err(ConfigError::Invalid(_))));

    std::fs::write(&path, "cursor_size = 128\n").unwrap();
    assert!(matches!(ProbeConfig::from_file(&path), Err(ConfigError::Invalid(_))));

    std::fs::write(&path, "[device]\npipes = 0\n").unwrap();
    assert!(matches!(ProbeConfig::from_file(&path), Err(ConfigError::Invalid(_))));
}

/// An invalid in-memory config never reaches the device
#[test]
fn test_context_validates_config() {
    let result = KmsContext::with_reference_device(ProbeConfig {
        fence_timeout_ms: 0,
        ..Default::default()
    });
    assert!(matches!(
        result,
        Err(VerifyError::Config(ConfigError::Invalid(_)))
    ));
}
