//! JSON configuration files driving full runs

use std::io::Write;

use tempfile::NamedTempFile;
use tiled_mxv::config::StrategyConfig;
use tiled_mxv::device::QueueMode;
use tiled_mxv::runner::execute;
use tiled_mxv::team::{TeamLayout, TileDistribution};
use tiled_mxv::{MxvError, RunConfig};

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("test");
    file.write_all(json.as_bytes()).expect("test");
    file.flush().expect("test");
    file
}

#[test]
fn test_offload_config_file_runs() {
    let file = write_config(
        r#"{
            "n": 10,
            "block_size": 4,
            "verify": true,
            "strategy": {"staged_offload": {"queue": "deferred", "device_memory": 1048576}}
        }"#,
    );
    let config = RunConfig::from_json_file(file.path()).expect("test");
    assert_eq!(
        config.strategy,
        StrategyConfig::StagedOffload {
            queue: QueueMode::Deferred,
            device_memory: Some(1_048_576),
        }
    );

    let report = execute(&config).expect("test");
    assert!(report.is_clean());
    assert_eq!(report.padded, 12);
    assert_eq!(report.y[0], 45.0);
}

#[test]
fn test_distributed_config_file_runs() {
    let file = write_config(
        r#"{
            "n": 20,
            "block_size": 3,
            "verify": true,
            "strategy": {"distributed_tile": {"workers": 6, "layout": {"rows": 2, "cols": 3}, "distribution": "blocked"}}
        }"#,
    );
    let config = RunConfig::from_json_file(file.path()).expect("test");
    assert_eq!(config.strategy.resolved_layout(), Some(TeamLayout::new(2, 3)));

    let report = execute(&config).expect("test");
    assert!(report.is_clean());
    assert_eq!(report.strategy, "distributed-tile");
}

#[test]
fn test_saved_config_reloads() {
    let mut config = RunConfig::distributed(16, 4, 2).with_verify(true);
    config.strategy = StrategyConfig::DistributedTile {
        workers: 2,
        layout: None,
        distribution: TileDistribution::Blocked,
    };
    let file = write_config(&config.to_json().expect("test"));
    assert_eq!(RunConfig::from_json_file(file.path()).expect("test"), config);
}

#[test]
fn test_invalid_config_file_rejected() {
    let bad_layout = write_config(
        r#"{"n": 8, "block_size": 4, "strategy": {"distributed_tile": {"workers": 4, "layout": {"rows": 3, "cols": 2}}}}"#,
    );
    assert!(matches!(
        RunConfig::from_json_file(bad_layout.path()),
        Err(MxvError::InvalidLayout { .. })
    ));

    let malformed = write_config(r#"{"n": "eight"}"#);
    assert!(matches!(
        RunConfig::from_json_file(malformed.path()),
        Err(MxvError::ConfigParse { .. })
    ));
}
