use haul_core::{EngineConfig, OpError, Position, SourceInfo, TransferInfo};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_from_missing_file_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let config = EngineConfig::load_from(&temp.path().join("absent.toml")).unwrap();

    assert!(config.confirm_trash);
    assert_eq!(config.channel_size, 100);
    assert!(config.trash_dir.is_none());
}

#[test]
fn test_load_from_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(
        &path,
        "confirm_trash = false\n\
         progress_interval_ms = 250\n\
         trash_dir = \"/var/tmp/haul-trash\"\n\
         staging_dirs = [\"/media/burn\"]\n",
    )
    .unwrap();

    let config = EngineConfig::load_from(&path).unwrap();
    assert!(!config.confirm_trash);
    assert_eq!(config.progress_interval_ms, 250);
    assert_eq!(config.trash_dir, Some(PathBuf::from("/var/tmp/haul-trash")));
    assert_eq!(config.staging_dirs, vec![PathBuf::from("/media/burn")]);
    assert_eq!(config.reliable_rate_secs, 15);
}

#[test]
fn test_load_from_rejects_relative_trash_dir() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "trash_dir = \"trash\"\n").unwrap();

    let err = EngineConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, OpError::InvalidConfig { .. }));
}

#[test]
fn test_io_error_mapping_on_real_fs() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("missing");
    let err = std::fs::read(&missing).unwrap_err();
    let err = OpError::io(&missing, err);

    assert!(err.is_not_found());
    assert_eq!(err.path(), Some(missing.as_path()));

    let dir = temp.path().join("dir");
    std::fs::create_dir(&dir).unwrap();
    let err = OpError::io(&dir, std::fs::create_dir(&dir).unwrap_err());
    assert!(matches!(err, OpError::AlreadyExists { .. }));

    std::fs::write(dir.join("f"), b"x").unwrap();
    let err = OpError::io(&dir, std::fs::remove_dir(&dir).unwrap_err());
    assert!(matches!(err, OpError::DirectoryNotEmpty { .. }));
}

#[test]
fn test_counters() {
    let mut source = SourceInfo::new();
    source.count(0, true);
    source.count(100, false);

    let transfer = TransferInfo {
        num_files: 1,
        num_bytes: 100,
    };

    assert_eq!(source.num_files, 2);
    assert_eq!(transfer.remaining_secs(&source, Duration::from_secs(1)), Some(0));
}

#[test]
fn test_position_equality() {
    assert_eq!(Position::new(10, -4, 1), Position::new(10, -4, 1));
    assert_ne!(Position::new(10, -4, 1), Position::new(10, -4, 0));
}
