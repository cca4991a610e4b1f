//! Engine configuration types.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::OpError;

/// Configuration shared by every job an engine runs.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Ask before permanently deleting files or emptying the trash.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub confirm_trash: bool,

    /// Minimum spacing between two transfer or delete progress updates.
    #[builder(default = "100")]
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Seconds of transfer before rate and remaining time are reported.
    #[builder(default = "15")]
    #[serde(default = "default_reliable_rate_secs")]
    pub reliable_rate_secs: u64,

    /// Files counted between two scan progress updates.
    #[builder(default = "100")]
    #[serde(default = "default_scan_report_every")]
    pub scan_report_every: usize,

    /// Capacity of each job's event channel.
    #[builder(default = "100")]
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,

    /// Root of a directory-backed trash store (None = the system trash).
    #[builder(default)]
    #[serde(default)]
    pub trash_dir: Option<PathBuf>,

    /// Locations whose contents are deleted instead of trashed.
    #[builder(default)]
    #[serde(default)]
    pub staging_dirs: Vec<PathBuf>,

    /// The desktop icon layer.
    #[builder(default)]
    #[serde(default)]
    pub desktop_dir: Option<PathBuf>,

    /// System directories holding trusted launchers.
    #[builder(default = "default_launcher_dirs()")]
    #[serde(default = "default_launcher_dirs")]
    pub launcher_dirs: Vec<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_progress_interval_ms() -> u64 {
    100
}

fn default_reliable_rate_secs() -> u64 {
    15
}

fn default_scan_report_every() -> usize {
    100
}

fn default_channel_size() -> usize {
    100
}

fn default_launcher_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/share/applications"),
        PathBuf::from("/usr/local/share/applications"),
    ];
    if let Some(data) = dirs::data_dir() {
        dirs.push(data.join("applications"));
    }
    dirs
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.channel_size == Some(0) {
            return Err("channel_size must be greater than zero".to_string());
        }
        if self.scan_report_every == Some(0) {
            return Err("scan_report_every must be greater than zero".to_string());
        }
        if let Some(Some(dir)) = &self.trash_dir {
            if dir.is_relative() {
                return Err(format!("trash_dir must be absolute: {}", dir.display()));
            }
        }
        if let Some(Some(dir)) = &self.desktop_dir {
            if dir.is_relative() {
                return Err(format!("desktop_dir must be absolute: {}", dir.display()));
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Create a config with every field at its default.
    pub fn new() -> Self {
        Self {
            confirm_trash: true,
            progress_interval_ms: default_progress_interval_ms(),
            reliable_rate_secs: default_reliable_rate_secs(),
            scan_report_every: default_scan_report_every(),
            channel_size: default_channel_size(),
            trash_dir: None,
            staging_dirs: Vec::new(),
            desktop_dir: None,
            launcher_dirs: default_launcher_dirs(),
        }
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("haul").join("config.toml"))
    }

    /// Load the configuration from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, OpError> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::new()),
        }
    }

    /// Load the configuration from a specific file, falling back to the
    /// defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, OpError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(OpError::io(path, e)),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, OpError> {
        let config: Self = toml::from_str(content).map_err(|e| OpError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), OpError> {
        let builder = EngineConfigBuilder {
            channel_size: Some(self.channel_size),
            scan_report_every: Some(self.scan_report_every),
            trash_dir: Some(self.trash_dir.clone()),
            desktop_dir: Some(self.desktop_dir.clone()),
            ..Default::default()
        };
        builder
            .validate()
            .map_err(|message| OpError::InvalidConfig { message })
    }

    /// Whether the path lies inside one of the staging locations.
    pub fn is_staging(&self, path: &Path) -> bool {
        self.staging_dirs.iter().any(|dir| path.starts_with(dir))
    }

    /// Whether the path lies on the desktop icon layer.
    pub fn is_on_desktop(&self, path: &Path) -> bool {
        self.desktop_dir
            .as_deref()
            .is_some_and(|dir| path.starts_with(dir))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .confirm_trash(false)
            .channel_size(8usize)
            .trash_dir(Some(PathBuf::from("/tmp/trash")))
            .build()
            .unwrap();

        assert!(!config.confirm_trash);
        assert_eq!(config.channel_size, 8);
        assert_eq!(config.trash_dir, Some(PathBuf::from("/tmp/trash")));
        assert_eq!(config.progress_interval_ms, 100);
        assert_eq!(config.reliable_rate_secs, 15);
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        assert!(EngineConfig::builder().channel_size(0usize).build().is_err());
        assert!(
            EngineConfig::builder()
                .scan_report_every(0usize)
                .build()
                .is_err()
        );
        assert!(
            EngineConfig::builder()
                .desktop_dir(Some(PathBuf::from("Desktop")))
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_from_toml_defaults() {
        let config = EngineConfig::from_toml_str("confirm_trash = false\n").unwrap();
        assert!(!config.confirm_trash);
        assert_eq!(config.scan_report_every, 100);
        assert!(!config.launcher_dirs.is_empty());
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = EngineConfig::from_toml_str("channel_size = 0\n").unwrap_err();
        assert!(matches!(err, OpError::InvalidConfig { .. }));

        let err = EngineConfig::from_toml_str("channel_size = \"many\"\n").unwrap_err();
        assert!(matches!(err, OpError::InvalidConfig { .. }));
    }

    #[test]
    fn test_staging_and_desktop() {
        let mut config = EngineConfig::new();
        config.staging_dirs = vec![PathBuf::from("/media/burn")];
        config.desktop_dir = Some(PathBuf::from("/home/u/Desktop"));

        assert!(config.is_staging(Path::new("/media/burn/a.iso")));
        assert!(!config.is_staging(Path::new("/media/other")));
        assert!(config.is_on_desktop(Path::new("/home/u/Desktop/x")));
        assert!(!config.is_on_desktop(Path::new("/home/u/Documents")));
    }
}
