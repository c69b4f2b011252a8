//! Configuration management for the save guard.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`SAVEGUARD_WATCH__SAVE_PATH`, `SAVEGUARD_REMOTE__TOKEN`, ...).

use crate::fs::walker;
use crate::remote::github::DEFAULT_API_URL;
use crate::utils::{LogSink, Result, SaveGuardError, Severity};
use crate::watch::{DetectorStrategy, WatchTarget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Read from the working directory when no file is given
pub const DEFAULT_CONFIG_FILE: &str = "saveguard.toml";

const ENV_PREFIX: &str = "SAVEGUARD";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub remote: RemoteConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory holding the live save file
    pub save_path: Option<PathBuf>,

    /// Where timestamped backups go (default: `{exe_dir}/{map}-backup`)
    pub backup_path: Option<PathBuf>,

    /// Save file name without extension (detected when unset)
    pub map_name: Option<String>,

    pub extension: String,

    /// Start monitoring when the binary runs without a command
    pub auto_start: bool,

    pub detector: DetectorStrategy,

    /// Interval for the polling detector
    pub poll_interval_secs: u64,

    /// Keep only this many local backups (unset keeps everything)
    pub keep_backups: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Personal access token; empty disables remote sync
    pub token: String,

    pub api_url: String,

    /// Directory in which the `{map}-repo` clone lives
    pub clone_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            save_path: None,
            backup_path: None,
            map_name: None,
            extension: "ark".to_string(),
            auto_start: false,
            detector: DetectorStrategy::default(),
            poll_interval_secs: 30,
            keep_backups: None,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            clone_root: PathBuf::from("."),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Self::build(path, true, ENV_PREFIX)
    }

    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] if present, then apply the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::build(path, true, ENV_PREFIX),
            None => Self::build(Path::new(DEFAULT_CONFIG_FILE), false, ENV_PREFIX),
        }
    }

    fn build(path: &Path, required: bool, env_prefix: &str) -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                ::config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.watch.poll_interval_secs.max(1))
    }

    /// Token for remote sync, if one is configured.
    pub fn remote_token(&self) -> Option<&str> {
        let token = self.remote.token.trim();
        (!token.is_empty()).then_some(token)
    }

    /// The configured save directory.
    pub fn save_dir(&self) -> Result<&Path> {
        self.watch
            .save_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| SaveGuardError::Config("watch.save_path is not set".to_string()))
    }

    /// Resolve the watch target: detect the map name and default the
    /// backup directory when they are not configured.
    pub fn watch_target(&self, log: &dyn LogSink) -> Result<WatchTarget> {
        let save_dir = self.save_dir()?;
        if !save_dir.is_dir() {
            return Err(SaveGuardError::NotFound(format!(
                "Save directory not found: {}",
                save_dir.display()
            )));
        }

        let map_name = match self.watch.map_name.as_deref().filter(|m| !m.is_empty()) {
            Some(map_name) => map_name.to_string(),
            None => {
                let detected = detect_map_name(save_dir, &self.watch.extension)?;
                log.log(&format!("Detected map: {}", detected), Severity::Success);
                detected
            }
        };

        let backup_dir = match self.watch.backup_path.as_deref().filter(|p| !p.as_os_str().is_empty()) {
            Some(backup_dir) => backup_dir.to_path_buf(),
            None => default_backup_dir(&map_name)?,
        };
        if !backup_dir.exists() {
            std::fs::create_dir_all(&backup_dir)?;
            log.log(
                &format!("Created backup directory: {}", backup_dir.display()),
                Severity::Success,
            );
        }

        Ok(WatchTarget::new(
            save_dir,
            map_name,
            &self.watch.extension,
            backup_dir,
        ))
    }
}

/// Map name of the save folder: the stem of the `*.{extension}` file with
/// the shortest name. Per-player files share the extension but have longer
/// names than the world save.
pub fn detect_map_name(save_dir: &Path, extension: &str) -> Result<String> {
    let candidates = walker::list_files(save_dir)?;
    candidates
        .iter()
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(|n| (path, n.len())))
        .min_by_key(|(_, len)| *len)
        .and_then(|(path, _)| path.file_stem().and_then(|s| s.to_str()))
        .map(str::to_string)
        .ok_or_else(|| {
            SaveGuardError::NotFound(format!(
                "No .{} file found in {}",
                extension,
                save_dir.display()
            ))
        })
}

/// `{exe_dir}/{map}-backup`
pub fn default_backup_dir(map_name: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let exe_dir = exe
        .parent()
        .ok_or_else(|| SaveGuardError::Config("executable has no parent directory".to_string()))?;
    Ok(exe_dir.join(format!("{}-backup", map_name)))
}
