//! Configuration resolution.
//!
//! The data directory is taken from, in order:
//! 1. the command line
//! 2. `ALBUM_SHELF_DATA_DIR`
//! 3. `data_dir` in `<config_dir>/album-shelf/config.toml`
//! 4. `<data_dir>/album-shelf` for the platform

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::carousel::ShuffleConfig;
use crate::theme::ColorConfig;

pub const APP_DIR_NAME: &str = "album-shelf";
pub const DATA_DIR_ENV: &str = "ALBUM_SHELF_DATA_DIR";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const COVERS_DIR_NAME: &str = "covers";
pub const UNKNOWN_COVER_FILE_NAME: &str = "unknown_cover.png";
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a data directory for this platform")]
    DataDirUnavailable,
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub unknown_cover: Option<PathBuf>,
    pub cover_lookup: Option<bool>,
    pub lookup_timeout_secs: Option<u64>,
    pub shuffle: ShuffleConfig,
    pub colors: ColorConfig,
}

impl FileConfig {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads `path`. A missing file is only an error when `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(error) if error.kind() == io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub covers_dir: PathBuf,
    pub unknown_cover: PathBuf,
    pub cover_lookup: bool,
    pub lookup_timeout: Duration,
    pub shuffle: ShuffleConfig,
    pub colors: ColorConfig,
}

impl AppConfig {
    /// Defaults rooted at `data_dir`.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            covers_dir: data_dir.join(COVERS_DIR_NAME),
            unknown_cover: data_dir.join(UNKNOWN_COVER_FILE_NAME),
            data_dir,
            cover_lookup: true,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            shuffle: ShuffleConfig::default(),
            colors: ColorConfig::default(),
        }
    }

    /// Resolves the configuration from the command line, the environment,
    /// the config file and platform defaults.
    pub fn resolve(
        cli_data_dir: Option<&Path>,
        config_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => FileConfig::load(path, true)?,
            None => match default_config_path() {
                Some(path) => FileConfig::load(&path, false)?,
                None => FileConfig::default(),
            },
        };
        let env_data_dir = std::env::var_os(DATA_DIR_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Self::from_sources(cli_data_dir, env_data_dir, file, default_data_dir())
    }

    pub fn from_sources(
        cli_data_dir: Option<&Path>,
        env_data_dir: Option<PathBuf>,
        file: FileConfig,
        default_data_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let data_dir = cli_data_dir
            .map(Path::to_path_buf)
            .or(env_data_dir)
            .or(file.data_dir)
            .or(default_data_dir)
            .ok_or(ConfigError::DataDirUnavailable)?;

        let mut config = Self::for_data_dir(data_dir);
        if let Some(unknown_cover) = file.unknown_cover {
            config.unknown_cover = unknown_cover;
        }
        if let Some(enabled) = file.cover_lookup {
            config.cover_lookup = enabled;
        }
        if let Some(seconds) = file.lookup_timeout_secs.filter(|seconds| *seconds > 0) {
            config.lookup_timeout = Duration::from_secs(seconds);
        }
        config.shuffle = file.shuffle.sanitized();
        config.colors = file.colors;
        Ok(config)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn command_line_wins_over_everything() {
        let file = FileConfig {
            data_dir: Some(PathBuf::from("/from/file")),
            ..FileConfig::default()
        };
        let config = AppConfig::from_sources(
            Some(Path::new("/from/cli")),
            Some(PathBuf::from("/from/env")),
            file,
            Some(PathBuf::from("/default")),
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/from/cli"));
        assert_eq!(config.covers_dir, PathBuf::from("/from/cli/covers"));
    }

    #[test]
    fn falls_through_env_file_and_default() {
        let file = || FileConfig {
            data_dir: Some(PathBuf::from("/from/file")),
            ..FileConfig::default()
        };
        let env = AppConfig::from_sources(None, Some(PathBuf::from("/from/env")), file(), None);
        assert_eq!(env.unwrap().data_dir, PathBuf::from("/from/env"));

        let from_file = AppConfig::from_sources(None, None, file(), None);
        assert_eq!(from_file.unwrap().data_dir, PathBuf::from("/from/file"));

        let default = AppConfig::from_sources(
            None,
            None,
            FileConfig::default(),
            Some(PathBuf::from("/default")),
        );
        assert_eq!(default.unwrap().data_dir, PathBuf::from("/default"));

        assert!(matches!(
            AppConfig::from_sources(None, None, FileConfig::default(), None),
            Err(ConfigError::DataDirUnavailable)
        ));
    }

    #[test]
    fn file_overrides_tunables() {
        let text = r#"
            cover_lookup = false
            lookup_timeout_secs = 3
            unknown_cover = "/assets/unknown.png"

            [shuffle]
            final_pause_ms = 0

            [colors]
            bucket_size = 16
        "#;
        let file = FileConfig::parse(text, Path::new("config.toml")).unwrap();
        let config =
            AppConfig::from_sources(None, None, file, Some(PathBuf::from("/data"))).unwrap();

        assert!(!config.cover_lookup);
        assert_eq!(config.lookup_timeout, Duration::from_secs(3));
        assert_eq!(config.unknown_cover, PathBuf::from("/assets/unknown.png"));
        assert_eq!(config.shuffle.final_pause_ms, 0);
        assert_eq!(config.shuffle.start_interval_ms, 50);
        assert_eq!(config.colors.bucket_size, 16);
        assert_eq!(config.colors.sample_stride, 4);
    }

    #[test]
    fn non_finite_shuffle_acceleration_is_replaced() {
        let text = r#"
            [shuffle]
            min_acceleration = nan
            max_acceleration = inf
        "#;
        let file = FileConfig::parse(text, Path::new("config.toml")).unwrap();
        let config =
            AppConfig::from_sources(None, None, file, Some(PathBuf::from("/data"))).unwrap();
        assert_eq!(config.shuffle, ShuffleConfig::default());
    }

    #[test]
    fn missing_optional_file_is_default_but_required_is_not() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        assert!(FileConfig::load(&path, false).unwrap().data_dir.is_none());
        assert!(matches!(
            FileConfig::load(&path, true),
            Err(ConfigError::Io { .. })
        ));

        fs::write(&path, "cover_lookup = \"maybe\"").unwrap();
        assert!(matches!(
            FileConfig::load(&path, false),
            Err(ConfigError::Parse { .. })
        ));
    }
}
