//! Layered configuration: built-in defaults, then an optional YAML, TOML or
//! JSON file, then `ENCORE_`-prefixed environment variables.
//!
//! Nested keys are separated by a double underscore in the environment, so
//! `ENCORE_PLAYBACK__VOLUME=0.5` sets `playback.volume`.

pub mod error;
mod settings;

pub use crate::settings::{BackoffConfig, Config, PlaybackConfig, ServerConfig, StorageConfig, SyncConfig};

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};

/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "ENCORE_";
const FILE_STEM: &str = "encore";
const EXTENSIONS: [&str; 4] = ["yaml", "yml", "toml", "json"];

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "encore")
}

impl Config {
    /// Load from the first `encore.{yaml,yml,toml,json}` in the user's
    /// configuration directory (if any) and the environment.
    pub fn load() -> Result<Self> {
        let file = project_dirs().and_then(|dirs| {
            EXTENSIONS
                .iter()
                .map(|ext| dirs.config_dir().join(format!("{FILE_STEM}.{ext}")))
                .find(|path| path.is_file())
        });
        match file {
            Some(path) => Self::from_file(path),
            None => Self::from_figment(Self::figment(None)?),
        }
    }

    /// Load from `path` and the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_figment(Self::figment(Some(path.as_ref()))?)
    }

    /// The provider stack, for callers that want to add their own layers.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            tracing::debug!(path = %path.display(), "Reading configuration file");
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("toml") => figment.merge(Toml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFile(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().map_err(|e| ErrorKind::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if !self.storage.data_dir.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!(
                "storage.data_dir must be absolute, got {}",
                self.storage.data_dir.display()
            )));
        }
        if self.sync.listing_timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("sync.listing_timeout_secs must be positive".to_string()));
        }
        let backoff = &self.sync.backoff;
        if backoff.initial_ms == 0 || backoff.max_ms < backoff.initial_ms {
            exn::bail!(ErrorKind::Invalid("sync.backoff needs 0 < initial_ms <= max_ms".to_string()));
        }
        if backoff.multiplier == 0 || backoff.max_attempts == Some(0) {
            exn::bail!(ErrorKind::Invalid("sync.backoff multiplier and max_attempts must be positive".to_string()));
        }
        if self.playback.ready_chunks == 0 {
            exn::bail!(ErrorKind::Invalid("playback.ready_chunks must be at least 1".to_string()));
        }
        if self.playback.tick_interval_ms == 0 {
            exn::bail!(ErrorKind::Invalid("playback.tick_interval_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.playback.volume) {
            exn::bail!(ErrorKind::Invalid(format!("playback.volume must be within 0..=1, got {}", self.playback.volume)));
        }
        Ok(())
    }

    /// Directory the default configuration file is looked up in.
    pub fn default_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.sync.listing_timeout(), Duration::from_secs(300));
        assert_eq!(config.playback.ready_chunks, 3);
        assert_eq!(config.playback.tick_interval(), Duration::from_millis(200));
        assert_eq!(config.server.address, "localhost:80");
        assert_eq!(config.storage.database_path().file_name().unwrap(), "library.sqlite");
        assert!(config.storage.blob_dir().starts_with(&config.storage.data_dir));
    }

    #[test]
    fn test_file_then_environment() {
        Jail::expect_with(|jail| {
            let data_dir = jail.directory().join("data");
            jail.create_file(
                "encore.yaml",
                &format!(
                    "storage:\n  data_dir: {}\nplayback:\n  volume: 0.5\n  ready_chunks: 5\nsync:\n  backoff:\n    max_attempts: 7\n",
                    data_dir.display()
                ),
            )?;
            jail.set_env("ENCORE_PLAYBACK__VOLUME", "0.25");
            jail.set_env("ENCORE_SERVER__ADDRESS", "music.lan:8080");

            let config = Config::from_file("encore.yaml").map_err(|e| e.to_string())?;
            assert_eq!(config.storage.data_dir, data_dir);
            assert_eq!(config.playback.volume, 0.25);
            assert_eq!(config.playback.ready_chunks, 5);
            assert_eq!(config.sync.backoff.max_attempts, Some(7));
            assert_eq!(config.sync.backoff.initial_ms, 500);
            assert_eq!(config.server.address, "music.lan:8080");
            Ok(())
        });
    }

    #[rstest]
    #[case::toml("encore.toml", "[playback]\ntick_interval_ms = 50\n")]
    #[case::json("encore.json", r#"{"playback": {"tick_interval_ms": 50}}"#)]
    fn test_other_formats(#[case] name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file(name, contents)?;
            let config = Config::from_file(name).map_err(|e| e.to_string())?;
            assert_eq!(config.playback.tick_interval(), Duration::from_millis(50));
            Ok(())
        });
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = Config::from_file("encore.ini").err().unwrap();
        assert!(matches!(&*err, ErrorKind::UnsupportedFile(_)));
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        Jail::expect_with(|_| {
            let err = Config::from_file("missing.yaml").err().unwrap();
            assert!(matches!(&*err, ErrorKind::Load(_)));
            Ok(())
        });
    }

    #[rstest]
    #[case::relative_data_dir("ENCORE_STORAGE__DATA_DIR", "relative/dir")]
    #[case::loud("ENCORE_PLAYBACK__VOLUME", "1.5")]
    #[case::no_ready_chunks("ENCORE_PLAYBACK__READY_CHUNKS", "0")]
    #[case::no_timeout("ENCORE_SYNC__LISTING_TIMEOUT_SECS", "0")]
    #[case::backoff_inverted("ENCORE_SYNC__BACKOFF__MAX_MS", "10")]
    fn test_invalid_settings(#[case] var: &str, #[case] value: &str) {
        Jail::expect_with(|jail| {
            jail.set_env(var, value);
            let err = Config::from_figment(Config::figment(None).map_err(|e| e.to_string())?).err().unwrap();
            assert!(matches!(&*err, ErrorKind::Invalid(_)), "{err:?}");
            Ok(())
        });
    }
}
