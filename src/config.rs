use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const MIN_GRACEFUL_KILL_SECS: u64 = 5;
const MIN_SHUTDOWN_GRACE_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// On-disk document shape. Every field is optional so a partial or missing
/// config file falls back to `Config::default()` field by field, rather
/// than failing outright — matching the teacher's settings-module split
/// between a saved document and built-in defaults.
#[derive(Debug, Default, Deserialize)]
struct ConfigDoc {
    workers: Option<usize>,
    upload_dir: Option<String>,
    transcripts_dir: Option<String>,
    database_path: Option<String>,
    graceful_kill_timeout_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
}

/// Recognized configuration options (§6.4), plus `database_path`: the
/// Metadata Store needs somewhere on disk to open, which spec.md leaves
/// unspecified since it only fixes the store's contract, not its backing
/// file.
#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub upload_dir: PathBuf,
    pub transcripts_dir: PathBuf,
    pub database_path: PathBuf,
    pub graceful_kill_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            upload_dir: PathBuf::from("./data/uploads"),
            transcripts_dir: PathBuf::from("./data/transcripts"),
            database_path: PathBuf::from("./data/orchestrator.sqlite3"),
            graceful_kill_timeout: Duration::from_secs(MIN_GRACEFUL_KILL_SECS),
            shutdown_grace: Duration::from_secs(MIN_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl Config {
    /// Loads configuration from `path` if it exists (TOML), falling back
    /// to defaults field-by-field when the file is absent, then applies
    /// `ORCHESTRATOR_<FIELD>` environment overrides. Missing file is not an
    /// error; a malformed file is.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let doc = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<ConfigDoc>(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            ConfigDoc::default()
        };

        let defaults = Config::default();
        let mut config = Config {
            workers: doc.workers.unwrap_or(defaults.workers),
            upload_dir: doc
                .upload_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            transcripts_dir: doc
                .transcripts_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.transcripts_dir),
            database_path: doc
                .database_path
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            graceful_kill_timeout: doc
                .graceful_kill_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.graceful_kill_timeout),
            shutdown_grace: doc
                .shutdown_grace_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ORCHESTRATOR_WORKERS") {
            if let Ok(parsed) = v.parse() {
                self.workers = parsed;
            }
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_TRANSCRIPTS_DIR") {
            self.transcripts_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_GRACEFUL_KILL_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse() {
                self.graceful_kill_timeout = Duration::from_secs(parsed);
            }
        }
        if let Ok(v) = std::env::var("ORCHESTRATOR_SHUTDOWN_GRACE_SECS") {
            if let Ok(parsed) = v.parse() {
                self.shutdown_grace = Duration::from_secs(parsed);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be >= 1".into()));
        }
        if self.graceful_kill_timeout < Duration::from_secs(MIN_GRACEFUL_KILL_SECS) {
            return Err(ConfigError::Invalid(format!(
                "graceful_kill_timeout must be >= {MIN_GRACEFUL_KILL_SECS}s"
            )));
        }
        if self.shutdown_grace < Duration::from_secs(MIN_SHUTDOWN_GRACE_SECS) {
            return Err(ConfigError::Invalid(format!(
                "shutdown_grace must be >= {MIN_SHUTDOWN_GRACE_SECS}s"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let path = std::path::Path::new("/nonexistent/orchestrator.toml");
        let config = Config::load(path).expect("missing file falls back to defaults");
        assert_eq!(config.workers, Config::default().workers);
    }

    #[test]
    fn load_rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.toml");
        std::fs::write(&path, "workers = 0\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_parses_partial_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestrator.toml");
        std::fs::write(&path, "workers = 3\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.upload_dir, Config::default().upload_dir);
    }
}
