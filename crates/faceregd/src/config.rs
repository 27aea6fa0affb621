use facereg_core::{MatchStrategy, ModelPaths};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Daemon configuration.
///
/// Built from defaults, then the TOML file named by `FACEREG_CONFIG` (if
/// any), then `FACEREG_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a probe matches an enrolled face.
    /// Defaults to the ArcFace calibration (cosine 0.40, distance ~1.095).
    pub match_threshold: f32,
    pub match_strategy: MatchStrategy,
    /// Origins allowed by CORS.
    pub cors_origins: Vec<String>,
    /// Detector upsampling steps for registration and recognition.
    pub upsample_count: u32,
    /// Descriptor resampling count.
    pub jitter_count: u32,
    /// Request body limit for uploads.
    pub max_upload_bytes: usize,
}

/// On-disk form of [`Config`]; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen_addr: Option<SocketAddr>,
    pub model_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub match_threshold: Option<f32>,
    pub match_strategy: Option<String>,
    pub cors_origins: Option<Vec<String>>,
    pub upsample_count: Option<u32>,
    pub jitter_count: Option<u32>,
    pub max_upload_bytes: Option<usize>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facereg");

        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            model_dir: facereg_core::default_model_dir(),
            db_path: data_dir.join("faces.db"),
            match_threshold: facereg_core::arcface_match_threshold(),
            match_strategy: MatchStrategy::First,
            cors_origins: vec!["http://localhost:3000".to_string()],
            upsample_count: 0,
            jitter_count: 1,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load from `FACEREG_CONFIG` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("FACEREG_CONFIG") {
            Some(path) => Some(FileConfig::read(Path::new(&path))?),
            None => None,
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Layer an optional file and an environment lookup over the defaults.
    pub fn from_sources(
        file: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(file) = file {
            config.apply_file(file)?;
        }

        if let Some(v) = env("FACEREG_LISTEN_ADDR") {
            config.listen_addr = parse("FACEREG_LISTEN_ADDR", &v)?;
        }
        if let Some(v) = env("FACEREG_MODEL_DIR") {
            config.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env("FACEREG_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = env("FACEREG_MATCH_THRESHOLD") {
            config.match_threshold = parse("FACEREG_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = env("FACEREG_MATCH_STRATEGY") {
            config.match_strategy = parse_strategy("FACEREG_MATCH_STRATEGY", &v)?;
        }
        if let Some(v) = env("FACEREG_CORS_ORIGINS") {
            config.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = env("FACEREG_UPSAMPLE") {
            config.upsample_count = parse("FACEREG_UPSAMPLE", &v)?;
        }
        if let Some(v) = env("FACEREG_JITTERS") {
            config.jitter_count = parse("FACEREG_JITTERS", &v)?;
        }
        if let Some(v) = env("FACEREG_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = parse("FACEREG_MAX_UPLOAD_BYTES", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(v) = file.listen_addr {
            self.listen_addr = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.match_strategy {
            self.match_strategy = parse_strategy("match_strategy", &v)?;
        }
        if let Some(v) = file.cors_origins {
            self.cors_origins = v;
        }
        if let Some(v) = file.upsample_count {
            self.upsample_count = v;
        }
        if let Some(v) = file.jitter_count {
            self.jitter_count = v;
        }
        if let Some(v) = file.max_upload_bytes {
            self.max_upload_bytes = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                message: format!("must be a positive number, got {}", self.match_threshold),
            });
        }
        Ok(())
    }

    /// Locations of the ONNX model files.
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}

fn parse_strategy(key: &'static str, value: &str) -> Result<MatchStrategy, ConfigError> {
    value
        .parse()
        .map_err(|message| ConfigError::Invalid { key, message })
}
