use facelens_core::ModelFiles;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_IMAGE_PIXELS: u64 = 40_000_000;
const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration: defaults, then an optional TOML file, then environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listening port (`PORT`, default 3000).
    pub port: u16,
    pub bind_address: IpAddr,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Writable directory for transient uploads.
    pub upload_dir: PathBuf,
    /// Request body limit for multipart uploads.
    pub max_upload_bytes: usize,
    /// Decoded images above this pixel count are rejected.
    pub max_image_pixels: u64,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Block the listener until every model is loaded.
    pub wait_for_models: bool,
    pub models: ModelFiles,
}

/// On-disk configuration. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    bind_address: Option<IpAddr>,
    model_dir: Option<PathBuf>,
    upload_dir: Option<PathBuf>,
    max_upload_bytes: Option<usize>,
    max_image_pixels: Option<u64>,
    intra_threads: Option<usize>,
    wait_for_models: Option<bool>,
    models: Option<ModelFiles>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
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

impl Config {
    /// Load configuration, reading the TOML file named by `FACELENS_CONFIG` if set.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("FACELENS_CONFIG") {
            Some(path) => FileConfig::read(Path::new(&path))?,
            None => FileConfig::default(),
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: env_parse(&env, "PORT").or(file.port).unwrap_or(DEFAULT_PORT),
            bind_address: env_parse(&env, "FACELENS_BIND_ADDRESS")
                .or(file.bind_address)
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            model_dir: env("FACELENS_MODEL_DIR")
                .map(PathBuf::from)
                .or(file.model_dir)
                .unwrap_or_else(facelens_core::default_model_dir),
            upload_dir: env("FACELENS_UPLOAD_DIR")
                .map(PathBuf::from)
                .or(file.upload_dir)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            max_upload_bytes: env_parse(&env, "FACELENS_MAX_UPLOAD_BYTES")
                .or(file.max_upload_bytes)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            max_image_pixels: env_parse(&env, "FACELENS_MAX_IMAGE_PIXELS")
                .or(file.max_image_pixels)
                .unwrap_or(DEFAULT_MAX_IMAGE_PIXELS),
            intra_threads: env_parse(&env, "FACELENS_INTRA_THREADS")
                .or(file.intra_threads)
                .unwrap_or(DEFAULT_INTRA_THREADS)
                .max(1),
            wait_for_models: env("FACELENS_WAIT_FOR_MODELS")
                .and_then(|v| parse_bool(&v))
                .or(file.wait_for_models)
                .unwrap_or(false),
            models: file.models.unwrap_or_default(),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = env(key)?;
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparseable environment value");
            None
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(FileConfig::default(), env_from(&[]));
        assert_eq!(config.port, 3000);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert!(!config.wait_for_models);
        assert_eq!(config.models, ModelFiles::default());
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_port_from_env() {
        let config = Config::from_sources(FileConfig::default(), env_from(&[("PORT", "8081")]));
        assert_eq!(config.port, 8081);
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let file = FileConfig {
            port: Some(4000),
            ..Default::default()
        };
        let config = Config::from_sources(file, env_from(&[("PORT", "not-a-port")]));
        assert_eq!(config.port, 4000);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            port = 5000
            upload_dir = "/var/tmp/facelens"
            wait_for_models = true

            [models]
            detector = "scrfd_2.5g.onnx"
            "#,
        )
        .unwrap();
        let config = Config::from_sources(
            file,
            env_from(&[("PORT", "6000"), ("FACELENS_WAIT_FOR_MODELS", "0")]),
        );
        assert_eq!(config.port, 6000);
        assert_eq!(config.upload_dir, PathBuf::from("/var/tmp/facelens"));
        assert!(!config.wait_for_models);
        assert_eq!(config.models.detector, "scrfd_2.5g.onnx");
        assert_eq!(config.models.expression, "emotion-ferplus-8.onnx");
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        assert!(toml::from_str::<FileConfig>("prot = 1").is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let err = FileConfig::read(Path::new("/nonexistent/facelens.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_intra_threads_at_least_one() {
        let config = Config::from_sources(
            FileConfig::default(),
            env_from(&[("FACELENS_INTRA_THREADS", "0")]),
        );
        assert_eq!(config.intra_threads, 1);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
