use rollcall_core::monitor::ConfigError as MonitorConfigError;
use rollcall_core::{AlertMode, DetectOptions, MonitorConfig, ReferenceImage};
use rollcall_models::ModelPaths;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("source = \"snapshot\" needs snapshot_path")]
    MissingSnapshotPath,
    #[error(transparent)]
    Monitor(#[from] MonitorConfigError),
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Camera,
    Snapshot,
}

impl FromStr for SourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "camera" => Ok(Self::Camera),
            "snapshot" => Ok(Self::Snapshot),
            _ => Err(()),
        }
    }
}

/// Daemon configuration: TOML file first, then `ROLLCALL_*` overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub source: SourceKind,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Image file re-read on every sample when `source = "snapshot"`.
    pub snapshot_path: Option<PathBuf>,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub recognizer_model: String,
    /// Optional FER+ model (e.g. "emotion-ferplus-8.onnx") for expression scores.
    pub expression_model: Option<String>,
    /// Name of the enrolled person.
    pub label: String,
    /// Paths, `file://` URIs or `http(s)://` URLs of the reference images.
    pub reference_images: Vec<String>,
    pub sample_interval_ms: u64,
    pub miss_threshold: u32,
    /// Euclidean distance below which a face matches the profile.
    pub match_distance_threshold: f32,
    pub tick_timeout_ms: u64,
    pub alert_mode: AlertMode,
    pub notify_duration_ms: u64,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        let monitor = MonitorConfig::default();
        Self {
            source: SourceKind::Camera,
            camera_device: "/dev/video0".to_string(),
            snapshot_path: None,
            model_dir: rollcall_models::default_model_dir(),
            detector_model: rollcall_models::DEFAULT_DETECTOR_MODEL.to_string(),
            recognizer_model: rollcall_models::DEFAULT_RECOGNIZER_MODEL.to_string(),
            expression_model: None,
            label: std::env::var("USER").unwrap_or_else(|_| "user".to_string()),
            reference_images: Vec::new(),
            sample_interval_ms: monitor.sample_interval.as_millis() as u64,
            miss_threshold: monitor.miss_threshold,
            match_distance_threshold: monitor.match_distance_threshold,
            tick_timeout_ms: monitor.tick_timeout.as_millis() as u64,
            alert_mode: monitor.alert_mode,
            notify_duration_ms: monitor.notify_duration.as_millis() as u64,
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (or the default path) and the process environment.
    ///
    /// A missing default file is fine; a missing file named by
    /// `ROLLCALL_CONFIG` is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `ROLLCALL_*` variables as returned by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("ROLLCALL_SOURCE") {
            self.source = v.parse().map_err(|_| invalid("ROLLCALL_SOURCE", &v))?;
        }
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_SNAPSHOT_PATH") {
            self.snapshot_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = lookup("ROLLCALL_RECOGNIZER_MODEL") {
            self.recognizer_model = v;
        }
        if let Some(v) = lookup("ROLLCALL_EXPRESSION_MODEL") {
            self.expression_model = Some(v).filter(|name| !name.is_empty());
        }
        if let Some(v) = lookup("ROLLCALL_LABEL") {
            self.label = v;
        }
        if let Some(v) = lookup("ROLLCALL_REFERENCE_IMAGES") {
            self.reference_images = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("ROLLCALL_ALERT_MODE") {
            self.alert_mode = match v.as_str() {
                "level" => AlertMode::Level,
                "edge" => AlertMode::Edge,
                _ => return Err(invalid("ROLLCALL_ALERT_MODE", &v)),
            };
        }
        env_parse(&lookup, "ROLLCALL_SAMPLE_INTERVAL_MS", &mut self.sample_interval_ms)?;
        env_parse(&lookup, "ROLLCALL_MISS_THRESHOLD", &mut self.miss_threshold)?;
        env_parse(
            &lookup,
            "ROLLCALL_MATCH_DISTANCE_THRESHOLD",
            &mut self.match_distance_threshold,
        )?;
        env_parse(&lookup, "ROLLCALL_TICK_TIMEOUT_MS", &mut self.tick_timeout_ms)?;
        env_parse(&lookup, "ROLLCALL_NOTIFY_DURATION_MS", &mut self.notify_duration_ms)?;
        env_parse(&lookup, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source == SourceKind::Snapshot && self.snapshot_path.is_none() {
            return Err(ConfigError::MissingSnapshotPath);
        }
        self.monitor_config().validate()?;
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            sample_interval: Duration::from_millis(self.sample_interval_ms),
            miss_threshold: self.miss_threshold,
            match_distance_threshold: self.match_distance_threshold,
            tick_timeout: Duration::from_millis(self.tick_timeout_ms),
            alert_mode: self.alert_mode,
            notify_duration: Duration::from_millis(self.notify_duration_ms),
            detect_options: DetectOptions::default(),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        let paths = ModelPaths::in_dir(&self.model_dir, &self.detector_model, &self.recognizer_model);
        match &self.expression_model {
            Some(name) => paths.with_expression(&self.model_dir, name),
            None => paths,
        }
    }

    pub fn references(&self) -> Vec<ReferenceImage> {
        self.reference_images
            .iter()
            .map(|location| ReferenceImage::new(location.as_str()))
            .collect()
    }
}

/// `$XDG_CONFIG_HOME/rollcall/rollcalld.toml`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("rollcall")
        .join("rollcalld.toml")
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(v) = lookup(key) {
        *slot = v.trim().parse().map_err(|_| invalid(key, &v))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_monitor_defaults() {
        let config = Config::default();
        assert_eq!(config.sample_interval_ms, 5000);
        assert_eq!(config.miss_threshold, 10);
        assert_eq!(config.match_distance_threshold, 0.7);
        assert_eq!(config.tick_timeout_ms, 4000);
        assert_eq!(config.alert_mode, AlertMode::Level);
        assert_eq!(config.notify_duration_ms, 2000);
        assert_eq!(config.warmup_frames, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            label = "Alice"
            reference_images = ["/srv/alice/1.png", "file:///srv/alice/2.png"]
            miss_threshold = 3
            alert_mode = "edge"
            "#,
        )
        .unwrap();
        assert_eq!(config.label, "Alice");
        assert_eq!(config.references().len(), 2);
        assert_eq!(config.miss_threshold, 3);
        assert_eq!(config.alert_mode, AlertMode::Edge);
        assert_eq!(config.sample_interval_ms, 5000);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Config::from_toml("sample_rate = 3").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::from_toml("miss_threshold = 3").unwrap();
        config
            .apply_env(env(&[
                ("ROLLCALL_MISS_THRESHOLD", "7"),
                ("ROLLCALL_SOURCE", "snapshot"),
                ("ROLLCALL_SNAPSHOT_PATH", "/tmp/frame.jpg"),
                ("ROLLCALL_REFERENCE_IMAGES", "a.png, b.png,"),
                ("ROLLCALL_ALERT_MODE", "edge"),
            ]))
            .unwrap();
        assert_eq!(config.miss_threshold, 7);
        assert_eq!(config.source, SourceKind::Snapshot);
        assert_eq!(config.snapshot_path, Some(PathBuf::from("/tmp/frame.jpg")));
        assert_eq!(config.reference_images, vec!["a.png", "b.png"]);
        assert_eq!(config.alert_mode, AlertMode::Edge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("ROLLCALL_SAMPLE_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "ROLLCALL_SAMPLE_INTERVAL_MS"));
    }

    #[test]
    fn test_validation() {
        let snapshot = Config {
            source: SourceKind::Snapshot,
            ..Config::default()
        };
        assert!(matches!(snapshot.validate(), Err(ConfigError::MissingSnapshotPath)));

        let zero = Config {
            sample_interval_ms: 0,
            ..Config::default()
        };
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::Monitor(MonitorConfigError::ZeroSampleInterval))
        ));
    }

    #[test]
    fn test_monitor_config_conversion() {
        let config = Config {
            sample_interval_ms: 250,
            tick_timeout_ms: 100,
            ..Config::default()
        };
        let monitor = config.monitor_config();
        assert_eq!(monitor.sample_interval, Duration::from_millis(250));
        assert_eq!(monitor.tick_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_expression_model_is_optional() {
        let config = Config::from_toml(r#"model_dir = "/models""#).unwrap();
        assert_eq!(config.model_paths().expression, None);

        let mut config = Config::from_toml(
            r#"
            model_dir = "/models"
            expression_model = "emotion-ferplus-8.onnx"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.model_paths().expression,
            Some(PathBuf::from("/models/emotion-ferplus-8.onnx"))
        );

        config
            .apply_env(env(&[("ROLLCALL_EXPRESSION_MODEL", "")]))
            .unwrap();
        assert_eq!(config.expression_model, None);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::from_file(Path::new("/nonexistent/rollcalld.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
