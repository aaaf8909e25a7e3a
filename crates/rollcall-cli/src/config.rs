use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Kiosk configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base directory for every default path below.
    pub data_dir: PathBuf,
    /// Directory of `<name>.jpg` / `<name>.png` reference images.
    pub faces_dir: PathBuf,
    /// Plain-text roster, one `<name> <roll>` per line.
    pub roster_path: PathBuf,
    /// SQLite attendance ledger.
    pub ledger_path: PathBuf,
    /// SQLite embedding cache.
    pub cache_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    /// Largest Euclidean distance accepted as a match. Defaults to the
    /// calibrated value for the ArcFace embedder.
    pub match_tolerance: f32,
    /// Live recognition gives up after this many seconds.
    pub recognize_timeout_secs: u64,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// Text-to-speech program and arguments; empty disables speech.
    pub speech_command: String,
}

/// Keys accepted in `rollcall.toml`. Data-dir and config-path are env only.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub faces_dir: Option<PathBuf>,
    pub roster_path: Option<PathBuf>,
    pub ledger_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub camera_device: Option<String>,
    pub match_tolerance: Option<f32>,
    pub recognize_timeout_secs: Option<u64>,
    pub warmup_frames: Option<usize>,
    pub speech_command: Option<String>,
}

impl Config {
    /// Load from the process environment and the config file it points at.
    ///
    /// A missing file at the default location is fine; a missing file named
    /// explicitly by `ROLLCALL_CONFIG` is an error.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();

        let data_dir = env("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let file = match env("ROLLCALL_CONFIG") {
            Some(path) => read_file_config(Path::new(&path))?,
            None => {
                let path = data_dir.join("rollcall.toml");
                if path.exists() {
                    read_file_config(&path)?
                } else {
                    FileConfig::default()
                }
            }
        };

        Ok(Self::resolve(data_dir, file, env))
    }

    /// Merge file values and environment overrides onto the defaults.
    pub fn resolve(
        data_dir: PathBuf,
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let path = |key: &str, from_file: Option<PathBuf>, default: &str| {
            env(key)
                .map(PathBuf::from)
                .or(from_file)
                .unwrap_or_else(|| data_dir.join(default))
        };

        Self {
            faces_dir: path("ROLLCALL_FACES_DIR", file.faces_dir, "known_faces"),
            roster_path: path("ROLLCALL_ROSTER_PATH", file.roster_path, "students.txt"),
            ledger_path: path("ROLLCALL_LEDGER_PATH", file.ledger_path, "attendance.db"),
            cache_path: path("ROLLCALL_CACHE_PATH", file.cache_path, "embeddings.db"),
            model_dir: path("ROLLCALL_MODEL_DIR", file.model_dir, "models"),
            camera_device: env("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            match_tolerance: env_parse(&env, "ROLLCALL_MATCH_TOLERANCE")
                .or(file.match_tolerance)
                .unwrap_or(rollcall_vision::ARCFACE_EUCLIDEAN_TOLERANCE),
            recognize_timeout_secs: env_parse(&env, "ROLLCALL_RECOGNIZE_TIMEOUT_SECS")
                .or(file.recognize_timeout_secs)
                .unwrap_or(30),
            warmup_frames: env_parse(&env, "ROLLCALL_WARMUP_FRAMES")
                .or(file.warmup_frames)
                .unwrap_or(4),
            speech_command: env("ROLLCALL_SPEECH_COMMAND")
                .or(file.speech_command)
                .unwrap_or_else(|| "espeak".to_string()),
            data_dir,
        }
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
}

/// Parse an env value, ignoring unset or malformed values.
fn env_parse<T: std::str::FromStr>(env: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring malformed environment value");
            None
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(PathBuf::from("/data"), FileConfig::default(), lookup(&[]));
        assert_eq!(config.faces_dir, PathBuf::from("/data/known_faces"));
        assert_eq!(config.roster_path, PathBuf::from("/data/students.txt"));
        assert_eq!(config.ledger_path, PathBuf::from("/data/attendance.db"));
        assert_eq!(config.cache_path, PathBuf::from("/data/embeddings.db"));
        assert_eq!(config.model_dir, PathBuf::from("/data/models"));
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.match_tolerance, rollcall_vision::ARCFACE_EUCLIDEAN_TOLERANCE);
        assert!(config.match_tolerance > 1.0);
        assert_eq!(config.recognize_timeout_secs, 30);
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.speech_command, "espeak");
    }

    #[test]
    fn test_file_then_env_precedence() {
        let file: FileConfig = toml::from_str(
            r#"
            faces_dir = "/srv/faces"
            match_tolerance = 0.5
            camera_device = "/dev/video2"
            "#,
        )
        .unwrap();
        let env = lookup(&[
            ("ROLLCALL_MATCH_TOLERANCE", "0.45"),
            ("ROLLCALL_SPEECH_COMMAND", ""),
        ]);
        let config = Config::resolve(PathBuf::from("/data"), file, env);

        assert_eq!(config.faces_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.match_tolerance, 0.45);
        assert_eq!(config.speech_command, "");
    }

    #[test]
    fn test_malformed_env_value_falls_back() {
        let file = FileConfig {
            warmup_frames: Some(8),
            ..Default::default()
        };
        let env = lookup(&[("ROLLCALL_WARMUP_FRAMES", "lots"), ("ROLLCALL_RECOGNIZE_TIMEOUT_SECS", " 5 ")]);
        let config = Config::resolve(PathBuf::from("/data"), file, env);
        assert_eq!(config.warmup_frames, 8);
        assert_eq!(config.recognize_timeout_secs, 5);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "tolerance = 0.5\n").unwrap();
        assert!(read_file_config(&path).is_err());

        std::fs::write(&path, "warmup_frames = 2\n").unwrap();
        assert_eq!(read_file_config(&path).unwrap().warmup_frames, Some(2));
    }
}
