use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8000).
    pub bind_addr: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Reference images of known people; file names are labels.
    pub known_faces_dir: PathBuf,
    /// Where uploaded images are stored and served from.
    pub upload_dir: PathBuf,
    /// Maximum Euclidean distance for a positive recognition. Descriptors
    /// from the ONNX engine are spaced in `[0, 1]`; values at or above the
    /// 1.0 unknown distance add nothing.
    pub match_threshold: f32,
    /// Timeout in seconds for a single engine call.
    pub request_timeout_secs: u64,
    /// Maximum accepted request body size.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: &str| PathBuf::from(var(key).unwrap_or_else(|| default.to_string()));

        Self {
            bind_addr: var("FACEMATCH_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            model_dir: var("FACEMATCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facematch_vision::default_model_dir),
            known_faces_dir: path("FACEMATCH_KNOWN_FACES_DIR", "known_faces"),
            upload_dir: path("FACEMATCH_UPLOAD_DIR", "uploads"),
            match_threshold: parsed(&var, "FACEMATCH_MATCH_THRESHOLD", facematch_core::DEFAULT_MATCH_THRESHOLD),
            request_timeout_secs: parsed(&var, "FACEMATCH_REQUEST_TIMEOUT_SECS", 30),
            max_upload_bytes: parsed(&var, "FACEMATCH_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
