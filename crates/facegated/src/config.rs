use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Root of the data layout: registry database, images, signatures.
    pub data_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Maximum signature reads in flight during identification.
    pub signature_reads: usize,
    /// Ceiling in seconds for a whole register/identify request.
    pub request_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FACEGATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let model_dir = std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            listen_addr: std::env::var("FACEGATE_LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            match_threshold: env_f32("FACEGATE_MATCH_THRESHOLD", 1.1),
            signature_reads: env_usize("FACEGATE_SIGNATURE_READS", 4),
            request_timeout_secs: env_u64("FACEGATE_REQUEST_TIMEOUT_SECS", 10),
            data_dir,
            model_dir,
        }
    }

    /// Path to the SQLite registry database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("facegate.db")
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
