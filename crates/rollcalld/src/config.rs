use rollcall_core::gate::DEFAULT_ACCEPT_THRESHOLD;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the classifier artifact (enrolled identities).
    pub artifact_path: PathBuf,
    /// Path to the SQLite attendance ledger.
    pub db_path: PathBuf,
    /// Directory where CSV reports are written.
    pub reports_dir: PathBuf,
    /// Directory where submitted frames are archived for audit.
    /// Archiving is disabled when unset.
    pub staging_dir: Option<PathBuf>,
    /// Confidence at or above which a match marks attendance (inclusive).
    pub accept_threshold: f32,
    /// Timeout in seconds for one recognition round-trip.
    pub recognize_timeout_secs: u64,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let artifact_path = std::env::var("ROLLCALL_CLASSIFIER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("classifier.json"));

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let reports_dir = std::env::var("ROLLCALL_REPORTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("reports"));

        let staging_dir = std::env::var("ROLLCALL_STAGING_DIR").ok().map(PathBuf::from);

        let mut accept_threshold = env_f32("ROLLCALL_ACCEPT_THRESHOLD", DEFAULT_ACCEPT_THRESHOLD);
        if accept_threshold.is_nan() || accept_threshold <= 0.0 || accept_threshold > 1.0 {
            tracing::warn!(
                value = accept_threshold,
                default = DEFAULT_ACCEPT_THRESHOLD,
                "ROLLCALL_ACCEPT_THRESHOLD outside (0, 1], using default"
            );
            accept_threshold = DEFAULT_ACCEPT_THRESHOLD;
        }

        Self {
            model_dir,
            artifact_path,
            db_path,
            reports_dir,
            staging_dir,
            accept_threshold,
            recognize_timeout_secs: env_u64("ROLLCALL_RECOGNIZE_TIMEOUT_SECS", 10),
            session_bus: std::env::var("ROLLCALL_SESSION_BUS").is_ok(),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_models::DETECTOR_MODEL)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_models::EMBEDDER_MODEL)
            .to_string_lossy()
            .into_owned()
    }
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
