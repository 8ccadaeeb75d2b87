// Service configuration
// Read once from the environment at startup; every value has a default

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fretboard::DEFAULT_MAX_FRET;
use crate::transcription::TranscriberThresholds;

const MEGABYTE: usize = 1024 * 1024;

pub const DEFAULT_SEPARATOR_URL: &str = "http://localhost:5001";
pub const DEFAULT_TAB_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_STEM_ADDR: &str = "0.0.0.0:5001";

/// Settings shared by the tab service and the separation service
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the separation service
    pub separator_url: String,

    /// Bind address of the tab service
    pub tab_addr: SocketAddr,

    /// Bind address of the separation service
    pub stem_addr: SocketAddr,

    /// Root directory for request-scoped artifacts
    pub work_dir: PathBuf,

    /// Highest fret the placement stage may use
    pub max_fret: u8,

    /// Interval between heartbeat events while a long call is pending
    pub heartbeat_interval: Duration,

    /// basic-pitch executable
    pub transcriber_bin: String,

    /// Onset and frame thresholds passed to basic-pitch
    pub transcriber_thresholds: TranscriberThresholds,

    /// audio-separator executable
    pub separator_bin: String,

    /// Separation model file name
    pub separator_model: String,

    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,

    /// Separated stems not downloaded within this window are deleted
    pub download_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            separator_url: DEFAULT_SEPARATOR_URL.to_string(),
            tab_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            stem_addr: SocketAddr::from(([0, 0, 0, 0], 5001)),
            work_dir: default_work_dir(),
            max_fret: DEFAULT_MAX_FRET,
            heartbeat_interval: Duration::from_secs(15),
            transcriber_bin: "basic-pitch".to_string(),
            transcriber_thresholds: TranscriberThresholds::default(),
            separator_bin: "audio-separator".to_string(),
            separator_model: "htdemucs_6s.yaml".to_string(),
            max_upload_bytes: 200 * MEGABYTE,
            download_ttl: Duration::from_secs(3600),
        }
    }
}

impl AppConfig {
    /// Build the configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        AppConfig {
            separator_url: get("SEPARATOR_URL").unwrap_or(defaults.separator_url),
            tab_addr: parse_or(get("TABFORGE_ADDR"), "TABFORGE_ADDR", defaults.tab_addr),
            stem_addr: parse_or(get("STEM_SERVER_ADDR"), "STEM_SERVER_ADDR", defaults.stem_addr),
            work_dir: get("TABFORGE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_fret: parse_or(get("TABFORGE_MAX_FRET"), "TABFORGE_MAX_FRET", defaults.max_fret),
            heartbeat_interval: Duration::from_secs(
                parse_or(
                    get("TABFORGE_HEARTBEAT_SECS"),
                    "TABFORGE_HEARTBEAT_SECS",
                    defaults.heartbeat_interval.as_secs(),
                )
                .max(1),
            ),
            transcriber_bin: get("BASIC_PITCH_BIN").unwrap_or(defaults.transcriber_bin),
            transcriber_thresholds: TranscriberThresholds {
                onset: parse_or(
                    get("BASIC_PITCH_ONSET_THRESHOLD"),
                    "BASIC_PITCH_ONSET_THRESHOLD",
                    defaults.transcriber_thresholds.onset,
                ),
                frame: parse_or(
                    get("BASIC_PITCH_FRAME_THRESHOLD"),
                    "BASIC_PITCH_FRAME_THRESHOLD",
                    defaults.transcriber_thresholds.frame,
                ),
            },
            separator_bin: get("AUDIO_SEPARATOR_BIN").unwrap_or(defaults.separator_bin),
            separator_model: get("SEPARATOR_MODEL").unwrap_or(defaults.separator_model),
            max_upload_bytes: parse_or(
                get("TABFORGE_MAX_UPLOAD_MB"),
                "TABFORGE_MAX_UPLOAD_MB",
                defaults.max_upload_bytes / MEGABYTE,
            )
            .saturating_mul(MEGABYTE),
            download_ttl: Duration::from_secs(parse_or(
                get("STEM_DOWNLOAD_TTL_SECS"),
                "STEM_DOWNLOAD_TTL_SECS",
                defaults.download_ttl.as_secs(),
            )),
        }
    }

    /// Per-request run directories of the tab service
    pub fn runs_dir(&self) -> PathBuf {
        self.work_dir.join("runs")
    }

}

/// Default work directory under the user's cache dir
fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tabforge")
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        Some(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("Ignoring invalid {}={:?}, using default", key, value);
                default
            }
        },
        None => default,
    }
}
