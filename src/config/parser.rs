use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default port the bundled server binds when it does not announce another one
pub const DEFAULT_PORT: u16 = 8080;
/// Default installed binary file name
pub const DEFAULT_BINARY_NAME: &str = "libserver.so";
/// Default name of the file the server writes a finished upload to
pub const DEFAULT_UPLOAD_FILE_NAME: &str = "video.mp4";

fn default_binary_name() -> String {
    DEFAULT_BINARY_NAME.to_string()
}

fn default_upload_file_name() -> String {
    DEFAULT_UPLOAD_FILE_NAME.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_grace_period_ms() -> u64 {
    500
}

fn default_readiness_timeout_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    3_000
}

fn default_true() -> bool {
    true
}

/// Configuration for the supervised upload server.
///
/// Only `storageDir` and `assetDir` are required; everything else defaults to
/// the values the receiver has always used.
///
/// # JSON Schema
///
/// ```json
/// {
///   "storageDir": "/data/user/0/receiver/files",
///   "assetDir": "/data/app/receiver/assets",
///   "installDir": "/data/user/0/receiver/files",
///   "binaryName": "libserver.so",
///   "defaultPort": 8080,
///   "gracePeriodMs": 500,
///   "readinessTimeoutMs": 5000,
///   "retryDelayMs": 3000,
///   "restartOnExit": true,
///   "uploadFileName": "video.mp4",
///   "supportedAbis": ["arm64-v8a", "armeabi-v7a"],
///   "env": { "GODEBUG": "netdns=go" }
/// }
/// ```
///
/// # Examples
///
/// ```
/// use upload_supervisor::config::SupervisorConfig;
///
/// let config = SupervisorConfig::parse_from_str(
///     r#"{ "storageDir": "/tmp/uploads", "assetDir": "/opt/assets" }"#,
/// ).unwrap();
/// assert_eq!(config.default_port, 8080);
/// assert_eq!(config.install_dir(), config.storage_dir.as_path());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Directory uploads are written to; passed to the server as its only
    /// argument and used as its working directory.
    pub storage_dir: PathBuf,

    /// Root of the bundled binary catalog (contains `server/libserver_*.so`).
    pub asset_dir: PathBuf,

    /// Where the executable copy is installed. Defaults to `storage_dir`.
    #[serde(default)]
    pub install_dir: Option<PathBuf>,

    /// File name of the installed copy.
    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// Port assumed until the server announces its own.
    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Minimum time after spawn before liveness is trusted.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Upper bound on waiting for the readiness line.
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    /// Delay before an automatic restart after a failure.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Restart automatically when a running server exits.
    #[serde(default = "default_true")]
    pub restart_on_exit: bool,

    /// Name of the finished upload inside `storage_dir`.
    #[serde(default = "default_upload_file_name")]
    pub upload_file_name: String,

    /// Overrides the host-reported ABI list used for architecture selection.
    #[serde(default)]
    pub supported_abis: Option<Vec<String>>,

    /// Extra environment variables for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl SupervisorConfig {
    /// Creates a configuration with defaults for everything but the two directories.
    pub fn new(storage_dir: impl Into<PathBuf>, asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            asset_dir: asset_dir.into(),
            install_dir: None,
            binary_name: default_binary_name(),
            default_port: DEFAULT_PORT,
            grace_period_ms: default_grace_period_ms(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            restart_on_exit: true,
            upload_file_name: default_upload_file_name(),
            supported_abis: None,
            env: HashMap::new(),
        }
    }

    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON/YAML
    /// * The document does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::parse_from_yaml_str(&content),
            _ => Self::parse_from_str(&content),
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Parses a configuration from a YAML string.
    pub fn parse_from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
    }

    /// Directory the binary is installed into
    pub fn install_dir(&self) -> &Path {
        self.install_dir.as_deref().unwrap_or(&self.storage_dir)
    }

    /// Absolute path of the installed server binary
    pub fn binary_path(&self) -> PathBuf {
        self.install_dir().join(&self.binary_name)
    }

    /// Path of the finished upload the server produces
    pub fn upload_path(&self) -> PathBuf {
        self.storage_dir.join(&self.upload_file_name)
    }

    /// Time after spawn before the liveness check
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Longest wait for the readiness line
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    /// Delay before an automatic restart
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
