//! Configuration module for the telnet recorder.
//!
//! Settings come from an optional YAML file (`config.yaml` by default) and are
//! then overridden by environment variables. The result is validated once here
//! and handed to the rest of the crate as the immutable [`Endpoint`] and
//! [`LogDirectory`] values.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Config file read from the working directory when no path is given
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "TELNET_RECORDER_CONFIG";

const HOST_ENV: &str = "TELNET_RECORDER_HOST";
const PORT_ENV: &str = "TELNET_RECORDER_PORT";
const LOG_DIR_ENV: &str = "TELNET_RECORDER_LOG_DIR";
const KEEP_DAYS_ENV: &str = "TELNET_RECORDER_KEEP_DAYS";
const CONNECT_TIMEOUT_ENV: &str = "TELNET_RECORDER_CONNECT_TIMEOUT_SECS";
const BACKOFF_ENV: &str = "TELNET_RECORDER_BACKOFF_SECS";

/// Default telnet host
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default telnet port
const DEFAULT_PORT: u16 = 23;

/// Default log directory
const DEFAULT_LOG_DIR: &str = "./logs";

/// Default number of days a log file is kept
const DEFAULT_KEEP_DAYS: u32 = 7;

/// Default bound on a single dial attempt
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default wait between connection attempts
const DEFAULT_BACKOFF_SECS: u64 = 3;

/// Upper bound for retention, roughly ten years
const MAX_KEEP_DAYS: u32 = 3650;

/// Bounds shared by the connect timeout and the backoff interval
const MIN_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 300;

/// The monitored telnet endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Endpoint {
    /// `host:port` form accepted by `TcpStream::connect`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where log files live and how long they are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirectory {
    pub path: PathBuf,
    pub retention_days: u32,
}

impl LogDirectory {
    pub fn new(path: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            path: path.into(),
            retention_days,
        }
    }
}

/// Resolved configuration for one recorder instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telnet host name or IP address
    pub host: String,

    /// Telnet port
    pub port: u16,

    /// Directory receiving the daily `runlog_YYYYMMDD.log` files
    pub log_dir: PathBuf,

    /// Files whose modification time is older than this many days are deleted.
    /// Zero keeps only the file currently being written.
    pub keep_days: u32,

    /// Bound on a single TCP dial
    pub connect_timeout: Duration,

    /// Wait between the end of one connection attempt and the next
    pub backoff: Duration,

    /// Config file the values were read from, if any
    pub source: Option<PathBuf>,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub key: Option<String>,
}

impl ConfigError {
    fn for_key(key: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "Configuration error for {}: {}", key, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// On-disk layout of `config.yaml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    telnet: TelnetSection,
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TelnetSection {
    ip: Option<String>,
    port: Option<u16>,
    connect_timeout_secs: Option<u64>,
    retry_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LogSection {
    dir: Option<PathBuf>,
    keep_days: Option<u32>,
}

impl Config {
    /// Load configuration from the config file and the environment.
    ///
    /// The file named by `TELNET_RECORDER_CONFIG` is read if set, otherwise
    /// `config.yaml` in the working directory. A missing default file is not
    /// an error; a missing explicit file is.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or if any
    /// value is out of range.
    pub fn load() -> Result<Self, ConfigError> {
        let (path, explicit) = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => (PathBuf::from(path), true),
            Err(_) => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let file = match fs::read_to_string(&path) {
            Ok(text) => Some(parse_file(&path, &text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => None,
            Err(e) => {
                return Err(ConfigError::for_key(
                    CONFIG_PATH_ENV,
                    format!("cannot read {}: {}", path.display(), e),
                ))
            }
        };

        let source = file.as_ref().map(|_| path.clone());
        let mut config = Self::resolve(file, |key| env::var(key).ok())?;
        config.source = source;
        Ok(config)
    }

    /// Load configuration from YAML text, with no environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on malformed YAML or out-of-range values.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file = parse_file(Path::new(DEFAULT_CONFIG_FILE), text)?;
        Self::resolve(Some(file), |_| None)
    }

    /// Merge file values and overrides (looked up through `lookup`) onto the
    /// defaults, then validate.
    fn resolve<F>(file: Option<FileConfig>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(file) = file {
            if let Some(ip) = file.telnet.ip {
                config.host = ip;
            }
            if let Some(port) = file.telnet.port {
                config.port = port;
            }
            if let Some(secs) = file.telnet.connect_timeout_secs {
                config.connect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = file.telnet.retry_secs {
                config.backoff = Duration::from_secs(secs);
            }
            if let Some(dir) = file.log.dir {
                config.log_dir = dir;
            }
            if let Some(days) = file.log.keep_days {
                config.keep_days = days;
            }
        }

        if let Some(host) = lookup(HOST_ENV) {
            config.host = host;
        }
        if let Some(port) = parse_override::<u16, _>(&lookup, PORT_ENV)? {
            config.port = port;
        }
        if let Some(dir) = lookup(LOG_DIR_ENV) {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(days) = parse_override::<u32, _>(&lookup, KEEP_DAYS_ENV)? {
            config.keep_days = days;
        }
        if let Some(secs) = parse_override::<u64, _>(&lookup, CONNECT_TIMEOUT_ENV)? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_override::<u64, _>(&lookup, BACKOFF_ENV)? {
            config.backoff = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::for_key(HOST_ENV, "host must not be empty"));
        }

        if self.port == 0 {
            return Err(ConfigError::for_key(PORT_ENV, "port must be greater than 0"));
        }

        if self.keep_days > MAX_KEEP_DAYS {
            return Err(ConfigError::for_key(
                KEEP_DAYS_ENV,
                format!(
                    "keep days {} exceeds maximum ({})",
                    self.keep_days, MAX_KEEP_DAYS
                ),
            ));
        }

        check_interval(CONNECT_TIMEOUT_ENV, "connect timeout", self.connect_timeout)?;
        check_interval(BACKOFF_ENV, "backoff", self.backoff)?;

        Ok(())
    }

    /// The endpoint the monitor dials.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: self.connect_timeout,
        }
    }

    /// The log destination handed to the rotator.
    pub fn log_directory(&self) -> LogDirectory {
        LogDirectory::new(self.log_dir.clone(), self.keep_days)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            keep_days: DEFAULT_KEEP_DAYS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            source: None,
        }
    }
}

fn parse_file(path: &Path, text: &str) -> Result<FileConfig, ConfigError> {
    // An empty document deserializes to unit, not to a mapping.
    if text.trim().is_empty() {
        return Ok(FileConfig::default());
    }

    serde_yaml::from_str(text).map_err(|e| ConfigError {
        message: format!("invalid YAML in {}: {}", path.display(), e),
        key: None,
    })
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::for_key(key, format!("'{}' is not a valid number", value))),
        None => Ok(None),
    }
}

fn check_interval(key: &str, what: &str, value: Duration) -> Result<(), ConfigError> {
    let secs = value.as_secs();

    if secs < MIN_INTERVAL_SECS {
        return Err(ConfigError::for_key(
            key,
            format!("{} {}s is below minimum ({}s)", what, secs, MIN_INTERVAL_SECS),
        ));
    }

    if secs > MAX_INTERVAL_SECS {
        return Err(ConfigError::for_key(
            key,
            format!("{} {}s exceeds maximum ({}s)", what, secs, MAX_INTERVAL_SECS),
        ));
    }

    Ok(())
}
