//! Engine configuration
//!
//! Settings can be given as a flat `key=value` argument string (the form used
//! on the command line and by module loaders) or as a TOML file. Both produce
//! an [`EchoCancelConfig`] that is validated before any stream is set up.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{AudioError, SampleFormat, SampleSpec};
use crate::canceller::{CancellerArgs, CancellerError, CancellerMethod};

/// Default drift check interval in seconds
pub const DEFAULT_ADJUST_TIME_SECS: u64 = 1;

/// Default capacity of each cross-context message channel
pub const DEFAULT_MESSAGE_CAPACITY: usize = 256;

/// Default timeout of a snapshot round trip in milliseconds
pub const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 500;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Malformed argument: {0}")]
    Malformed(String),

    #[error("Duplicate argument: {0}")]
    Duplicate(String),

    #[error("Unknown argument: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Canceller(#[from] CancellerError),
}

/// Parsed `key=value` argument list.
///
/// Values may be wrapped in single or double quotes to contain spaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModArgs {
    values: BTreeMap<String, String>,
}

impl ModArgs {
    /// Parse a whitespace separated argument string
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        let mut chars = input.chars().peekable();

        loop {
            while chars.next_if(|c| c.is_whitespace()).is_some() {}
            if chars.peek().is_none() {
                break;
            }

            let mut key = String::new();
            while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
                key.push(c);
            }
            if chars.next_if_eq(&'=').is_none() || key.is_empty() {
                return Err(ConfigError::Malformed(key));
            }

            let mut value = String::new();
            match chars.peek().copied() {
                Some(quote @ ('\'' | '"')) => {
                    chars.next();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == quote {
                            closed = true;
                            break;
                        }
                        value.push(c);
                    }
                    if !closed {
                        return Err(ConfigError::Malformed(format!("{}={}{}", key, quote, value)));
                    }
                }
                _ => {
                    while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                        value.push(c);
                    }
                }
            }

            if values.contains_key(&key) {
                return Err(ConfigError::Duplicate(key));
            }
            values.insert(key, value);
        }

        Ok(Self { values })
    }

    /// Raw value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parse the value of `key`, if present
    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Iterate over all pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Echo-cancel engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EchoCancelConfig {
    /// Sample rate in Hz
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Interleaved channels
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Requested sample format (the canceller fixates it to s16le)
    #[serde(default)]
    pub format: SampleFormat,

    /// Canceller implementation
    #[serde(default)]
    pub aec_method: CancellerMethod,

    /// Drift check interval in seconds, 0 disables periodic checks
    #[serde(default = "default_adjust_time")]
    pub adjust_time: u64,

    /// Dump captured, played and cancelled audio as raw PCM
    #[serde(default)]
    pub save_aec: bool,

    /// Directory for the raw dumps
    #[serde(default = "default_dump_dir")]
    pub dump_dir: PathBuf,

    /// Capacity of each cross-context message channel
    #[serde(default = "default_message_capacity")]
    pub message_capacity: usize,

    /// Timeout of one snapshot round trip in milliseconds
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,

    /// Canceller tunables. Must stay the last field: TOML tables follow plain values
    #[serde(default)]
    pub aec_args: CancellerArgs,
}

fn default_rate() -> u32 {
    SampleSpec::default().rate
}

fn default_channels() -> u16 {
    SampleSpec::default().channels
}

fn default_adjust_time() -> u64 {
    DEFAULT_ADJUST_TIME_SECS
}

fn default_dump_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_message_capacity() -> usize {
    DEFAULT_MESSAGE_CAPACITY
}

fn default_snapshot_timeout_ms() -> u64 {
    DEFAULT_SNAPSHOT_TIMEOUT_MS
}

impl Default for EchoCancelConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            channels: default_channels(),
            format: SampleFormat::default(),
            aec_method: CancellerMethod::default(),
            aec_args: CancellerArgs::default(),
            adjust_time: DEFAULT_ADJUST_TIME_SECS,
            save_aec: false,
            dump_dir: default_dump_dir(),
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            snapshot_timeout_ms: DEFAULT_SNAPSHOT_TIMEOUT_MS,
        }
    }
}

impl EchoCancelConfig {
    /// Build a configuration from a `key=value` argument string
    pub fn from_modargs(input: &str) -> Result<Self, ConfigError> {
        let args = ModArgs::parse(input)?;
        let mut config = Self::default();

        for (key, _) in args.iter() {
            match key {
                "rate" | "channels" | "format" | "aec_method" | "aec_args" | "adjust_time"
                | "save_aec" | "dump_dir" | "message_capacity" | "snapshot_timeout_ms" => {}
                other => return Err(ConfigError::UnknownKey(other.to_string())),
            }
        }

        if let Some(rate) = args.get_parsed("rate")? {
            config.rate = rate;
        }
        if let Some(channels) = args.get_parsed("channels")? {
            config.channels = channels;
        }
        if let Some(format) = args.get("format") {
            config.format = format.parse()?;
        }
        if let Some(method) = args.get("aec_method") {
            config.aec_method = method.parse()?;
        }
        if let Some(aec_args) = args.get("aec_args") {
            config.aec_args = CancellerArgs::parse(aec_args)?;
        }
        if let Some(adjust_time) = args.get_parsed("adjust_time")? {
            config.adjust_time = adjust_time;
        }
        if let Some(save_aec) = args.get("save_aec") {
            config.save_aec = parse_bool(save_aec).ok_or_else(|| ConfigError::InvalidValue {
                key: "save_aec".into(),
                value: save_aec.into(),
            })?;
        }
        if let Some(dir) = args.get("dump_dir") {
            config.dump_dir = PathBuf::from(dir);
        }
        if let Some(capacity) = args.get_parsed("message_capacity")? {
            config.message_capacity = capacity;
        }
        if let Some(timeout) = args.get_parsed("snapshot_timeout_ms")? {
            config.snapshot_timeout_ms = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sample_spec().validate()?;
        self.aec_args.validate()?;
        if self.message_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "message_capacity".into(),
                value: "0".into(),
            });
        }
        if self.snapshot_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "snapshot_timeout_ms".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Requested stream format
    pub fn sample_spec(&self) -> SampleSpec {
        SampleSpec::new(self.format, self.rate, self.channels)
    }

    /// Drift check period, `None` when periodic checks are disabled
    pub fn adjust_interval(&self) -> Option<Duration> {
        (self.adjust_time > 0).then(|| Duration::from_secs(self.adjust_time))
    }

    /// Snapshot round trip timeout
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" | "y" | "t" => Some(true),
        "0" | "no" | "false" | "off" | "n" | "f" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modargs_parse() {
        let args = ModArgs::parse("rate=8000  aec_args='frame_size_ms=10 filter_size_ms=100'").unwrap();
        assert_eq!(args.get("rate"), Some("8000"));
        assert_eq!(args.get("aec_args"), Some("frame_size_ms=10 filter_size_ms=100"));
        assert!(ModArgs::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_modargs_errors() {
        assert!(matches!(ModArgs::parse("rate"), Err(ConfigError::Malformed(_))));
        assert!(matches!(ModArgs::parse("=5"), Err(ConfigError::Malformed(_))));
        assert!(matches!(ModArgs::parse("a=\"open"), Err(ConfigError::Malformed(_))));
        assert!(matches!(ModArgs::parse("a=1 a=2"), Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EchoCancelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.adjust_interval(), Some(Duration::from_secs(1)));
        assert!(!config.save_aec);
        assert_eq!(config.aec_args.frame_size_ms, 20);
        assert_eq!(config.aec_args.filter_size_ms, 200);
    }

    #[test]
    fn test_from_modargs() {
        let config = EchoCancelConfig::from_modargs(
            "rate=8000 channels=2 aec_method=null aec_args=\"frame_size_ms=10\" adjust_time=0 save_aec=yes",
        )
        .unwrap();
        assert_eq!(config.rate, 8000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.aec_method, CancellerMethod::Null);
        assert_eq!(config.aec_args.frame_size_ms, 10);
        assert_eq!(config.aec_args.filter_size_ms, 200);
        assert_eq!(config.adjust_interval(), None);
        assert!(config.save_aec);
    }

    #[test]
    fn test_from_modargs_rejects_invalid() {
        assert!(matches!(
            EchoCancelConfig::from_modargs("channels=0"),
            Err(ConfigError::Audio(_))
        ));
        assert!(matches!(
            EchoCancelConfig::from_modargs("aec_args='frame_size_ms=500'"),
            Err(ConfigError::Canceller(_))
        ));
        assert!(matches!(
            EchoCancelConfig::from_modargs("bogus=1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            EchoCancelConfig::from_modargs("save_aec=maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_toml_defaults() {
        let config: EchoCancelConfig = toml::from_str(
            r#"
            rate = 48000
            [aec_args]
            filter_size_ms = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.rate, 48000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.aec_args.frame_size_ms, 20);
        assert_eq!(config.aec_args.filter_size_ms, 50);
        assert_eq!(config.dump_dir, PathBuf::from("/tmp"));
    }
}
