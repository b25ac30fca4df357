//! Provides the configuration parser
//!
//! Used to parse a TOML config file into a struct that the database can
//! consume. Metric definitions may live in the same file; see `registry`.

use crate::error::Error;
use crate::metric::OverflowPolicy;
use std::convert::TryFrom;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Bounds applied to every event cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLimits {
    /// The most events a single cell holds.
    pub max_events: usize,
    /// What happens to the event that would exceed `max_events`.
    pub overflow: OverflowPolicy,
}

/// Database configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Where Application and User lifetime data is persisted. Without one
    /// the database is purely in-memory.
    pub data_directory: Option<PathBuf>,
    /// The initial state of the recording gate.
    pub upload_enabled: bool,
    /// Seconds between background flushes of dirty engines. Zero disables
    /// the background flusher; data is then only flushed on collection,
    /// resets and drop.
    pub flush_interval: u64,
    /// See `EventLimits`.
    pub max_events: usize,
    /// See `EventLimits`.
    pub event_overflow: OverflowPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_directory: None,
            upload_enabled: true,
            flush_interval: 60,
            max_events: 500,
            event_overflow: OverflowPolicy::default(),
        }
    }
}

impl Config {
    /// A default configuration persisting under `data_directory`.
    pub fn with_data_directory<P: AsRef<Path>>(data_directory: P) -> Config {
        Config {
            data_directory: Some(data_directory.as_ref().to_path_buf()),
            ..Config::default()
        }
    }

    /// The event bounds of this configuration.
    pub fn event_limits(&self) -> EventLimits {
        EventLimits {
            max_events: self.max_events,
            overflow: self.event_overflow,
        }
    }
}

/// Read and parse the config file at `path`.
pub fn read_config_file<P: AsRef<Path>>(path: P) -> Result<(Config, String), Error> {
    let mut fp = File::open(path.as_ref())?;
    let mut buffer = String::new();
    fp.read_to_string(&mut buffer)?;
    let config = parse_config_file(&buffer)?;
    Ok((config, buffer))
}

/// Parse the configuration file.
///
/// Unknown keys are ignored so the same file can also carry `[[metric]]`
/// definitions.
pub fn parse_config_file(buffer: &str) -> Result<Config, Error> {
    let mut config = Config::default();
    let value: toml::Value = toml::from_str(buffer)?;

    config.data_directory = value
        .get("data-directory")
        .map(|s| {
            s.as_str()
                .map(|s| Some(Path::new(s).to_path_buf()))
                .ok_or_else(|| Error::Config("data-directory value must be valid string".into()))
        })
        .unwrap_or(Ok(config.data_directory))?;

    config.upload_enabled = value
        .get("upload-enabled")
        .map(|b| {
            b.as_bool()
                .ok_or_else(|| Error::Config("could not parse upload-enabled".into()))
        })
        .unwrap_or(Ok(config.upload_enabled))?;

    config.flush_interval = value
        .get("flush-interval")
        .map(|fi| non_negative(fi, "flush-interval"))
        .unwrap_or(Ok(config.flush_interval))?;

    config.max_events = value
        .get("max-events")
        .map(|me| {
            non_negative(me, "max-events").and_then(|me| {
                usize::try_from(me)
                    .map_err(|_| Error::Config(format!("max-events {} is too large", me)))
            })
        })
        .unwrap_or(Ok(config.max_events))?;

    config.event_overflow = value
        .get("event-overflow")
        .map(|eo| {
            eo.as_str()
                .ok_or_else(|| Error::Config("event-overflow value must be valid string".into()))
                .and_then(|s| s.parse::<OverflowPolicy>())
        })
        .unwrap_or(Ok(config.event_overflow))?;

    Ok(config)
}

fn non_negative(value: &toml::Value, key: &str) -> Result<u64, Error> {
    let i = value
        .as_integer()
        .ok_or_else(|| Error::Config(format!("could not parse {}", key)))?;
    u64::try_from(i).map_err(|_| Error::Config(format!("{} must not be negative, got {}", key, i)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_file_data_directory() {
        let config = r#"
data-directory = "/foo/bar"
"#;
        let config = parse_config_file(config).unwrap();
        let dir = Path::new("/foo/bar").to_path_buf();

        assert_eq!(config.data_directory, Some(dir));
    }

    #[test]
    fn config_file_data_directory_default() {
        let config = parse_config_file(r#""#).unwrap();
        assert_eq!(config.data_directory, None);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn config_file_flush_interval() {
        let config = r#"
flush-interval = 0
"#;
        let config = parse_config_file(config).unwrap();
        assert_eq!(config.flush_interval, 0);
    }

    #[test]
    fn config_file_negative_flush_interval() {
        let config = r#"
flush-interval = -10
"#;
        assert!(parse_config_file(config).is_err());
    }

    #[test]
    fn config_file_upload_disabled() {
        let config = r#"
upload-enabled = false
"#;
        let config = parse_config_file(config).unwrap();
        assert!(!config.upload_enabled);
    }

    #[test]
    fn config_file_events() {
        let config = r#"
max-events = 12
event-overflow = "reject"
"#;
        let config = parse_config_file(config).unwrap();
        assert_eq!(
            config.event_limits(),
            EventLimits {
                max_events: 12,
                overflow: OverflowPolicy::Reject,
            }
        );
    }

    #[test]
    fn config_file_max_events_fits_usize() {
        let config = r#"
max-events = 9223372036854775807
"#;
        let expected = usize::try_from(i64::max_value()).ok();
        assert_eq!(expected, parse_config_file(config).ok().map(|c| c.max_events));
    }

    #[test]
    fn config_file_negative_max_events() {
        let config = r#"
max-events = -1
"#;
        assert!(parse_config_file(config).is_err());
    }

    #[test]
    fn config_file_bad_event_overflow() {
        let config = r#"
event-overflow = "keep-both"
"#;
        assert!(parse_config_file(config).is_err());
    }

    #[test]
    fn config_file_ignores_metric_tables() {
        let config = r#"
data-directory = "/tmp/pings"

[[metric]]
category = "search"
name = "engine"
type = "string"
lifetime = "ping"
"#;
        let config = parse_config_file(config).unwrap();
        assert_eq!(config.data_directory, Some(PathBuf::from("/tmp/pings")));
    }

    #[test]
    fn config_file_garbage() {
        assert!(parse_config_file("data-directory = ").is_err());
    }
}
