// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ShipperError;

/// Number of bytes of the node id file that identify this node.
pub const NODE_ID_LEN: usize = 14;

/// Identifier of the running build, sent with every upload.
pub const BUILD_ID: &str = match option_env!("SHIPPER_BUILD_ID") {
    Some(build_id) => build_id,
    None => env!("CARGO_PKG_VERSION"),
};

const DEFAULT_UPLOADS_ROOT: &str = "/tmp/spool-uploads";
const DEFAULT_NODE_ID_FILE: &str = "/etc/spool-shipper/ID";
const DEFAULT_UPLOADS_URL: &str = "https://collector.localdomain:8001/upload/";
const DEFAULT_FAILURES_FILE: &str = "/tmp/spool-shipper/upload_failures";
const DEFAULT_RETRY_INTERVAL_MINUTES: u64 = 3;
const DEFAULT_MAX_UPLOADS_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// How the sweeper keeps the backlog from growing without bound. The two policies are
/// alternatives and are never applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogPolicy {
    /// Keep the newest files whose combined size fits in `max_bytes`, evict the rest.
    Quota { max_bytes: u64 },
    /// Delete files that have waited longer than `max_age` without trying them again.
    MaxAge { max_age: Duration },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory whose immediate subdirectories are the spool directories
    pub uploads_root: PathBuf,
    /// File holding this node's identity
    pub node_id_file: PathBuf,
    /// Collector endpoint receiving uploads
    pub uploads_url: String,
    pub build_id: String,
    /// How often the sweeper runs, and how old a file must be before it is retried
    pub retry_interval: Duration,
    pub backlog_policy: BacklogPolicy,
    /// Where per-directory eviction counts are written
    pub failures_file: PathBuf,
    /// Transport timeout of a single upload
    pub upload_timeout: Duration,
    pub https_proxy: Option<String>,
    pub skip_tls_verify: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uploads_root: PathBuf::from(DEFAULT_UPLOADS_ROOT),
            node_id_file: PathBuf::from(DEFAULT_NODE_ID_FILE),
            uploads_url: DEFAULT_UPLOADS_URL.to_string(),
            build_id: BUILD_ID.to_string(),
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_MINUTES * 60),
            backlog_policy: BacklogPolicy::Quota {
                max_bytes: DEFAULT_MAX_UPLOADS_BYTES,
            },
            failures_file: PathBuf::from(DEFAULT_FAILURES_FILE),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            https_proxy: None,
            skip_tls_verify: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Builds the configuration from environment variables. The first of `args` (the command
    /// line without the program name), if present, overrides the collector URL.
    pub fn from_env<I>(args: I) -> Result<Self, ShipperError>
    where
        I: IntoIterator<Item = String>,
    {
        let uploads_root = env::var("SHIPPER_UPLOADS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_UPLOADS_ROOT));
        let node_id_file = env::var("SHIPPER_NODE_ID_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_NODE_ID_FILE));
        let uploads_url = match args.into_iter().next() {
            Some(url) => url,
            None => env::var("SHIPPER_UPLOADS_URL")
                .unwrap_or_else(|_| DEFAULT_UPLOADS_URL.to_string()),
        };
        let retry_interval_minutes = env::var("SHIPPER_RETRY_INTERVAL_MINUTES")
            .ok()
            .and_then(|minutes| minutes.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_INTERVAL_MINUTES);

        // An explicit maximum age selects the age-based policy instead of the quota
        let backlog_policy = match env::var("SHIPPER_MAX_RETRY_AGE_MINUTES")
            .ok()
            .and_then(|minutes| minutes.parse::<u64>().ok())
        {
            Some(minutes) => BacklogPolicy::MaxAge {
                max_age: minutes_to_duration("SHIPPER_MAX_RETRY_AGE_MINUTES", minutes)?,
            },
            None => BacklogPolicy::Quota {
                max_bytes: env::var("SHIPPER_MAX_UPLOADS_BYTES")
                    .ok()
                    .and_then(|bytes| bytes.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_MAX_UPLOADS_BYTES),
            },
        };

        let failures_file = env::var("SHIPPER_FAILURES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_FAILURES_FILE));
        let upload_timeout_secs = env::var("SHIPPER_UPLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS);
        let https_proxy = env::var("SHIPPER_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        let skip_tls_verify = env::var("SHIPPER_SKIP_TLS_VERIFY")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let log_level = env::var("SHIPPER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            uploads_root,
            node_id_file,
            uploads_url,
            build_id: BUILD_ID.to_string(),
            retry_interval: minutes_to_duration(
                "SHIPPER_RETRY_INTERVAL_MINUTES",
                retry_interval_minutes,
            )?,
            backlog_policy,
            failures_file,
            upload_timeout: Duration::from_secs(upload_timeout_secs),
            https_proxy,
            skip_tls_verify,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ShipperError> {
        if self.uploads_url.trim().is_empty() {
            return Err(ShipperError::InvalidConfig(
                "collector URL cannot be empty".to_string(),
            ));
        }

        if self.retry_interval.is_zero() {
            return Err(ShipperError::InvalidConfig(
                "retry interval must be greater than 0".to_string(),
            ));
        }

        match self.backlog_policy {
            BacklogPolicy::Quota { max_bytes: 0 } => {
                return Err(ShipperError::InvalidConfig(
                    "upload quota must be greater than 0".to_string(),
                ));
            }
            BacklogPolicy::MaxAge { max_age } if max_age <= self.retry_interval => {
                return Err(ShipperError::InvalidConfig(
                    "maximum retry age must exceed the retry interval".to_string(),
                ));
            }
            _ => {}
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ShipperError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn minutes_to_duration(var: &str, minutes: u64) -> Result<Duration, ShipperError> {
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| ShipperError::InvalidConfig(format!("{var} is too large: {minutes}")))
}

/// Reads this node's identity: the first [`NODE_ID_LEN`] bytes of `path`.
pub fn read_node_id(path: &Path) -> Result<String, ShipperError> {
    let contents = std::fs::read(path).map_err(|e| ShipperError::NodeId {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if contents.len() < NODE_ID_LEN {
        return Err(ShipperError::NodeId {
            path: path.to_path_buf(),
            reason: format!(
                "expected at least {NODE_ID_LEN} bytes, found {}",
                contents.len()
            ),
        });
    }
    String::from_utf8(contents[..NODE_ID_LEN].to_vec()).map_err(|_| ShipperError::NodeId {
        path: path.to_path_buf(),
        reason: "node id is not valid UTF-8".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use std::env;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    const ALL_VARS: [&str; 12] = [
        "SHIPPER_UPLOADS_ROOT",
        "SHIPPER_NODE_ID_FILE",
        "SHIPPER_UPLOADS_URL",
        "SHIPPER_RETRY_INTERVAL_MINUTES",
        "SHIPPER_MAX_RETRY_AGE_MINUTES",
        "SHIPPER_MAX_UPLOADS_BYTES",
        "SHIPPER_FAILURES_FILE",
        "SHIPPER_UPLOAD_TIMEOUT_SECS",
        "SHIPPER_PROXY_HTTPS",
        "HTTPS_PROXY",
        "SHIPPER_SKIP_TLS_VERIFY",
        "SHIPPER_LOG_LEVEL",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env(Vec::new()).unwrap();
        assert_eq!(config.uploads_root, PathBuf::from("/tmp/spool-uploads"));
        assert_eq!(config.uploads_url, "https://collector.localdomain:8001/upload/");
        assert_eq!(config.retry_interval, Duration::from_secs(180));
        assert_eq!(
            config.backlog_policy,
            BacklogPolicy::Quota {
                max_bytes: 5 * 1024 * 1024
            }
        );
        assert_eq!(config.upload_timeout, Duration::from_secs(60));
        assert_eq!(config.https_proxy, None);
        assert!(!config.skip_tls_verify);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.build_id, BUILD_ID);
    }

    #[test]
    #[serial]
    fn test_command_line_overrides_collector_url() {
        clear_env();
        env::set_var("SHIPPER_UPLOADS_URL", "http://from-env:8001/upload/");
        let config = Config::from_env(vec!["http://from-args/upload/".to_string()]).unwrap();
        assert_eq!(config.uploads_url, "http://from-args/upload/");

        let config = Config::from_env(Vec::new()).unwrap();
        assert_eq!(config.uploads_url, "http://from-env:8001/upload/");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_custom_thresholds() {
        clear_env();
        env::set_var("SHIPPER_RETRY_INTERVAL_MINUTES", "30");
        env::set_var("SHIPPER_MAX_UPLOADS_BYTES", "1000");
        env::set_var("SHIPPER_UPLOAD_TIMEOUT_SECS", "5");
        let config = Config::from_env(Vec::new()).unwrap();
        assert_eq!(config.retry_interval, Duration::from_secs(1800));
        assert_eq!(
            config.backlog_policy,
            BacklogPolicy::Quota { max_bytes: 1000 }
        );
        assert_eq!(config.upload_timeout, Duration::from_secs(5));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_max_retry_age_selects_age_policy() {
        clear_env();
        env::set_var("SHIPPER_MAX_RETRY_AGE_MINUTES", "1440");
        env::set_var("SHIPPER_MAX_UPLOADS_BYTES", "1000");
        let config = Config::from_env(Vec::new()).unwrap();
        assert_eq!(
            config.backlog_policy,
            BacklogPolicy::MaxAge {
                max_age: Duration::from_secs(1440 * 60)
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        clear_env();
        env::set_var("SHIPPER_RETRY_INTERVAL_MINUTES", "soon");
        env::set_var("SHIPPER_MAX_UPLOADS_BYTES", "-1");
        let config = Config::from_env(Vec::new()).unwrap();
        assert_eq!(config.retry_interval, Duration::from_secs(180));
        assert_eq!(
            config.backlog_policy,
            BacklogPolicy::Quota {
                max_bytes: 5 * 1024 * 1024
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_overflowing_minutes_are_rejected() {
        clear_env();
        env::set_var("SHIPPER_RETRY_INTERVAL_MINUTES", u64::MAX.to_string());
        let err = Config::from_env(Vec::new()).unwrap_err();
        assert!(matches!(err, ShipperError::InvalidConfig(_)));
        assert!(err
            .to_string()
            .contains("SHIPPER_RETRY_INTERVAL_MINUTES is too large"));

        clear_env();
        env::set_var("SHIPPER_MAX_RETRY_AGE_MINUTES", (u64::MAX / 2).to_string());
        let err = Config::from_env(Vec::new()).unwrap_err();
        assert!(err
            .to_string()
            .contains("SHIPPER_MAX_RETRY_AGE_MINUTES is too large"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_proxy_and_tls_settings() {
        clear_env();
        env::set_var("HTTPS_PROXY", "http://proxy:3128");
        env::set_var("SHIPPER_SKIP_TLS_VERIFY", "TRUE");
        let config = Config::from_env(Vec::new()).unwrap();
        assert_eq!(config.https_proxy.as_deref(), Some("http://proxy:3128"));
        assert!(config.skip_tls_verify);

        env::set_var("SHIPPER_PROXY_HTTPS", "http://preferred:3128");
        let config = Config::from_env(Vec::new()).unwrap();
        assert_eq!(config.https_proxy.as_deref(), Some("http://preferred:3128"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_log_level_is_rejected() {
        clear_env();
        env::set_var("SHIPPER_LOG_LEVEL", "chatty");
        let config = Config::from_env(Vec::new());
        assert!(config.is_err());
        clear_env();
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = Config {
            retry_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_quota() {
        let config = Config {
            backlog_policy: BacklogPolicy::Quota { max_bytes: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_max_age_not_above_interval() {
        let config = Config {
            retry_interval: Duration::from_secs(600),
            backlog_policy: BacklogPolicy::MaxAge {
                max_age: Duration::from_secs(600),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_url() {
        let config = Config {
            uploads_url: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_node_id_takes_fixed_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ID");
        std::fs::write(&path, "OW0123456789AB\n").unwrap();
        assert_eq!(read_node_id(&path).unwrap(), "OW0123456789AB");
    }

    #[test]
    fn test_read_node_id_too_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ID");
        std::fs::write(&path, "OW01").unwrap();
        let err = read_node_id(&path).unwrap_err();
        assert!(err.to_string().contains("expected at least 14 bytes, found 4"));
    }

    #[test]
    fn test_read_node_id_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_node_id(&dir.path().join("missing")).is_err());
    }
}
