// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment configuration.
//!
//! Only the destination bucket is required. Every numeric setting falls back
//! to its default when it is unset or cannot be parsed, so a typo never keeps
//! the sidecar from starting.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::{
    DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, DEFAULT_PART_MAX_ATTEMPTS, DEFAULT_PART_SIZE_BYTES,
    DEFAULT_SHIP_RATE_BYTES, DEFAULT_SHIP_RATE_INVOKES, DEFAULT_SHIP_RATE_MILLISECONDS,
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_SOURCE_NAME, DEFAULT_STORE_ROOT, DEFAULT_TICK_INTERVAL,
    MAX_SHIP_RATE_BYTES,
};
use crate::errors::ConfigError;
use crate::policy::ShipThresholds;
use crate::uploader::retry::RetryStrategy;
use crate::uploader::UploaderConfig;

pub const BUCKET_VAR: &str = "LOG_SHIPPER_BUCKET";
pub const SHIP_RATE_BYTES_VAR: &str = "LOG_SHIPPER_SHIP_RATE_BYTES";
pub const SHIP_RATE_INVOKES_VAR: &str = "LOG_SHIPPER_SHIP_RATE_INVOKES";
pub const SHIP_RATE_MILLISECONDS_VAR: &str = "LOG_SHIPPER_SHIP_RATE_MILLISECONDS";
pub const PART_SIZE_BYTES_VAR: &str = "LOG_SHIPPER_PART_SIZE_BYTES";
pub const PART_MAX_ATTEMPTS_VAR: &str = "LOG_SHIPPER_PART_MAX_ATTEMPTS";
pub const PART_RETRY_BACKOFF_MS_VAR: &str = "LOG_SHIPPER_PART_RETRY_BACKOFF_MS";
pub const LISTEN_HOST_VAR: &str = "LOG_SHIPPER_LISTEN_HOST";
pub const LISTEN_PORT_VAR: &str = "LOG_SHIPPER_LISTEN_PORT";
pub const SHUTDOWN_GRACE_MS_VAR: &str = "LOG_SHIPPER_SHUTDOWN_GRACE_MS";
pub const STORE_ROOT_VAR: &str = "LOG_SHIPPER_STORE_ROOT";
pub const TICK_INTERVAL_MS_VAR: &str = "LOG_SHIPPER_TICK_INTERVAL_MS";
pub const LOG_LEVEL_VAR: &str = "LOG_SHIPPER_LOG_LEVEL";
pub const FUNCTION_NAME_VAR: &str = "AWS_LAMBDA_FUNCTION_NAME";
pub const SAM_LOCAL_VAR: &str = "AWS_SAM_LOCAL";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShipperConfig {
    pub bucket: String,
    pub thresholds: ShipThresholds,
    pub part_size: usize,
    pub part_max_attempts: u64,
    pub part_retry_backoff_ms: u64,
    /// `host:port` for the push endpoint.
    pub listen_addr: String,
    pub shutdown_grace: Duration,
    pub store_root: PathBuf,
    pub tick_interval: Duration,
    pub log_level: String,
    /// Lowercased into object keys.
    pub source_name: String,
}

impl ShipperConfig {
    pub fn from_env() -> Result<ShipperConfig, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<ShipperConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bucket = lookup(BUCKET_VAR)
            .map(|bucket| bucket.trim().to_string())
            .filter(|bucket| !bucket.is_empty())
            .ok_or(ConfigError::Missing(BUCKET_VAR))?;

        let mut max_bytes = parse_or(&lookup, SHIP_RATE_BYTES_VAR, DEFAULT_SHIP_RATE_BYTES);
        if max_bytes > MAX_SHIP_RATE_BYTES {
            info!("{SHIP_RATE_BYTES_VAR} is above the maximum, using {MAX_SHIP_RATE_BYTES}");
            max_bytes = MAX_SHIP_RATE_BYTES;
        }
        let thresholds = ShipThresholds::new(
            max_bytes,
            parse_or(&lookup, SHIP_RATE_INVOKES_VAR, DEFAULT_SHIP_RATE_INVOKES),
            parse_or(&lookup, SHIP_RATE_MILLISECONDS_VAR, DEFAULT_SHIP_RATE_MILLISECONDS),
        );

        let part_size = match parse_or(&lookup, PART_SIZE_BYTES_VAR, DEFAULT_PART_SIZE_BYTES) {
            0 => DEFAULT_PART_SIZE_BYTES,
            size => size,
        };
        let part_max_attempts =
            match parse_or(&lookup, PART_MAX_ATTEMPTS_VAR, DEFAULT_PART_MAX_ATTEMPTS) {
                0 => DEFAULT_PART_MAX_ATTEMPTS,
                attempts => attempts,
            };

        let sam_local = lookup(SAM_LOCAL_VAR).is_some_and(|val| val.to_lowercase() == "true");
        let listen_host = lookup(LISTEN_HOST_VAR).unwrap_or_else(|| {
            if sam_local {
                "0.0.0.0".to_string()
            } else {
                DEFAULT_LISTEN_HOST.to_string()
            }
        });
        let listen_port = parse_or(&lookup, LISTEN_PORT_VAR, DEFAULT_LISTEN_PORT);

        Ok(ShipperConfig {
            bucket,
            thresholds,
            part_size,
            part_max_attempts,
            part_retry_backoff_ms: parse_or(&lookup, PART_RETRY_BACKOFF_MS_VAR, 0),
            listen_addr: format!("{listen_host}:{listen_port}"),
            shutdown_grace: parse_millis_or(&lookup, SHUTDOWN_GRACE_MS_VAR, DEFAULT_SHUTDOWN_GRACE),
            store_root: lookup(STORE_ROOT_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_ROOT)),
            tick_interval: parse_millis_or(&lookup, TICK_INTERVAL_MS_VAR, DEFAULT_TICK_INTERVAL),
            log_level: lookup(LOG_LEVEL_VAR)
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            source_name: lookup(FUNCTION_NAME_VAR)
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string()),
        })
    }

    #[must_use]
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::from_config(self.part_max_attempts, self.part_retry_backoff_ms)
    }

    #[must_use]
    pub fn uploader_config(&self) -> UploaderConfig {
        UploaderConfig {
            bucket: self.bucket.clone(),
            part_size: self.part_size,
            retry_strategy: self.retry_strategy(),
        }
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr + Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => {
            debug!("{name} not set, using default {default}");
            default
        }
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                info!("{name} value '{raw}' is not valid, using default {default}");
                default
            }
        },
    }
}

fn parse_millis_or<F>(lookup: &F, name: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(parse_or(lookup, name, default_ms))
}
