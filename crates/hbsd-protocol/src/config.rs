//! Router configuration
//!
//! Configuration files use the daemon's `key=value` format:
//!
//! ```text
//! # statistics
//! numberOfBins = 360
//! binSize = 100
//! enableHbsdOptimization = "true"
//! ```
//!
//! [`RouterConfig::validate`] must pass before a store is built from the
//! configuration; every check that used to abort a running router happens
//! there instead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Default maximum number of bundles held by the store
pub const DEFAULT_ACTIVE_CAPACITY: usize = 100;

/// Default number of bins on the elapsed-time axis
pub const DEFAULT_NUMBER_OF_BINS: usize = 360;

/// Default width of one bin, in seconds
pub const DEFAULT_BIN_SIZE_SECS: u64 = 100;

/// Default cap on non-final statistics messages
pub const DEFAULT_MCH_BUFFER_CAPACITY: usize = 1000;

/// Default network size used when the online approximation is disabled
pub const DEFAULT_NUMBER_OF_NODES: usize = 20;

/// Default demux suffix of the router registration
pub const DEFAULT_ROUTER_ENDPOINT: &str = "ext.rtr/HBSD";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Line {line}: no '=' found")]
    MissingDelimiter { line: usize },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid utility policy selector: {0} (expected 0 or 1)")]
    InvalidPolicy(i64),

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}

/// Utility function used for eviction and transmission ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum UtilityPolicy {
    /// Maximize the average delivery rate (selector 0)
    #[default]
    DeliveryRate,
    /// Minimize the average delivery delay (selector 1)
    DeliveryDelay,
}

impl TryFrom<i64> for UtilityPolicy {
    type Error = ConfigError;

    fn try_from(selector: i64) -> Result<Self, Self::Error> {
        match selector {
            0 => Ok(UtilityPolicy::DeliveryRate),
            1 => Ok(UtilityPolicy::DeliveryDelay),
            other => Err(ConfigError::InvalidPolicy(other)),
        }
    }
}

impl From<UtilityPolicy> for i64 {
    fn from(policy: UtilityPolicy) -> Self {
        match policy {
            UtilityPolicy::DeliveryRate => 0,
            UtilityPolicy::DeliveryDelay => 1,
        }
    }
}

impl fmt::Display for UtilityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UtilityPolicy::DeliveryRate => f.write_str("delivery-rate"),
            UtilityPolicy::DeliveryDelay => f.write_str("delivery-delay"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    #[serde(rename = "bundlesActiveCapacity")]
    pub bundles_active_capacity: usize,

    #[serde(rename = "hbsdOptimizePerformance")]
    pub utility_policy: UtilityPolicy,

    #[serde(rename = "enableHbsdOptimization")]
    pub enable_optimization: bool,

    #[serde(rename = "numberOfBins")]
    pub number_of_bins: usize,

    #[serde(rename = "binSize")]
    pub bin_size_secs: u64,

    #[serde(rename = "mchBufferCapacity")]
    pub mch_buffer_capacity: usize,

    #[serde(rename = "numberOfNodesWithinTheNetwork")]
    pub number_of_nodes: usize,

    #[serde(rename = "useBinSizeAsAvgMeetingTime")]
    pub use_bin_size_as_avg_meeting_time: bool,

    #[serde(rename = "useOnlineAproximatedNumberOfNodes")]
    pub use_online_node_count: bool,

    #[serde(rename = "routerEndpoint")]
    pub router_endpoint: String,

    #[serde(rename = "enableMeDeHaInterface")]
    pub enable_gateway_interface: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            bundles_active_capacity: DEFAULT_ACTIVE_CAPACITY,
            utility_policy: UtilityPolicy::DeliveryRate,
            enable_optimization: false,
            number_of_bins: DEFAULT_NUMBER_OF_BINS,
            bin_size_secs: DEFAULT_BIN_SIZE_SECS,
            mch_buffer_capacity: DEFAULT_MCH_BUFFER_CAPACITY,
            number_of_nodes: DEFAULT_NUMBER_OF_NODES,
            use_bin_size_as_avg_meeting_time: true,
            use_online_node_count: true,
            router_endpoint: DEFAULT_ROUTER_ENDPOINT.to_string(),
            enable_gateway_interface: false,
        }
    }
}

impl RouterConfig {
    /// Parses `key=value` text and validates the result
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let entries = parse_key_values(text)?;
        let mut config = RouterConfig::default();

        for (key, value) in &entries {
            match key.as_str() {
                "bundlesActiveCapacity" => config.bundles_active_capacity = parse_int(key, value)?,
                "hbsdOptimizePerformance" => {
                    let selector: i64 = parse_int(key, value)?;
                    config.utility_policy = UtilityPolicy::try_from(selector)?;
                }
                "enableHbsdOptimization" => config.enable_optimization = parse_bool(key, value)?,
                "numberOfBins" => config.number_of_bins = parse_int(key, value)?,
                "binSize" => config.bin_size_secs = parse_int(key, value)?,
                "mchBufferCapacity" => config.mch_buffer_capacity = parse_int(key, value)?,
                "numberOfNodesWithinTheNetwork" => config.number_of_nodes = parse_int(key, value)?,
                "useBinSizeAsAvgMeetingTime" => {
                    config.use_bin_size_as_avg_meeting_time = parse_bool(key, value)?
                }
                "useOnlineAproximatedNumberOfNodes" => {
                    config.use_online_node_count = parse_bool(key, value)?
                }
                "routerEndpoint" => config.router_endpoint = value.clone(),
                "enableMeDeHaInterface" => config.enable_gateway_interface = parse_bool(key, value)?,
                _ => debug!(key = %key, "ignoring unknown configuration key"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bundles_active_capacity == 0 {
            return Err(ConfigError::MustBePositive("bundlesActiveCapacity"));
        }
        if self.number_of_bins == 0 {
            return Err(ConfigError::MustBePositive("numberOfBins"));
        }
        if self.bin_size_secs == 0 {
            return Err(ConfigError::MustBePositive("binSize"));
        }
        if self.mch_buffer_capacity == 0 {
            return Err(ConfigError::MustBePositive("mchBufferCapacity"));
        }
        if self.router_endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "routerEndpoint".to_string(),
                value: self.router_endpoint.clone(),
            });
        }
        Ok(())
    }
}

/// Splits config text into key/value pairs, later keys overriding earlier ones
fn parse_key_values(text: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut entries = HashMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if line.len() <= 2 || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::MissingDelimiter { line: idx + 1 });
        };
        if key.is_empty() {
            return Err(ConfigError::MissingDelimiter { line: idx + 1 });
        }

        entries.insert(key.to_string(), unquote(value).to_string());
    }

    Ok(entries)
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
