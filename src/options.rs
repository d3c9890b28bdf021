use crate::app::config::App;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

// --- Enums for Driver Types ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterDriver {
    #[default]
    Local,
    Redis,
}

impl FromStr for AdapterDriver {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(AdapterDriver::Local),
            "redis" => Ok(AdapterDriver::Redis),
            _ => Err(format!("Unknown adapter driver: {s}")),
        }
    }
}

// --- Main Configuration Struct ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub activity_timeout: u64,
    pub adapter: AdapterConfig,
    pub app_manager: AppManagerConfig,
    pub debug: bool,
    pub event_limits: EventLimits,
    pub presence: PresenceConfig,
    pub websocket: WebSocketConfig,
}

// --- Configuration Sub-Structs ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub driver: AdapterDriver,
    /// How long a cluster query waits for other nodes, in milliseconds.
    pub requests_timeout: u64,
    pub redis: RedisAdapterOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisAdapterOptions {
    pub url: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppManagerConfig {
    pub array: ArrayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ArrayConfig {
    pub apps: Vec<App>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventLimits {
    pub max_name_length: u32,
    pub max_payload_in_kb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceConfig {
    pub max_members_per_channel: u32,
    pub max_member_size_in_kb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Outbound frames buffered per socket before new ones are dropped.
    pub buffer_capacity: usize,
}

// --- Default Implementations ---

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            activity_timeout: crate::protocol::constants::ACTIVITY_TIMEOUT,
            adapter: AdapterConfig::default(),
            app_manager: AppManagerConfig::default(),
            debug: false,
            event_limits: EventLimits::default(),
            presence: PresenceConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            driver: AdapterDriver::default(),
            requests_timeout: 5000,
            redis: RedisAdapterOptions::default(),
        }
    }
}

impl Default for RedisAdapterOptions {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            prefix: crate::adapter::transports::redis_transport::DEFAULT_PREFIX.to_string(),
        }
    }
}

impl Default for EventLimits {
    fn default() -> Self {
        Self {
            max_name_length: 200,
            max_payload_in_kb: 100.0,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            max_members_per_channel: 100,
            max_member_size_in_kb: 2.0,
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
        }
    }
}

// --- Loading ---

impl ServerOptions {
    /// Reads options from a JSON file. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigFile(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
            .map_err(|e| Error::ConfigFile(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with a
    /// custom variable source.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = var("DEBUG") {
            self.debug = val == "1" || val.to_lowercase() == "true";
        }
        if let Some(driver_str) = var("ADAPTER_DRIVER") {
            self.adapter.driver = parse_driver_enum(driver_str, self.adapter.driver, "Adapter");
        }
        if let Some(url) = var("REDIS_URL") {
            self.adapter.redis.url = url;
        }
        parse_into(&var, "REQUESTS_TIMEOUT", &mut self.adapter.requests_timeout);
        parse_into(
            &var,
            "PRESENCE_MAX_MEMBERS_PER_CHANNEL",
            &mut self.presence.max_members_per_channel,
        );
        parse_into(
            &var,
            "EVENT_LIMITS_MAX_NAME_LENGTH",
            &mut self.event_limits.max_name_length,
        );
        parse_into(
            &var,
            "EVENT_LIMITS_MAX_PAYLOAD_IN_KB",
            &mut self.event_limits.max_payload_in_kb,
        );
    }
}

// Runs before logging is initialized, hence eprintln!.
fn parse_driver_enum<T: FromStr + std::fmt::Debug>(
    driver_str: String,
    default_driver: T,
    driver_name: &str,
) -> T
where
    <T as FromStr>::Err: std::fmt::Debug,
{
    match T::from_str(&driver_str.to_lowercase()) {
        Ok(driver_enum) => driver_enum,
        Err(e) => {
            eprintln!(
                "[CONFIG-WARN] Failed to parse {driver_name} driver '{driver_str}': {e:?}. Using default: {default_driver:?}."
            );
            default_driver
        }
    }
}

fn parse_into<T, F>(var: &F, key: &str, target: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => eprintln!("[CONFIG-WARN] Failed to parse {key} env var: '{raw}'"),
        }
    }
}
