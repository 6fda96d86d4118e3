//! Configuration types for the inventory sync system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::model::{Platform, ResourceKind, ResourceTag};

/// Main sync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Entity store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Configured platform endpoints
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Optional scheduling settings
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl SyncConfig {
    /// Validate the configuration
    ///
    /// An empty endpoint list is valid: every pass is then a no-op.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.store.validate()?;
        self.engine.validate()?;
        self.schedule.validate()?;

        let mut names = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !names.insert(endpoint.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate endpoint name: {}",
                    endpoint.name
                )));
            }
        }

        Ok(())
    }
}

/// Entity store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// File-backed JSON snapshot store
    File {
        /// Path to the snapshot file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store registered under a factory name
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { path } if path.trim().is_empty() => {
                Err(crate::Error::config("File store path cannot be empty"))
            }
            StoreConfig::Custom { factory, .. } if factory.is_empty() => {
                Err(crate::Error::config("Custom store factory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Registry name of the store type
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::File { .. } => "file",
            StoreConfig::Memory => "memory",
            StoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// HTTP method of an endpoint call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

/// One configured platform API endpoint
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique endpoint name
    pub name: String,

    /// Platform and resource kind served, e.g. `vmware_vm`
    pub resource_type: ResourceTag,

    /// HTTP method
    #[serde(default)]
    pub method: HttpMethod,

    /// Full request URL
    pub url: String,

    /// Request headers (may carry credentials)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request body template
    #[serde(default)]
    pub payload: Option<serde_json::Value>,

    /// Inactive endpoints are never called
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl EndpointConfig {
    /// Create an active GET endpoint with no headers
    pub fn new(name: impl Into<String>, resource_type: ResourceTag, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type,
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            payload: None,
            is_active: true,
        }
    }

    /// Set the HTTP method
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request body template
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Activate or deactivate the endpoint
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Platform served by this endpoint
    pub fn platform(&self) -> Platform {
        self.resource_type.platform
    }

    /// Resource kind served by this endpoint
    pub fn kind(&self) -> ResourceKind {
        self.resource_type.kind
    }

    /// Validate the endpoint configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Endpoint name cannot be empty"));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(crate::Error::config(format!(
                "Endpoint {} URL must be http(s): {}",
                self.name, self.url
            )));
        }
        Ok(())
    }
}

// Header values are credentials more often than not
impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut header_names: Vec<&String> = self.headers.keys().collect();
        header_names.sort();

        f.debug_struct("EndpointConfig")
            .field("name", &self.name)
            .field("resource_type", &self.resource_type.to_string())
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("payload", &self.payload.as_ref().map(|_| "<template>"))
            .field("is_active", &self.is_active)
            .finish()
    }
}

fn default_active() -> bool {
    true
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for a single endpoint call (in seconds)
    ///
    /// An endpoint that exceeds it counts as a failed endpoint for the pass.
    #[serde(default = "default_endpoint_timeout_secs")]
    pub endpoint_timeout_secs: u64,

    /// Report a pass with no configured endpoint as WARNING instead of SUCCESS
    #[serde(default)]
    pub empty_configuration_is_warning: bool,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.endpoint_timeout_secs == 0 {
            return Err(crate::Error::config("Endpoint timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint_timeout_secs: default_endpoint_timeout_secs(),
            empty_configuration_is_warning: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_endpoint_timeout_secs() -> u64 {
    120
}

fn default_event_channel_capacity() -> usize {
    1000
}

/// Longest accepted interval between rounds (one week)
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Scheduling configuration consumed by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Minutes between reconciliation rounds
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Platforms reconciled each round
    #[serde(default = "default_platforms")]
    pub platforms: Vec<Platform>,

    /// Run a single round, then exit
    #[serde(default)]
    pub run_once: bool,
}

impl ScheduleConfig {
    /// Validate the schedule configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.interval_minutes == 0 {
            return Err(crate::Error::config("Sync interval must be > 0 minutes"));
        }
        if self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(crate::Error::config(format!(
                "Sync interval must be at most {} minutes, got {}",
                MAX_INTERVAL_MINUTES, self.interval_minutes
            )));
        }
        if self.platforms.is_empty() {
            return Err(crate::Error::config("No platforms configured"));
        }
        Ok(())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            platforms: default_platforms(),
            run_once: false,
        }
    }
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_platforms() -> Vec<Platform> {
    Platform::ALL.to_vec()
}
