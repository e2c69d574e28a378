//! Configuration constants and defaults for wiretap
//!
//! Every value has a documented default. [`WiretapConfig::from_env`] lets a
//! test run override them without code changes.

use serde::{Deserialize, Serialize};
use std::{env, str::FromStr, time::Duration};

use crate::matcher::Threads;

/// Runtime configuration shared by the interception hooks and every [`Spy`](crate::Spy).
///
/// Deserializing fills every missing field with its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WiretapConfig {
    /// Capture a stack signature for every observed call
    pub capture_call_site: bool,

    /// Keep raw socket payloads for traffic reports
    pub capture_traffic: bool,

    /// Maximum gap between two same-direction transfers merged into one packet
    pub packet_merge_threshold: Duration,

    /// Thread scope used by expectations that do not name one
    pub default_threads: Threads,

    /// Consult scoped fault tables before the global one
    pub thread_local_faults: bool,

    /// Write the fault registry through its persister on every change
    pub persist_registry: bool,
}

impl Default for WiretapConfig {
    fn default() -> Self {
        Self {
            capture_call_site: DEFAULT_CAPTURE_CALL_SITE,
            capture_traffic: DEFAULT_CAPTURE_TRAFFIC,
            packet_merge_threshold: DEFAULT_PACKET_MERGE_THRESHOLD,
            default_threads: DEFAULT_THREADS,
            thread_local_faults: DEFAULT_THREAD_LOCAL_FAULTS,
            persist_registry: DEFAULT_PERSIST_REGISTRY,
        }
    }
}

/// Call sites are off by default
///
/// Capturing a backtrace on every call is the most expensive part of recording.
pub const DEFAULT_CAPTURE_CALL_SITE: bool = false;

/// Payload capture is off by default
///
/// Traffic buffers grow with every byte transferred until the next reset.
pub const DEFAULT_CAPTURE_TRAFFIC: bool = false;

/// Default packet merge threshold
pub const DEFAULT_PACKET_MERGE_THRESHOLD: Duration = Duration::from_millis(500);

/// Expectations count the calls of the thread that created the spy
pub const DEFAULT_THREADS: Threads = Threads::Current;

pub const DEFAULT_THREAD_LOCAL_FAULTS: bool = false;

pub const DEFAULT_PERSIST_REGISTRY: bool = false;

pub const ENV_CAPTURE_CALL_SITE: &str = "WIRETAP_CAPTURE_CALL_SITE";
pub const ENV_CAPTURE_TRAFFIC: &str = "WIRETAP_CAPTURE_TRAFFIC";
pub const ENV_PACKET_MERGE_THRESHOLD: &str = "WIRETAP_PACKET_MERGE_THRESHOLD";
pub const ENV_THREAD_LOCAL_FAULTS: &str = "WIRETAP_THREAD_LOCAL_FAULTS";

impl WiretapConfig {
    /// Defaults overridden by `WIRETAP_*` environment variables.
    ///
    /// A value that does not parse is logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = parse(&lookup, ENV_CAPTURE_CALL_SITE) {
            config.capture_call_site = value;
        }

        if let Some(value) = parse(&lookup, ENV_CAPTURE_TRAFFIC) {
            config.capture_traffic = value;
        }

        if let Some(millis) = parse::<u64, _>(&lookup, ENV_PACKET_MERGE_THRESHOLD) {
            config.packet_merge_threshold = Duration::from_millis(millis);
        }

        if let Some(value) = parse(&lookup, ENV_THREAD_LOCAL_FAULTS) {
            config.thread_local_faults = value;
        }

        config
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;

    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}

/// Configuration builder for customizing wiretap behavior
#[derive(Debug)]
pub struct ConfigBuilder {
    config: WiretapConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder with default values
    pub fn new() -> Self {
        Self {
            config: WiretapConfig::default(),
        }
    }

    pub fn capture_call_site(mut self, enabled: bool) -> Self {
        self.config.capture_call_site = enabled;
        self
    }

    pub fn capture_traffic(mut self, enabled: bool) -> Self {
        self.config.capture_traffic = enabled;
        self
    }

    pub fn packet_merge_threshold(mut self, threshold: Duration) -> Self {
        self.config.packet_merge_threshold = threshold;
        self
    }

    pub fn default_threads(mut self, threads: Threads) -> Self {
        self.config.default_threads = threads;
        self
    }

    pub fn thread_local_faults(mut self, enabled: bool) -> Self {
        self.config.thread_local_faults = enabled;
        self
    }

    pub fn persist_registry(mut self, enabled: bool) -> Self {
        self.config.persist_registry = enabled;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> WiretapConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
