use std::{path::Path, time::Duration};

use anyhow::Context;

/// Harness settings, read from a JSON file. Every field has a default so a
/// partial file is enough.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TesterConfig {
    pub bind_address: String,
    /// Seconds to wait for a CallResult.
    pub call_timeout: u64,
    pub boot_poll_interval: u64,
    /// Registration polls before the dispatcher hard resets the device.
    pub boot_poll_attempts: u32,
    /// Seconds a session may stay disconnected before its dispatcher stops.
    pub reconnect_grace: u64,
    pub include_manual: bool,
    /// Scenario letters to run without asking, e.g. `"A"` or `"CRS"`.
    pub scenarios: Option<String>,
    /// Endurance sub-choice (`B` boot repeat, `S` smart charging) used
    /// without asking.
    pub endurance: Option<String>,
    /// Endurance loops stop after this many iterations; unbounded if unset.
    pub endurance_iterations: Option<u64>,
    /// Pause after a result table before the next round.
    pub round_pause: u64,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9000".into(),
            call_timeout: 30,
            boot_poll_interval: 2,
            boot_poll_attempts: 10,
            reconnect_grace: 300,
            include_manual: true,
            scenarios: None,
            endurance: None,
            endurance_iterations: None,
            round_pause: 10,
        }
    }
}

impl TesterConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("{} not found, using default configuration", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }

    pub fn boot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.boot_poll_interval)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace)
    }

    pub fn round_pause(&self) -> Duration {
        Duration::from_secs(self.round_pause)
    }
}
