//! CPI configuration
//!
//! The director hands the CPI a JSON document once per process; it is parsed,
//! validated and then shared read-only (`Arc<CpiConfig>`) with every component.

pub mod error;

pub use error::*;

use alicloud_cpi_core::PollPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "ALICLOUD_CPI_CONFIG";
const CONFIG_FILE: &str = "cpi.json";
const CONFIG_DIR: &str = "alicloud-cpi";

/// Top-level configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpiConfig {
    pub cloud: CloudConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default = "default_plugin")]
    pub plugin: String,
    pub properties: CloudProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudProperties {
    pub alicloud: AlicloudConfig,
}

/// Provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlicloudConfig {
    pub region_id: String,

    /// Zone used for disks created without a VM
    #[serde(default)]
    pub zone_id: Option<String>,

    pub access_key_id: String,
    pub access_key_secret: Secret,

    /// Region → image table
    #[serde(default)]
    pub regions: Vec<RegionConfig>,

    /// Stop and reboot instances without waiting for the guest
    #[serde(default = "default_force_stop")]
    pub force_stop: bool,

    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,

    /// Default image for the region
    #[serde(default)]
    pub image_id: Option<String>,

    /// Per-stemcell image overrides
    #[serde(default)]
    pub stemcells: BTreeMap<String, String>,
}

/// Poll interval and timeout budgets, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub instance_timeout_ms: Option<u64>,
    #[serde(default)]
    pub disk_timeout_ms: Option<u64>,
    #[serde(default)]
    pub image_timeout_ms: Option<u64>,
}

fn default_plugin() -> String {
    "alicloud".to_string()
}
fn default_force_stop() -> bool {
    true
}
fn default_interval() -> u64 {
    500
}
fn default_timeout() -> u64 {
    1_200_000 // 20 minutes
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            timeout_ms: default_timeout(),
            instance_timeout_ms: None,
            disk_timeout_ms: None,
            image_timeout_ms: None,
        }
    }
}

impl PollingConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        let budget = |ms: Option<u64>| Duration::from_millis(ms.unwrap_or(self.timeout_ms));
        PollPolicy {
            interval: Duration::from_millis(self.interval_ms),
            instance_timeout: budget(self.instance_timeout_ms),
            disk_timeout: budget(self.disk_timeout_ms),
            image_timeout: budget(self.image_timeout_ms),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "polling.interval_ms must be positive".to_string(),
            ));
        }
        let timeouts = [
            ("timeout_ms", Some(self.timeout_ms)),
            ("instance_timeout_ms", self.instance_timeout_ms),
            ("disk_timeout_ms", self.disk_timeout_ms),
            ("image_timeout_ms", self.image_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "polling.{name} must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Credential value that never shows up in logs
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl std::str::FromStr for CpiConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: CpiConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl CpiConfig {
    pub fn alicloud(&self) -> &AlicloudConfig {
        &self.cloud.properties.alicloud
    }

    pub fn region_id(&self) -> &str {
        &self.alicloud().region_id
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.alicloud().polling.poll_policy()
    }

    pub fn validate(&self) -> Result<()> {
        let ali = self.alicloud();
        if ali.region_id.trim().is_empty() {
            return Err(ConfigError::Invalid("region_id must not be empty".to_string()));
        }
        if ali.access_key_id.trim().is_empty() || ali.access_key_secret.expose().trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "access_key_id and access_key_secret are required".to_string(),
            ));
        }
        self.region()?;
        ali.polling.validate()
    }

    /// Entry of the region table for the configured region
    pub fn region(&self) -> Result<&RegionConfig> {
        let ali = self.alicloud();
        ali.regions
            .iter()
            .find(|r| r.name == ali.region_id)
            .ok_or_else(|| ConfigError::UnknownRegion(ali.region_id.clone()))
    }

    /// Image backing a stemcell in the configured region
    ///
    /// Image ids (`m-...`) pass through unchanged; names go through the region
    /// table, falling back to the region's default image.
    pub fn resolve_stemcell_image(&self, stemcell: &str) -> Result<String> {
        if stemcell.starts_with("m-") {
            return Ok(stemcell.to_string());
        }
        let region = self.region()?;
        region
            .stemcells
            .get(stemcell)
            .or(region.image_id.as_ref())
            .cloned()
            .ok_or_else(|| ConfigError::NoImage {
                stemcell: stemcell.to_string(),
                region: region.name.clone(),
            })
    }
}

/// Locate the configuration file
///
/// Search order:
/// 1. `explicit` (the `--config` argument)
/// 2. environment variable ALICLOUD_CPI_CONFIG
/// 3. ./cpi.json
/// 4. ~/.config/alicloud-cpi/cpi.json
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::MissingFile(path.display().to_string()));
    }

    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("{} points to a missing file: {}", CONFIG_ENV, path.display());
    }

    let local = std::env::current_dir()?.join(CONFIG_FILE);
    if local.exists() {
        return Ok(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join(CONFIG_DIR).join(CONFIG_FILE);
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::ConfigNotFound)
}

/// Read, parse and validate a configuration file
pub fn load_config(path: &Path) -> Result<CpiConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: CpiConfig = content.parse()?;
    tracing::debug!(
        path = %path.display(),
        region = config.region_id(),
        "Loaded CPI configuration"
    );
    Ok(config)
}
