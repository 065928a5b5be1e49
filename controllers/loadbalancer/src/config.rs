//! Controller configuration.
//!
//! SAKURA Cloud settings come from `SAKURACLOUD_*` environment variables and
//! an optional YAML file named by `CLOUD_CONFIG`. Values in the file win;
//! environment values fill whatever the file leaves empty.

use crate::error::ControllerError;
use iaas_client::ClientConfig;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Prefix of the SAKURA Cloud environment variables
pub const ENV_PREFIX: &str = "SAKURACLOUD_";

/// Longest accepted cluster id
pub const MAX_CLUSTER_ID_LEN: usize = 18;

const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8080";

/// SAKURA Cloud settings
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudConfig {
    pub access_token: String,
    pub access_token_secret: String,
    pub zone: String,
    pub retry_max: u32,
    pub retry_interval_sec: u64,
    #[serde(rename = "apiRootURL")]
    pub api_root_url: String,
    pub trace_mode: bool,
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    pub disable_load_balancer: bool,
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("zone", &self.zone)
            .field("retry_max", &self.retry_max)
            .field("retry_interval_sec", &self.retry_interval_sec)
            .field("api_root_url", &self.api_root_url)
            .field("trace_mode", &self.trace_mode)
            .field("cluster_id", &self.cluster_id)
            .field("disable_load_balancer", &self.disable_load_balancer)
            .finish_non_exhaustive()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, ControllerError>
where
    T::Err: std::fmt::Display,
{
    match value.filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| ControllerError::InvalidConfig(format!("{}{}={:?}: {}", ENV_PREFIX, key, v, e))),
    }
}

impl CloudConfig {
    /// Read `SAKURACLOUD_*` values through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));
        Ok(Self {
            access_token: var("ACCESS_TOKEN").unwrap_or_default(),
            access_token_secret: var("ACCESS_TOKEN_SECRET").unwrap_or_default(),
            zone: var("ZONE").unwrap_or_default(),
            retry_max: parse_env("RETRY_MAX", var("RETRY_MAX"))?.unwrap_or_default(),
            retry_interval_sec: parse_env("RETRY_INTERVAL_SEC", var("RETRY_INTERVAL_SEC"))?.unwrap_or_default(),
            api_root_url: var("API_ROOT_URL").unwrap_or_default(),
            trace_mode: parse_env("TRACE_MODE", var("TRACE_MODE"))?.unwrap_or_default(),
            cluster_id: var("CLUSTER_ID").unwrap_or_default(),
            disable_load_balancer: parse_env("DISABLE_LOAD_BALANCER", var("DISABLE_LOAD_BALANCER"))?
                .unwrap_or_default(),
        })
    }

    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ControllerError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| ControllerError::InvalidConfig(format!("cloud config is not valid YAML: {}", e)))
    }

    /// Fill the fields left empty here from `fallback`
    pub fn merge(mut self, fallback: CloudConfig) -> Self {
        fn fill(field: &mut String, fallback: String) {
            if field.is_empty() {
                *field = fallback;
            }
        }
        fill(&mut self.access_token, fallback.access_token);
        fill(&mut self.access_token_secret, fallback.access_token_secret);
        fill(&mut self.zone, fallback.zone);
        fill(&mut self.api_root_url, fallback.api_root_url);
        fill(&mut self.cluster_id, fallback.cluster_id);
        if self.retry_max == 0 {
            self.retry_max = fallback.retry_max;
        }
        if self.retry_interval_sec == 0 {
            self.retry_interval_sec = fallback.retry_interval_sec;
        }
        self.trace_mode |= fallback.trace_mode;
        self.disable_load_balancer |= fallback.disable_load_balancer;
        self
    }

    /// Environment values, overridden by the YAML file at `CLOUD_CONFIG` when set
    pub fn load() -> Result<Self, ControllerError> {
        let env_config = Self::from_env()?;
        match env::var("CLOUD_CONFIG").ok().filter(|p| !p.is_empty()) {
            None => Ok(env_config),
            Some(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    ControllerError::InvalidConfig(format!("reading cloud config {:?} failed: {}", path, e))
                })?;
                Ok(Self::from_yaml(&contents)?.merge(env_config))
            }
        }
    }

    /// Check every rule and report all violations at once
    pub fn validate(&self) -> Result<(), ControllerError> {
        let mut violations = Vec::new();
        for (key, value) in [
            ("accessToken", &self.access_token),
            ("accessTokenSecret", &self.access_token_secret),
            ("zone", &self.zone),
        ] {
            if value.is_empty() {
                violations.push(format!("{:?} is required", key));
            }
        }
        if self.cluster_id.chars().count() > MAX_CLUSTER_ID_LEN {
            violations.push(format!(
                "{:?} string length must be less equal {}",
                "clusterID", MAX_CLUSTER_ID_LEN
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ControllerError::InvalidConfig(violations.join("; ")))
        }
    }

    /// API client settings; `Accept-Language` is always `en`
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.access_token, &self.access_token_secret, &self.zone)
            .with_api_root_url(&self.api_root_url)
            .with_retry(self.retry_max, Duration::from_secs(self.retry_interval_sec))
            .with_trace_mode(self.trace_mode)
            .with_accept_language("en")
    }
}

/// Process settings outside the cloud config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    pub probe_addr: SocketAddr,
}

impl ControllerSettings {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let probe_addr = lookup("PROBE_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_PROBE_ADDR.to_string());
        let probe_addr = probe_addr
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("PROBE_ADDR={:?}: {}", probe_addr, e)))?;
        Ok(Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.is_empty()),
            probe_addr,
        })
    }

    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }
}
