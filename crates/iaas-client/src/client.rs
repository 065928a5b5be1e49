//! SAKURA Cloud API client
//!
//! Implements the IaaS API 1.1 calls used for load balancer provisioning.
//! Endpoints live under `{api_root_url}/zone/{zone}/api/cloud/1.1`.

use crate::common::query::{find_resources, FindQuery};
use crate::common::{decode_field, HttpClient};
use crate::error::IaasError;
use crate::iaas_trait::IaasClientTrait;
use crate::models::*;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Default API root URL
pub const DEFAULT_API_ROOT_URL: &str = "https://secure.sakura.ad.jp/cloud";

/// Per-phase wait of [`IaasClientTrait::shutdown_server_by_id`]
pub const DEFAULT_SERVER_SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

/// Connection settings for [`IaasClient`]
#[derive(Clone)]
pub struct ClientConfig {
    pub access_token: String,
    pub access_token_secret: String,
    pub zone: String,
    pub api_root_url: String,
    pub accept_language: Option<String>,
    /// Transport retries for throttled requests; 0 disables retry
    pub retry_max: u32,
    pub retry_interval: Duration,
    pub trace_mode: bool,
    pub request_timeout: Duration,
    /// Interval between polls of the wait helpers
    pub poll_interval: Duration,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("zone", &self.zone)
            .field("api_root_url", &self.api_root_url)
            .field("retry_max", &self.retry_max)
            .field("retry_interval", &self.retry_interval)
            .field("trace_mode", &self.trace_mode)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn new(access_token: impl Into<String>, access_token_secret: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            access_token_secret: access_token_secret.into(),
            zone: zone.into(),
            api_root_url: DEFAULT_API_ROOT_URL.to_string(),
            accept_language: None,
            retry_max: 0,
            retry_interval: Duration::from_secs(5),
            trace_mode: false,
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Override the API root URL; empty keeps the default
    pub fn with_api_root_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !url.is_empty() {
            self.api_root_url = url;
        }
        self
    }

    pub fn with_retry(mut self, retry_max: u32, retry_interval: Duration) -> Self {
        self.retry_max = retry_max;
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_trace_mode(mut self, trace_mode: bool) -> Self {
        self.trace_mode = trace_mode;
        self
    }

    pub fn with_accept_language(mut self, lang: impl Into<String>) -> Self {
        self.accept_language = Some(lang.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Zone-scoped API base URL
    pub fn zone_url(&self) -> String {
        format!(
            "{}/zone/{}/api/cloud/1.1",
            self.api_root_url.trim_end_matches('/'),
            self.zone
        )
    }
}

/// Target state of a wait helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// Availability `available`; `failed` aborts the wait
    CopyDone,
    /// Instance status `up`
    Active,
    /// Instance status `down`
    Down,
}

impl WaitTarget {
    pub fn state_name(self) -> &'static str {
        match self {
            WaitTarget::CopyDone => "available",
            WaitTarget::Active => "up",
            WaitTarget::Down => "down",
        }
    }

    /// Whether the appliance has reached this state
    pub fn reached(self, lb: &LoadBalancer) -> Result<bool, IaasError> {
        match self {
            WaitTarget::CopyDone => {
                if lb.is_failed() {
                    return Err(IaasError::ApplianceFailed {
                        id: lb.id,
                        state: self.state_name(),
                    });
                }
                Ok(lb.is_available())
            }
            WaitTarget::Active => Ok(lb.instance_status() == Some(InstanceStatus::Up)),
            WaitTarget::Down => Ok(lb.instance_status() == Some(InstanceStatus::Down)),
        }
    }
}

/// SAKURA Cloud API client
#[derive(Debug, Clone)]
pub struct IaasClient {
    http: HttpClient,
    zone: String,
    poll_interval: Duration,
}

impl IaasClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self, IaasError> {
        if config.access_token.is_empty() || config.access_token_secret.is_empty() {
            return Err(IaasError::InvalidRequest(
                "access token and access token secret are required".to_string(),
            ));
        }
        if config.zone.is_empty() {
            return Err(IaasError::InvalidRequest("zone is required".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("sakura-lb-controller/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let http = HttpClient::new(
            client,
            config.zone_url(),
            config.access_token.clone(),
            config.access_token_secret.clone(),
        )
        .with_accept_language(config.accept_language.clone())
        .with_retry(config.retry_max, config.retry_interval)
        .with_trace_mode(config.trace_mode);

        Ok(Self {
            http,
            zone: config.zone,
            poll_interval: config.poll_interval,
        })
    }

    /// Get the zone-scoped base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn find_appliances<T: serde::de::DeserializeOwned>(
        &self,
        class: &'static str,
        tags: &[String],
    ) -> Result<Vec<T>, IaasError> {
        let query = FindQuery::new().class(class).tags(tags);
        find_resources(&self.http, "appliance", "Appliances", &query).await
    }

    async fn wait_for(
        &self,
        id: ResourceId,
        target: WaitTarget,
        timeout: Duration,
    ) -> Result<LoadBalancer, IaasError> {
        debug!("Waiting up to {:?} for load balancer {} to become {}", timeout, id, target.state_name());
        let polling = async {
            loop {
                let lb = self.read_load_balancer(id).await?;
                if target.reached(&lb)? {
                    return Ok::<_, IaasError>(lb);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(timeout, polling).await {
            Ok(result) => result,
            Err(_) => Err(IaasError::WaitTimeout {
                resource: "load balancer",
                id,
                state: target.state_name(),
                timeout,
            }),
        }
    }

    async fn wait_for_server_down(&self, id: ResourceId, timeout: Duration) -> Result<Server, IaasError> {
        debug!("Waiting up to {:?} for server {} to become down", timeout, id);
        let polling = async {
            loop {
                let server = self.read_server(id).await?;
                if server.instance_status() == Some(InstanceStatus::Down) {
                    return Ok::<_, IaasError>(server);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, polling)
            .await
            .unwrap_or(Err(IaasError::WaitTimeout {
                resource: "server",
                id,
                state: "down",
                timeout,
            }))
    }
}

#[async_trait::async_trait]
impl IaasClientTrait for IaasClient {
    fn zone(&self) -> &str {
        &self.zone
    }

    async fn auth_status(&self) -> Result<AuthStatus, IaasError> {
        let value = self.http.get("/auth-status").await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn find_servers(&self) -> Result<Vec<Server>, IaasError> {
        find_resources(&self.http, "server", "Servers", &FindQuery::new()).await
    }

    async fn read_server(&self, id: ResourceId) -> Result<Server, IaasError> {
        let value = self.http.get(&format!("/server/{}", id)).await?;
        decode_field(value, "Server")
    }

    async fn shutdown_server(&self, id: ResourceId) -> Result<(), IaasError> {
        self.http.delete(&format!("/server/{}/power", id)).await?;
        info!("Requested shutdown of server {}", id);
        Ok(())
    }

    async fn stop_server(&self, id: ResourceId) -> Result<(), IaasError> {
        let body = serde_json::json!({ "Force": true });
        self.http
            .send(reqwest::Method::DELETE, &format!("/server/{}/power", id), Some(&body))
            .await?;
        info!("Forced stop of server {}", id);
        Ok(())
    }

    async fn wait_until_server_down(&self, id: ResourceId, timeout: Duration) -> Result<Server, IaasError> {
        self.wait_for_server_down(id, timeout).await
    }

    async fn find_switches(&self, tags: &[String]) -> Result<Vec<Switch>, IaasError> {
        find_resources(&self.http, "switch", "Switches", &FindQuery::new().tags(tags)).await
    }

    async fn read_switch(&self, id: ResourceId) -> Result<Switch, IaasError> {
        let value = self.http.get(&format!("/switch/{}", id)).await?;
        decode_field(value, "Switch")
    }

    async fn find_routers(&self, tags: &[String]) -> Result<Vec<Router>, IaasError> {
        find_resources(&self.http, "internet", "Internet", &FindQuery::new().tags(tags)).await
    }

    async fn find_load_balancers(&self, tags: &[String]) -> Result<Vec<LoadBalancer>, IaasError> {
        self.find_appliances("loadbalancer", tags).await
    }

    async fn read_load_balancer(&self, id: ResourceId) -> Result<LoadBalancer, IaasError> {
        let value = self.http.get(&format!("/appliance/{}", id)).await?;
        decode_field(value, "Appliance")
    }

    async fn find_vpc_routers(&self) -> Result<Vec<VpcRouter>, IaasError> {
        self.find_appliances("vpcrouter", &[]).await
    }

    async fn find_databases(&self) -> Result<Vec<Database>, IaasError> {
        self.find_appliances("database", &[]).await
    }

    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest) -> Result<LoadBalancer, IaasError> {
        let value = self.http.post("/appliance", &request.to_body()).await?;
        let lb: LoadBalancer = decode_field(value, "Appliance")?;
        info!("Created load balancer {} ({})", lb.name, lb.id);
        Ok(lb)
    }

    async fn update_load_balancer(
        &self,
        id: ResourceId,
        request: &UpdateLoadBalancerRequest,
    ) -> Result<LoadBalancer, IaasError> {
        let value = self
            .http
            .put(&format!("/appliance/{}", id), Some(&request.to_body()))
            .await?;
        decode_field(value, "Appliance")
    }

    async fn apply_load_balancer_config(&self, id: ResourceId) -> Result<(), IaasError> {
        self.http.put(&format!("/appliance/{}/config", id), None).await?;
        Ok(())
    }

    async fn stop_load_balancer(&self, id: ResourceId) -> Result<(), IaasError> {
        let body = serde_json::json!({ "Force": false });
        self.http
            .send(reqwest::Method::DELETE, &format!("/appliance/{}/power", id), Some(&body))
            .await?;
        Ok(())
    }

    async fn delete_load_balancer(&self, id: ResourceId) -> Result<(), IaasError> {
        self.http.delete(&format!("/appliance/{}", id)).await?;
        info!("Deleted load balancer {}", id);
        Ok(())
    }

    async fn wait_until_copy_done(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError> {
        self.wait_for(id, WaitTarget::CopyDone, timeout).await
    }

    async fn wait_until_active(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError> {
        self.wait_for(id, WaitTarget::Active, timeout).await
    }

    async fn wait_until_down(&self, id: ResourceId, timeout: Duration) -> Result<LoadBalancer, IaasError> {
        self.wait_for(id, WaitTarget::Down, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_url() {
        let config = ClientConfig::new("t", "s", "is1b");
        assert_eq!(config.zone_url(), "https://secure.sakura.ad.jp/cloud/zone/is1b/api/cloud/1.1");

        let config = ClientConfig::new("t", "s", "tk1v").with_api_root_url("http://localhost:8080/");
        assert_eq!(config.zone_url(), "http://localhost:8080/zone/tk1v/api/cloud/1.1");

        let config = ClientConfig::new("t", "s", "is1a").with_api_root_url("");
        assert!(config.zone_url().starts_with(DEFAULT_API_ROOT_URL));
    }

    #[test]
    fn test_new_requires_credentials_and_zone() {
        assert!(matches!(
            IaasClient::new(ClientConfig::new("", "s", "is1b")),
            Err(IaasError::InvalidRequest(_))
        ));
        assert!(matches!(
            IaasClient::new(ClientConfig::new("t", "s", "")),
            Err(IaasError::InvalidRequest(_))
        ));
        let client = IaasClient::new(ClientConfig::new("t", "s", "is1b")).unwrap();
        assert_eq!(client.zone(), "is1b");
    }

    #[test]
    fn test_wait_target_copy_done_fails_on_failed_availability() {
        let lb = LoadBalancer {
            id: ResourceId(9),
            availability: Some(Availability::Failed),
            ..Default::default()
        };
        assert!(matches!(
            WaitTarget::CopyDone.reached(&lb),
            Err(IaasError::ApplianceFailed { .. })
        ));
        assert!(!WaitTarget::Active.reached(&lb).unwrap());
    }

    #[test]
    fn test_config_debug_hides_secret() {
        let config = ClientConfig::new("token-value", "secret-value", "is1b");
        let out = format!("{:?}", config);
        assert!(!out.contains("token-value"));
        assert!(!out.contains("secret-value"));
    }
}
