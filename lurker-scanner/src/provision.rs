use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

/// Where a started profile can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedEndpoint {
    pub profile_id: String,
    pub ws_endpoint: Option<String>,
    pub debug_port: u16,
}

impl ProvisionedEndpoint {
    pub fn http_endpoint(&self, host: &str) -> String {
        format!("http://{}:{}", host, self.debug_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileState {
    Active,
    Inactive,
    Other(String),
}

/// Grants and revokes execution handles.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn start(&self, profile_id: &str) -> Result<ProvisionedEndpoint>;
    async fn stop(&self, profile_id: &str) -> Result<bool>;
    async fn status(&self, profile_id: &str) -> Result<ProfileState>;

    /// Host that provisioned debug ports are bound on.
    fn session_host(&self) -> &str {
        "127.0.0.1"
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct StartData {
    ws: Option<WsData>,
    debug_port: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WsData {
    puppeteer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: Option<String>,
}

/// HTTP client for the local browser-profile manager.
pub struct ProvisioningClient {
    client: Client,
    api_url: String,
    session_host: String,
}

impl ProvisioningClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let session_host = url::Url::parse(api_url)?
            .host_str()
            .unwrap_or("127.0.0.1")
            .to_string();

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            session_host,
        })
    }

    pub fn with_session_host(mut self, host: &str) -> Self {
        self.session_host = host.to_string();
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        profile_id: &str,
    ) -> Result<ApiResponse<T>> {
        let resp = self
            .client
            .get(format!("{}/api/v1/browser/{}", self.api_url, action))
            .query(&[("user_id", profile_id)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScanError::Provisioning {
                profile: profile_id.to_string(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }

        Ok(resp.json::<ApiResponse<T>>().await?)
    }
}

#[async_trait]
impl Provisioner for ProvisioningClient {
    async fn start(&self, profile_id: &str) -> Result<ProvisionedEndpoint> {
        let response = self.call::<StartData>("start", profile_id).await?;
        if response.code != 0 {
            error!("Failed to start profile {}: {}", profile_id, response.msg);
            return Err(ScanError::Provisioning {
                profile: profile_id.to_string(),
                message: response.msg,
            });
        }

        let data = response.data.ok_or_else(|| ScanError::Provisioning {
            profile: profile_id.to_string(),
            message: "empty start response".to_string(),
        })?;

        let debug_port = data
            .debug_port
            .as_ref()
            .and_then(parse_port)
            .ok_or_else(|| ScanError::Provisioning {
                profile: profile_id.to_string(),
                message: "no debug port in start response".to_string(),
            })?;

        info!("Started profile {} on port {}", profile_id, debug_port);
        Ok(ProvisionedEndpoint {
            profile_id: profile_id.to_string(),
            ws_endpoint: data.ws.and_then(|ws| ws.puppeteer),
            debug_port,
        })
    }

    async fn stop(&self, profile_id: &str) -> Result<bool> {
        let response = self.call::<Value>("stop", profile_id).await?;
        if response.code == 0 {
            info!("Stopped profile {}", profile_id);
            Ok(true)
        } else {
            warn!("Failed to stop profile {}: {}", profile_id, response.msg);
            Ok(false)
        }
    }

    async fn status(&self, profile_id: &str) -> Result<ProfileState> {
        let response = self.call::<StatusData>("active", profile_id).await?;
        if response.code != 0 {
            return Ok(ProfileState::Inactive);
        }
        let state = response
            .data
            .and_then(|d| d.status)
            .unwrap_or_default();
        Ok(match state.as_str() {
            "Active" => ProfileState::Active,
            "Inactive" | "" => ProfileState::Inactive,
            other => ProfileState::Other(other.to_string()),
        })
    }

    fn session_host(&self) -> &str {
        &self.session_host
    }
}

/// The manager reports ports as either numbers or numeric strings.
fn parse_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
