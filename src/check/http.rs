//! HTTP access for checks, with credential negotiation for fresh instances.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode};

use super::StateBag;
use crate::error::{AppError, Result};
use crate::instance::{Credentials, Instance};

/// Run-state key: `true` while bootstrap credentials are in use.
pub const STATE_AUTH_INIT: &str = "authInit";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// 2xx or 3xx.
    pub fn is_ok(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Plain "GET url as user" capability used by checks.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, credentials: &Credentials) -> Result<HttpResponse>;
}

/// reqwest-backed transport: short connect timeout, no redirects, no retries.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(connection_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connection_timeout)
            .timeout(REQUEST_TIMEOUT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| AppError::network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, credentials: &Credentials) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .basic_auth(&credentials.user, Some(&credentials.password))
            .send()
            .await
            .map_err(|e| AppError::network_with_url(url, e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::network_with_url(url, e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// Instance-bound requests sharing the run's [`StateBag`].
///
/// A local instance that was never initialized may still have the bootstrap
/// password or may already have the customized one. Requests start with
/// the defaults and flip to the other set whenever a 401 comes back.
pub struct InstanceHttp<'a> {
    transport: &'a dyn HttpTransport,
    instance: &'a Instance,
    state: &'a StateBag,
    negotiate: bool,
}

impl<'a> InstanceHttp<'a> {
    pub fn new(
        transport: &'a dyn HttpTransport,
        instance: &'a Instance,
        state: &'a StateBag,
        initialized: bool,
    ) -> Self {
        Self {
            transport,
            instance,
            state,
            negotiate: instance.is_local() && !initialized,
        }
    }

    fn auth_init(&self) -> bool {
        self.state.get_bool(STATE_AUTH_INIT).unwrap_or(true)
    }

    pub fn credentials(&self) -> Credentials {
        if self.negotiate && self.auth_init() {
            Credentials::defaults()
        } else {
            self.instance.credentials.clone()
        }
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        let url = self.instance.url_for(path);
        let response = self.transport.get(&url, &self.credentials()).await?;
        if self.negotiate && response.status == StatusCode::UNAUTHORIZED.as_u16() {
            let auth_init = self.auth_init();
            if auth_init {
                log::info!(
                    "Switching instance '{}' credentials from defaults to customized.",
                    self.instance.name
                );
            } else {
                log::info!(
                    "Switching instance '{}' credentials from customized to defaults.",
                    self.instance.name
                );
            }
            self.state.set(STATE_AUTH_INIT, !auth_init);
        }
        Ok(response)
    }
}
