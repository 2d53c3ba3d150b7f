//! HTTP transport abstraction so the acquirer is testable without a
//! real network.

use async_trait::async_trait;
use live_timing_errors::AcquirerError;

/// Response payload a [`Transport`] call resolves to.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Plain HTTP calls the acquirer needs. Kept minimal and host-scoped so a
/// fake can be dropped in for tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_form(&self, host: &str, path: &str, form: &str) -> Result<HttpResponse, AcquirerError>;
    async fn get(&self, host: &str, path: &str) -> Result<HttpResponse, AcquirerError>;
}

/// Default [`Transport`] backed by `reqwest`. The live-timing site only
/// ever answered on plain HTTP, so this always builds an `http://` URL.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn to_response(resp: reqwest::Response) -> Result<HttpResponse, AcquirerError> {
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| AcquirerError::Transport(e.to_string()))?
            .to_vec();
        Ok(HttpResponse { status, headers, body })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_form(&self, host: &str, path: &str, form: &str) -> Result<HttpResponse, AcquirerError> {
        let url = format!("http://{host}{path}");
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form.to_string())
            .send()
            .await
            .map_err(|e| AcquirerError::Transport(e.to_string()))?;
        Self::to_response(resp).await
    }

    async fn get(&self, host: &str, path: &str) -> Result<HttpResponse, AcquirerError> {
        let url = format!("http://{host}{path}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AcquirerError::Transport(e.to_string()))?;
        Self::to_response(resp).await
    }
}
