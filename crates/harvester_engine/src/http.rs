//! HTTP adapters for every capability.
//!
//! All endpoints speak JSON and authenticate with the bearer token from the
//! configured [`CredentialProvider`].
use std::sync::Arc;
use std::time::Duration;

use harvester_core::{ContextHandle, Item, ItemId, StatusReport};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    CapabilityError, CapabilityErrorKind, CollectCommand, CollectReply, CollectorBridge,
    ContextManager, CredentialProvider, Product, ResultSink, WorkSource,
};

/// Slack added on top of a server-side wait so the request outlives it.
const WAIT_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared JSON client bound to one base URL.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        settings: &HttpSettings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, CapabilityError> {
        let base = Url::parse(base_url)
            .map_err(|err| CapabilityError::new(CapabilityErrorKind::InvalidRequest, err.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(CapabilityError::new(
                CapabilityErrorKind::InvalidRequest,
                format!("{base_url} cannot be used as a base url"),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| CapabilityError::new(CapabilityErrorKind::Network, err.to_string()))?;
        Ok(Self {
            client,
            base,
            credentials,
        })
    }

    /// Appends percent-encoded path segments to the base url.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, CapabilityError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                CapabilityError::new(CapabilityErrorKind::InvalidRequest, self.base.to_string())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url).header(ACCEPT, "application/json");
        match self.credentials.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn with_json<T: Serialize + ?Sized>(
        builder: RequestBuilder,
        body: &T,
    ) -> Result<RequestBuilder, CapabilityError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|err| CapabilityError::new(CapabilityErrorKind::InvalidRequest, err.to_string()))?;
        Ok(builder.header(CONTENT_TYPE, "application/json").body(bytes))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, CapabilityError> {
        builder.send().await.map_err(map_reqwest_error)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, CapabilityError> {
        let response = ensure_success(response)?;
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        serde_json::from_slice(&bytes)
            .map_err(|err| CapabilityError::new(CapabilityErrorKind::InvalidResponse, err.to_string()))
    }
}

fn ensure_success(response: Response) -> Result<Response, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(CapabilityError::new(
            CapabilityErrorKind::HttpStatus(status.as_u16()),
            status.to_string(),
        ))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> CapabilityError {
    if err.is_timeout() {
        return CapabilityError::new(CapabilityErrorKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return CapabilityError::new(CapabilityErrorKind::InvalidResponse, err.to_string());
    }
    CapabilityError::new(CapabilityErrorKind::Network, err.to_string())
}

/// Work queue: `GET items/next`, `PUT items/{id}/status`.
#[derive(Clone)]
pub struct HttpWorkSource {
    api: ApiClient,
}

impl HttpWorkSource {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl WorkSource for HttpWorkSource {
    async fn next_item(&self) -> Result<Option<Item>, CapabilityError> {
        let url = self.api.endpoint(&["items", "next"])?;
        let response = ApiClient::send(self.api.request(Method::GET, url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            _ => ApiClient::read_json(response).await.map(Some),
        }
    }

    async fn report_status(
        &self,
        item_id: &ItemId,
        report: &StatusReport,
    ) -> Result<(), CapabilityError> {
        let url = self.api.endpoint(&["items", item_id.as_str(), "status"])?;
        let request = ApiClient::with_json(self.api.request(Method::PUT, url), report)?;
        let response = ApiClient::send(request).await?;
        ensure_success(response).map(|_| ())
    }
}

#[derive(Serialize)]
struct OpenContextRequest<'a> {
    url: &'a str,
    background: bool,
}

#[derive(Deserialize)]
struct OpenContextResponse {
    #[serde(default)]
    handle: Option<String>,
}

#[derive(Deserialize)]
struct ReadyResponse {
    ready: bool,
}

/// Remote rendering service: `POST contexts`, `GET contexts/{h}/ready`,
/// `DELETE contexts/{h}`, plus the collector endpoints on the same host.
#[derive(Clone)]
pub struct HttpBrowser {
    api: ApiClient,
}

impl HttpBrowser {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn context_url(&self, handle: &ContextHandle, action: Option<&str>) -> Result<Url, CapabilityError> {
        match action {
            Some(action) => self.api.endpoint(&["contexts", handle.as_str(), action]),
            None => self.api.endpoint(&["contexts", handle.as_str()]),
        }
    }
}

#[async_trait::async_trait]
impl ContextManager for HttpBrowser {
    async fn open(&self, url: &str) -> Result<Option<ContextHandle>, CapabilityError> {
        let endpoint = self.api.endpoint(&["contexts"])?;
        let body = OpenContextRequest {
            url,
            background: true,
        };
        let request = ApiClient::with_json(self.api.request(Method::POST, endpoint), &body)?;
        let response = ApiClient::send(request).await?;
        let opened: OpenContextResponse = ApiClient::read_json(response).await?;
        Ok(opened
            .handle
            .filter(|handle| !handle.is_empty())
            .map(ContextHandle::new))
    }

    async fn await_ready(
        &self,
        handle: &ContextHandle,
        timeout: Duration,
    ) -> Result<bool, CapabilityError> {
        let mut url = self.context_url(handle, Some("ready"))?;
        url.query_pairs_mut()
            .append_pair("timeoutMs", &timeout.as_millis().to_string());
        let request = self
            .api
            .request(Method::GET, url)
            .timeout(timeout + WAIT_MARGIN);
        let response = ApiClient::send(request).await?;
        let ready: ReadyResponse = ApiClient::read_json(response).await?;
        Ok(ready.ready)
    }

    async fn close(&self, handle: &ContextHandle) -> Result<(), CapabilityError> {
        let url = self.context_url(handle, None)?;
        let response = ApiClient::send(self.api.request(Method::DELETE, url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CapabilityError::new(
                CapabilityErrorKind::Unavailable,
                format!("context {handle} is gone"),
            ));
        }
        ensure_success(response).map(|_| ())
    }
}

#[async_trait::async_trait]
impl CollectorBridge for HttpBrowser {
    async fn send(
        &self,
        handle: &ContextHandle,
        command: &CollectCommand,
        timeout: Duration,
    ) -> Result<CollectReply, CapabilityError> {
        let url = self.context_url(handle, Some("collect"))?;
        let request = ApiClient::with_json(self.api.request(Method::POST, url), command)?
            .timeout(timeout);
        let response = ApiClient::send(request).await?;
        ApiClient::read_json(response).await
    }

    async fn cancel(&self, handle: &ContextHandle) -> Result<(), CapabilityError> {
        let url = self.context_url(handle, Some("cancel"))?;
        let response = ApiClient::send(self.api.request(Method::POST, url)).await?;
        ensure_success(response).map(|_| ())
    }
}

/// Upload endpoint: `POST items/{id}/products` with the product array.
#[derive(Clone)]
pub struct HttpResultSink {
    api: ApiClient,
}

impl HttpResultSink {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl ResultSink for HttpResultSink {
    async fn upload(&self, item: &Item, products: &[Product]) -> Result<u64, CapabilityError> {
        let url = self.api.endpoint(&["items", item.id.as_str(), "products"])?;
        let request = ApiClient::with_json(self.api.request(Method::POST, url), products)?;
        let response = ApiClient::send(request).await?;
        ensure_success(response)?;
        Ok(products.len() as u64)
    }
}
