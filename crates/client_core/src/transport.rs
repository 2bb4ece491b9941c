use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, StatusCode};
use serde_json::Value;
use shared::error::ApiError;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::{TransportError, TransportErrorKind},
    ClientEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Delete => "delete",
        }
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Successful response: decoded JSON body plus HTTP status.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub data: Value,
    pub status: u16,
}

/// HTTP verbs the client core needs from the network layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ResponseEnvelope, TransportError>;

    async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ResponseEnvelope, TransportError> {
        let request = params
            .iter()
            .fold(ApiRequest::get(path), |request, (name, value)| {
                request.with_query(*name, value.clone())
            });
        self.execute(request).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<ResponseEnvelope, TransportError> {
        self.execute(ApiRequest::post(path, body)).await
    }

    async fn put(&self, path: &str, body: Value) -> Result<ResponseEnvelope, TransportError> {
        self.execute(ApiRequest::put(path, body)).await
    }

    async fn delete(&self, path: &str) -> Result<ResponseEnvelope, TransportError> {
        self.execute(ApiRequest::delete(path)).await
    }
}

/// Source of the credential attached to outgoing calls.
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Option<String>;
    fn clear(&self);
}

#[derive(Default)]
pub struct MemoryCredentials {
    token: RwLock<Option<String>>,
}

impl MemoryCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }
}

impl CredentialStore for MemoryCredentials {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct MissingCredentials;

impl CredentialStore for MissingCredentials {
    fn token(&self) -> Option<String> {
        None
    }

    fn clear(&self) {}
}

pub struct HttpTransport {
    http: Client,
    base_url: Url,
    auth_scheme: String,
    credentials: Arc<dyn CredentialStore>,
    events: broadcast::Sender<ClientEvent>,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        auth_scheme: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("invalid api base url '{base_url}'"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url,
            auth_scheme: auth_scheme.into(),
            credentials,
            events,
        })
    }

    fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| {
                TransportError::new(
                    TransportErrorKind::Request,
                    format!("invalid request path '{path}': {err}"),
                )
            })
    }

    fn handle_unauthorized(&self) {
        warn!("transport: credential rejected; clearing stored token");
        self.credentials.clear();
        let _ = self.events.send(ClientEvent::LoginRequired);
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ResponseEnvelope, TransportError> {
        let url = self.resolve(&request.path)?;
        let mut builder = self.http.request(request.method.as_reqwest(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = self.credentials.token() {
            builder = builder.header(AUTHORIZATION, format!("{} {token}", self.auth_scheme));
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let data = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        debug!(
            method = request.method.as_str(),
            path = %request.path,
            status = status.as_u16(),
            "transport: response received"
        );

        if status == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized();
        }
        if !status.is_success() {
            let api = ApiError::from_response(status.as_u16(), &data);
            return Err(TransportError::from_api(status.as_u16(), api));
        }

        Ok(ResponseEnvelope {
            data,
            status: status.as_u16(),
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
