//! Reqwest implementation of the HTTP port

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tracing::{Level, event};

use crate::{
    domain::{constant::adapter, error::OrchestratorError},
    port::http::{HttpClient, HttpRequest, HttpResponse}
};

pub struct ReqwestHttpClient {
    client: reqwest::Client
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder().timeout(timeout).build().unwrap_or_else(|_| reqwest::Client::new())
        }
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(key, value)| value.to_str().ok().map(|value| (key.to_string(), value.to_string())))
            .collect()
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, OrchestratorError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| OrchestratorError::Configuration(format!("unsupported HTTP method '{}'", request.method)))?;

        let mut builder = self.client.request(method.clone(), &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            if !request.headers.keys().any(|key| key.eq_ignore_ascii_case("content-type")) {
                builder = builder.header("Content-Type", "application/json");
            }
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OrchestratorError::Network(format!("{} {} failed: {}", method, request.url, e)))?;

        let status_code = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| OrchestratorError::Network(format!("Failed to read response body: {}", e)))?;

        event!(
            Level::DEBUG,
            event = adapter::HTTP_REQUEST_SENT,
            method = %method,
            url = %request.url,
            status = status_code
        );
        Ok(HttpResponse::new(status_code, body).with_headers(headers))
    }
}
