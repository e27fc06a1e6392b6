//! HTTP port used by the task HTTP side-effect stage

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{error::OrchestratorError, task::HttpCallConfig};

/// HTTP request issued by a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method:  String,
    pub url:     String,
    pub headers: HashMap<String, String>,
    pub body:    Option<String>
}

impl From<&HttpCallConfig> for HttpRequest {
    fn from(config: &HttpCallConfig) -> Self {
        Self {
            method:  config.method.to_uppercase(),
            url:     config.url.clone(),
            headers: config.headers.clone(),
            body:    config.body.clone()
        }
    }
}

/// HTTP response information
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers:     HashMap<String, String>,
    pub body:        String,
    pub is_success:  bool
}

impl HttpResponse {
    pub fn new(status_code: u16, body: String) -> Self {
        Self { status_code, headers: HashMap::new(), body, is_success: (200..300).contains(&status_code) }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// Port for HTTP client operations
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send a request; transport failures are errors, any received status is a response
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, OrchestratorError>;
}
