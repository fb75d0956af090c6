//! Usage: HTTP request/response seam (typed bodies, status, error-code field) + reqwest transport.

use crate::shared::error::AppResult;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// One outbound REST request, path-relative to the configured base URL.
/// The coordinator attaches the bearer token; callers never do.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Object-safe transport seam so tests can script responses without a server.
pub trait HttpTransport: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: ApiRequest,
        bearer: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = AppResult<ApiResponse>> + Send + 'a>>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("SYSTEM_ERROR: http client init failed: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute<'a>(
        &'a self,
        request: ApiRequest,
        bearer: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = AppResult<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}{}", self.base_url, request.path);
            let mut builder = match request.method {
                Method::Get => self.client.get(&url),
                Method::Post => self.client.post(&url),
                Method::Put => self.client.put(&url),
                Method::Delete => self.client.delete(&url),
            };
            if let Some(token) = bearer {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| format!("SYSTEM_ERROR: request to {url} failed: {e}"))?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| format!("SYSTEM_ERROR: response read from {url} failed: {e}"))?;

            let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            let (error_code, error_description) = if (200..300).contains(&status) {
                (None, None)
            } else {
                parse_error_fields(&body)
            };

            Ok(ApiResponse {
                status,
                error_code,
                error_description,
                body,
            })
        })
    }
}

/// Extract the error-code field from the standard payload shapes:
/// flat `{"error": "...", "error_description": "..."}`, explicit `{"code": ...}`,
/// or nested `{"error": {"code"|"type": ..., "message": ...}}`.
pub(crate) fn parse_error_fields(body: &Value) -> (Option<String>, Option<String>) {
    let mut code = body
        .get("code")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let mut message = body
        .get("error_description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    if let Some(error_value) = body.get("error") {
        if let Some(err_str) = error_value.as_str() {
            if code.is_none() {
                code = Some(err_str.trim().to_string());
            }
        } else if let Some(err_obj) = error_value.as_object() {
            if code.is_none() {
                code = err_obj
                    .get("code")
                    .and_then(Value::as_str)
                    .or_else(|| err_obj.get("type").and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
            if message.is_none() {
                message = err_obj
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
        }
    }

    (code, message)
}
