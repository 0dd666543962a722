//! Native transport backed by `reqwest`.

use async_trait::async_trait;
use reqwest::{multipart, Client, Method};
use std::time::{Duration, Instant};
use tracing::debug;

use super::http::{
    FilePart, HttpBody, HttpError, HttpMethod, HttpRequest, HttpResponse, HttpResult,
    HttpTransport,
};

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(3)))
            .pool_idle_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| HttpError::InvalidRequest {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn form(parts: Vec<FilePart>) -> Result<multipart::Form, HttpError> {
    let mut form = multipart::Form::new();
    for part in parts {
        let mut file = multipart::Part::bytes(part.data.to_vec()).file_name(part.file_name);
        if let Some(content_type) = part.content_type {
            file = file
                .mime_str(&content_type)
                .map_err(|e| HttpError::InvalidRequest {
                    reason: format!("invalid content type '{content_type}': {e}"),
                })?;
        }
        form = form.part(part.name, file);
    }
    Ok(form)
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let started = Instant::now();
        let request_id = request.request_id().to_string();
        let timeout_ms = request.timeout_ms();
        let host = request.url().host().to_string();
        let is_multipart = matches!(request.body(), HttpBody::Multipart(_));

        let mut builder = self
            .client
            .request(method(request.method()), request.url().as_str())
            .timeout(Duration::from_millis(timeout_ms));

        for (name, value) in request.headers().iter() {
            // reqwest writes the boundary-carrying content type itself
            if is_multipart && name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            builder = builder.header(name, value);
        }

        builder = match request.into_body() {
            HttpBody::Empty => builder,
            HttpBody::Json(bytes) => builder.body(bytes),
            HttpBody::Multipart(parts) => builder.multipart(form(parts.into_parts())?),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout {
                    timeout_ms,
                    request_id: request_id.clone(),
                }
            } else {
                HttpError::Connection {
                    host: host.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout {
                    timeout_ms,
                    request_id: request_id.clone(),
                }
            } else {
                HttpError::InvalidResponse {
                    reason: format!("failed to read body: {e}"),
                    request_id: request_id.clone(),
                }
            }
        })?;

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(status, duration_ms, request_id = %request_id, "response received");

        Ok(HttpResponse::new(status, body.to_vec(), request_id))
    }
}
