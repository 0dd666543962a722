//! Scripted transport for tests and for shells exercising the core offline.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::http::{HttpError, HttpRequest, HttpResponse, HttpResult, HttpTransport};

/// Answers requests in FIFO order from a script and records every request.
/// An exhausted script answers with a connection error.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<HttpResult>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: HttpResult) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    pub fn push_json<T: Serialize + ?Sized>(&self, status: u16, body: &T) {
        let body = serde_json::to_vec(body).unwrap_or_default();
        self.push(Ok(HttpResponse::new(
            status,
            body,
            uuid::Uuid::new_v4().to_string(),
        )));
    }

    pub fn push_error(&self, error: HttpError) {
        self.push(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let host = request.url().host().to_string();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(HttpError::Connection {
                    host,
                    message: "no scripted response left".to_string(),
                })
            })
    }
}
