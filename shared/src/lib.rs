// lib.rs - photobed shared client core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod event;
pub mod model;
pub mod stores;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use api::{AdminApi, Api, AuthApi, ImageApi};
pub use capabilities::{HttpTransport, KeyValueStore, MemoryStore, SessionKey};
pub use client::ApiClient;
pub use config::{ClientConfig, ConfigError};
pub use event::{ImageId, Secret, SessionEvent, SessionEvents, UserId};
pub use stores::{AdminState, AdminStore, ImageState, ImageStore, Stores, UserState, UserStore};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_ADMIN_PAGE_SIZE: u32 = 20;
pub const FIRST_PAGE: u32 = 1;
pub const UPLOAD_FIELD: &str = "image";

/// Context key set on errors raised by the list refresh that follows a
/// successful mutation.
pub const PHASE_CONTEXT_KEY: &str = "phase";
pub const PHASE_REFRESH: &str = "refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No response was received: connectivity loss, DNS, TLS or timeout.
    Network,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Server,
    Deserialization,
    Storage,
    InvalidRequest,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Server => "SERVER_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::Validation,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            500..=599 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

/// The error every request builder and state container hands back.
///
/// `message` is what the containers record in their `error` field, so it is
/// the server-provided text whenever the response carried one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(401)
    }

    /// True when this error came from the list refresh after an upload or
    /// delete that the server had already accepted.
    #[must_use]
    pub fn is_refresh_failure(&self) -> bool {
        self.context.get(PHASE_CONTEXT_KEY).map(String::as_str) == Some(PHASE_REFRESH)
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .and_then(ApiErrorResponse::into_message)
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        Self::new(ErrorKind::from_status(status), message).with_status(status)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<capabilities::HttpError> for AppError {
    fn from(e: capabilities::HttpError) -> Self {
        use capabilities::HttpError;

        let kind = match &e {
            HttpError::Timeout { .. } | HttpError::Connection { .. } => ErrorKind::Network,
            HttpError::InvalidResponse { .. } => ErrorKind::Deserialization,
            HttpError::InvalidUrl { .. }
            | HttpError::InvalidHeader { .. }
            | HttpError::BodyTooLarge { .. }
            | HttpError::InvalidRequest { .. }
            | HttpError::Serialization { .. } => ErrorKind::InvalidRequest,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<capabilities::KvError> for AppError {
    fn from(e: capabilities::KvError) -> Self {
        Self::new(ErrorKind::Storage, e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidRequest, e.to_string())
    }
}

/// Error body shape of the backend: `{"error": "..."}`, with `message` accepted
/// as a fallback.
#[derive(Debug, Clone, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiErrorResponse {
    fn into_message(self) -> Option<String> {
        self.error
            .filter(|m| !m.is_empty())
            .or(self.message.filter(|m| !m.is_empty()))
    }
}

pub type AppResult<T> = Result<T, AppError>;
