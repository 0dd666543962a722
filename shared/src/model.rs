use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

use crate::capabilities::QueryParams;
use crate::event::{ImageId, Secret, UserId};
use crate::{AppError, AppResult, ErrorKind, FIRST_PAGE};

/// The backend serializes empty Go slices as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn first_page() -> u32 {
    FIRST_PAGE
}

// --- Auth ---

/// Server-side user record. Only `is_admin` is interpreted locally.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub is_admin: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn username(&self) -> Option<&str> {
        self.extra.get("username").and_then(Value::as_str)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CurrentUser {
    #[serde(default)]
    pub user: Option<UserProfile>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GithubAuthUrl {
    pub url: String,
}

/// JSON answer of the OAuth callback when asked with `Accept: application/json`.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GithubSession {
    pub token: Secret,
    pub user_id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

// The redirect URL embeds the token as a query parameter.
impl fmt::Debug for GithubSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubSession")
            .field("token", &self.token)
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("redirect_url", &self.redirect_url.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// --- Images ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Image {
    pub id: ImageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Admin listings only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Admin listings only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_ip: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Image {
    pub fn new(id: impl Into<ImageId>) -> Self {
        Self {
            id: id.into(),
            file_id: None,
            md5_hash: None,
            proxy_url: None,
            created_at: None,
            user_id: None,
            upload_ip: None,
            extra: Map::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImagePage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<Image>,
    #[serde(default)]
    pub total: u64,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default)]
    pub md5_hash: String,
    /// True when the same bytes were already bound to this user or stored.
    #[serde(default)]
    pub existing: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteAck {
    #[serde(default)]
    pub message: String,
}

/// Returned by a delete once the server has removed the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deleted {
    pub id: ImageId,
}

/// A file to send as the `image` multipart part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let content_type = mime_for(&file_name).map(str::to_string);
        Self {
            file_name,
            content_type,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                AppError::new(
                    ErrorKind::InvalidRequest,
                    format!("not a file path: {}", path.display()),
                )
            })?
            .to_string();
        let data = std::fs::read(path).map_err(|e| {
            AppError::new(ErrorKind::Storage, format!("failed to read {}: {e}", path.display()))
        })?;
        Ok(Self::new(file_name, data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn mime_for(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

// --- Admin ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserRanking {
    #[serde(rename = "UserID", alias = "user_id")]
    pub user_id: UserId,
    #[serde(rename = "Count", alias = "count")]
    pub count: u64,
}

/// Aggregate counters from the admin endpoint. Unknown fields are kept.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Stats {
    #[serde(default)]
    pub total_images: u64,
    #[serde(default)]
    pub today_images: u64,
    #[serde(default)]
    pub user_count: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user_rankings: Vec<UserRanking>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Stats {
    pub fn top_uploader(&self) -> Option<&UserRanking> {
        self.user_rankings.iter().max_by_key(|r| r.count)
    }
}

/// Admin listing filters. Empty strings mean "no filter".
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Filters {
    pub user_id: String,
    pub upload_ip: String,
}

impl Filters {
    /// Shallow merge: only the fields present in `update` change.
    pub fn merge(&mut self, update: FilterUpdate) {
        if let Some(user_id) = update.user_id {
            self.user_id = user_id;
        }
        if let Some(upload_ip) = update.upload_ip {
            self.upload_ip = upload_ip;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_empty() && self.upload_ip.is_empty()
    }

    pub(crate) fn append_to(&self, query: &mut QueryParams) {
        if !self.user_id.is_empty() {
            upsert(query, "user_id", &self.user_id);
        }
        if !self.upload_ip.is_empty() {
            upsert(query, "upload_ip", &self.upload_ip);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterUpdate {
    pub user_id: Option<String>,
    pub upload_ip: Option<String>,
}

impl FilterUpdate {
    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn upload_ip(mut self, upload_ip: impl Into<String>) -> Self {
        self.upload_ip = Some(upload_ip.into());
        self
    }
}

/// Per-call overrides for the admin listing. Zero and empty values fall back
/// to the container's page, page size and filters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdminImageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub user_id: Option<String>,
    pub upload_ip: Option<String>,
}

impl AdminImageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn upload_ip(mut self, upload_ip: impl Into<String>) -> Self {
        self.upload_ip = Some(upload_ip.into());
        self
    }

    /// Query for a listing given the container's current page, size and filters.
    pub fn build(&self, current_page: u32, page_size: u32, filters: &Filters) -> QueryParams {
        let page = self.page.filter(|p| *p > 0).unwrap_or(current_page);
        let size = self.page_size.filter(|s| *s > 0).unwrap_or(page_size);

        let mut query = vec![
            ("page".to_string(), page.to_string()),
            ("page_size".to_string(), size.to_string()),
        ];
        filters.append_to(&mut query);

        if let Some(user_id) = self.user_id.as_deref().filter(|v| !v.is_empty()) {
            upsert(&mut query, "user_id", user_id);
        }
        if let Some(upload_ip) = self.upload_ip.as_deref().filter(|v| !v.is_empty()) {
            upsert(&mut query, "upload_ip", upload_ip);
        }
        query
    }
}

fn upsert(query: &mut QueryParams, key: &str, value: &str) {
    match query.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => query.push((key.to_string(), value.to_string())),
    }
}
