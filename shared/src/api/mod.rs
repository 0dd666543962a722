//! Typed request builders, one group per backend route prefix.
//!
//! The builders hold no state of their own. Every call goes through the
//! shared [`ApiClient`], so bearer injection and 401 handling apply
//! uniformly; failures reach the caller unchanged.

mod admin;
mod auth;
mod image;

use std::sync::Arc;

use crate::client::ApiClient;

pub use self::admin::AdminApi;
pub use self::auth::AuthApi;
pub use self::image::ImageApi;

pub const AUTH_GITHUB_PATH: &str = "/api/v1/auth/github";
pub const AUTH_GITHUB_CALLBACK_PATH: &str = "/api/v1/auth/github/callback";
pub const AUTH_USER_PATH: &str = "/api/v1/auth/user";
pub const IMAGE_UPLOAD_PATH: &str = "/api/v1/image/upload";
pub const IMAGE_LIST_PATH: &str = "/api/v1/image/list";
pub const IMAGE_PATH: &str = "/api/v1/image";
pub const ADMIN_IMAGES_PATH: &str = "/api/v1/admin/images";
pub const ADMIN_STATS_PATH: &str = "/api/v1/admin/stats";

#[derive(Clone)]
pub struct Api {
    pub auth: AuthApi,
    pub image: ImageApi,
    pub admin: AdminApi,
}

impl Api {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            auth: AuthApi::new(client.clone()),
            image: ImageApi::new(client.clone()),
            admin: AdminApi::new(client),
        }
    }
}
