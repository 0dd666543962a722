use std::sync::Arc;
use tracing::instrument;

use super::{AUTH_GITHUB_CALLBACK_PATH, AUTH_GITHUB_PATH, AUTH_USER_PATH};
use crate::capabilities::{ContentType, HttpMethod, HttpRequest};
use crate::client::ApiClient;
use crate::model::{CurrentUser, GithubAuthUrl, GithubSession};
use crate::AppResult;

#[derive(Clone)]
pub struct AuthApi {
    client: Arc<ApiClient>,
}

impl AuthApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// The GitHub authorize URL to send the user to.
    #[instrument(skip(self))]
    pub async fn github_auth_url(&self) -> AppResult<GithubAuthUrl> {
        let request = self.json_request(AUTH_GITHUB_PATH)?;
        self.client.send(request).await
    }

    /// Exchanges the OAuth `code` for a session.
    #[instrument(skip(self, code))]
    pub async fn github_callback(&self, code: &str) -> AppResult<GithubSession> {
        let request = self
            .json_request(AUTH_GITHUB_CALLBACK_PATH)?
            .with_query([("code", code)]);
        self.client.send(request).await
    }

    #[instrument(skip(self))]
    pub async fn current_user(&self) -> AppResult<CurrentUser> {
        let request = self.json_request(AUTH_USER_PATH)?;
        self.client.send(request).await
    }

    // Without the Accept header the auth routes answer with redirects.
    fn json_request(&self, path: &str) -> AppResult<HttpRequest> {
        let request = self
            .client
            .request(HttpMethod::Get, path)?
            .with_header("Accept", ContentType::Json.as_str())?;
        Ok(request)
    }
}
