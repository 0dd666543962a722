//! The HTTP client every API call goes through.
//!
//! Outgoing requests pick up the stored bearer token. Responses are unwrapped
//! to their decoded body. A 401 from any endpoint clears the stored
//! credentials and publishes [`SessionEvent::Invalidated`] before the failure
//! reaches the caller; nothing else in the crate performs that side effect.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::capabilities::{
    ContentType, HttpMethod, HttpRequest, HttpTransport, KeyValueStore, MultipartForm,
    QueryParams, SessionKey, ValidatedUrl,
};
use crate::config::ClientConfig;
use crate::event::{SessionEvent, SessionEvents};
use crate::{AppError, AppResult};

pub struct ApiClient {
    base_url: ValidatedUrl,
    timeout: Duration,
    login_route: String,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn KeyValueStore>,
    events: SessionEvents,
}

impl ApiClient {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn KeyValueStore>,
        events: SessionEvents,
    ) -> AppResult<Self> {
        let base_url = ValidatedUrl::new(config.base_url.trim())?;
        debug!(base_url = %base_url, timeout = ?config.timeout, "api client configured");
        Ok(Self {
            base_url,
            timeout: config.timeout,
            login_route: config.login_route.clone(),
            transport,
            store,
            events,
        })
    }

    /// Client over the built-in `reqwest` transport.
    #[cfg(feature = "native-transport")]
    pub fn native(
        config: &ClientConfig,
        store: Arc<dyn KeyValueStore>,
        events: SessionEvents,
    ) -> AppResult<Self> {
        let transport = crate::capabilities::ReqwestTransport::new(config.timeout)?;
        Self::new(config, Arc::new(transport), store, events)
    }

    pub fn base_url(&self) -> &ValidatedUrl {
        &self.base_url
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// A request against `path` carrying the default headers and timeout.
    pub fn request(&self, method: HttpMethod, path: &str) -> AppResult<HttpRequest> {
        let url = self.base_url.join_path(path)?;
        let request = HttpRequest::new(method, url, self.timeout)
            .with_header("Content-Type", ContentType::Json.as_str())?;
        Ok(request)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let request = self.request(HttpMethod::Get, path)?;
        self.send(request).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &QueryParams,
    ) -> AppResult<T> {
        let request = self
            .request(HttpMethod::Get, path)?
            .with_query(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        self.send(request).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> AppResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(HttpMethod::Post, path)?.with_json(body)?;
        self.send(request).await
    }

    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: MultipartForm,
    ) -> AppResult<T> {
        let request = self.request(HttpMethod::Post, path)?.with_multipart(form)?;
        self.send(request).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let request = self.request(HttpMethod::Delete, path)?;
        self.send(request).await
    }

    /// Runs `request` through both interceptors and decodes the body.
    pub async fn send<T: DeserializeOwned>(&self, request: HttpRequest) -> AppResult<T> {
        let request = self.authorize(request)?;
        let method = request.method();
        let path = request.url().path().to_string();

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%method, path = %path, error = %e, "request failed before a response arrived");
                return Err(e.into());
            }
        };

        if response.is_success() {
            return response.json::<T>().map_err(AppError::from);
        }

        let status = response.status();
        if status == 401 {
            self.invalidate_session();
        }

        let err = AppError::from_http_status(status, Some(response.body()));
        warn!(%method, path = %path, status, message = %err.message, "request rejected");
        Err(err)
    }

    fn authorize(&self, mut request: HttpRequest) -> AppResult<HttpRequest> {
        let token = match self.store.get(SessionKey::Token.as_str()) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "token lookup failed; sending unauthenticated");
                None
            }
        };

        match token.filter(|t| !t.is_empty()) {
            Some(token) => {
                request
                    .headers_mut()
                    .insert("Authorization", format!("Bearer {token}"))?;
            }
            None => request.headers_mut().remove("Authorization"),
        }
        Ok(request)
    }

    fn invalidate_session(&self) {
        for key in [SessionKey::Token, SessionKey::UserId] {
            if let Err(e) = self.store.delete(key.as_str()) {
                warn!(key = key.as_str(), error = %e, "failed to clear stored credential");
            }
        }
        let delivered = self.events.publish(SessionEvent::Invalidated {
            redirect_to: self.login_route.clone(),
        });
        warn!(subscribers = delivered, "session invalidated by 401 response");
    }
}
