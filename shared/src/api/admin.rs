use std::sync::Arc;
use tracing::instrument;

use super::{ADMIN_IMAGES_PATH, ADMIN_STATS_PATH};
use crate::capabilities::QueryParams;
use crate::client::ApiClient;
use crate::model::{ImagePage, Stats};
use crate::AppResult;

#[derive(Clone)]
pub struct AdminApi {
    client: Arc<ApiClient>,
}

impl AdminApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// Lists images across all users; `params` are sent as given, in order.
    #[instrument(skip(self))]
    pub async fn list_images(&self, params: &QueryParams) -> AppResult<ImagePage> {
        self.client.get_with_query(ADMIN_IMAGES_PATH, params).await
    }

    #[instrument(skip(self))]
    pub async fn stats(&self) -> AppResult<Stats> {
        self.client.get(ADMIN_STATS_PATH).await
    }
}
