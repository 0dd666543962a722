use std::sync::Arc;
use tracing::{debug, instrument};

use super::{IMAGE_LIST_PATH, IMAGE_PATH, IMAGE_UPLOAD_PATH};
use crate::capabilities::MultipartForm;
use crate::client::ApiClient;
use crate::event::ImageId;
use crate::model::{DeleteAck, ImagePage, UploadFile, UploadReceipt};
use crate::{AppResult, UPLOAD_FIELD};

#[derive(Clone)]
pub struct ImageApi {
    client: Arc<ApiClient>,
}

impl ImageApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    #[instrument(skip(self, file), fields(file_name = %file.file_name, size = file.len()))]
    pub async fn upload(&self, file: UploadFile) -> AppResult<UploadReceipt> {
        let form = MultipartForm::new().file(
            UPLOAD_FIELD,
            file.file_name,
            file.content_type,
            file.data,
        );
        let receipt: UploadReceipt = self.client.post_multipart(IMAGE_UPLOAD_PATH, form).await?;
        debug!(file_id = %receipt.file_id, existing = receipt.existing, "image uploaded");
        Ok(receipt)
    }

    /// One page of the caller's own images. Pages are 1-indexed.
    #[instrument(skip(self))]
    pub async fn list(&self, page: u32, page_size: u32) -> AppResult<ImagePage> {
        let query = vec![
            ("page".to_string(), page.to_string()),
            ("page_size".to_string(), page_size.to_string()),
        ];
        self.client.get_with_query(IMAGE_LIST_PATH, &query).await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: ImageId) -> AppResult<DeleteAck> {
        self.client.delete(&format!("{IMAGE_PATH}/{id}")).await
    }
}
