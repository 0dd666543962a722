use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use super::{Flight, Generation, Track};
use crate::api::ImageApi;
use crate::client::ApiClient;
use crate::event::ImageId;
use crate::model::{Deleted, Image, ImagePage, UploadFile, UploadReceipt};
use crate::{AppResult, DEFAULT_PAGE_SIZE, FIRST_PAGE, PHASE_CONTEXT_KEY, PHASE_REFRESH};

#[derive(Clone, Debug)]
pub struct ImageState {
    pub images: Vec<Image>,
    pub total: u64,
    pub current_page: u32,
    pub page_size: u32,
    pub loading: bool,
    pub uploading: bool,
    pub error: Option<String>,
    loads: Flight,
    uploads: Flight,
    list: Generation,
}

impl Default for ImageState {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            total: 0,
            current_page: FIRST_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
            loading: false,
            uploading: false,
            error: None,
            loads: Flight::default(),
            uploads: Flight::default(),
            list: Generation::default(),
        }
    }
}

impl ImageState {
    fn loads(&mut self) -> Track<'_> {
        Track {
            flight: &mut self.loads,
            busy: &mut self.loading,
            error: &mut self.error,
        }
    }

    fn uploads(&mut self) -> Track<'_> {
        Track {
            flight: &mut self.uploads,
            busy: &mut self.uploading,
            error: &mut self.error,
        }
    }
}

/// The signed-in user's own images, one page at a time.
pub struct ImageStore {
    api: ImageApi,
    state: watch::Sender<ImageState>,
}

impl ImageStore {
    pub fn new(client: Arc<ApiClient>) -> Self {
        let (state, _) = watch::channel(ImageState::default());
        Self {
            api: ImageApi::new(client),
            state,
        }
    }

    pub fn state(&self) -> ImageState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ImageState> {
        self.state.subscribe()
    }

    /// Loads one page. The requested page and size become current before
    /// the request is sent, whatever its outcome.
    #[instrument(skip(self))]
    pub async fn fetch_user_images(&self, page: u32, page_size: u32) -> AppResult<ImagePage> {
        let mut ticket = 0;
        self.state.send_modify(|s| {
            s.current_page = page;
            s.page_size = page_size;
            ticket = s.list.issue();
            s.loads().begin();
        });

        let result = self.api.list(page, page_size).await;

        self.state.send_modify(|s| {
            if let Ok(body) = &result {
                if s.list.is_current(ticket) {
                    s.images.clone_from(&body.images);
                    s.total = body.total;
                } else {
                    debug!(page, "dropping superseded image page");
                }
            }
            s.loads().finish(&result);
        });
        result
    }

    /// Uploads `file`; with `auto_refresh` the current page is reloaded
    /// afterwards and a failed reload fails the whole call.
    #[instrument(skip(self, file), fields(file_name = %file.file_name))]
    pub async fn upload_image(
        &self,
        file: UploadFile,
        auto_refresh: bool,
    ) -> AppResult<UploadReceipt> {
        self.state.send_modify(|s| s.uploads().begin());
        let result = self.upload_then_refresh(file, auto_refresh).await;
        self.state.send_modify(|s| s.uploads().finish(&result));
        result
    }

    /// Deletes one image and reloads the current page.
    #[instrument(skip(self))]
    pub async fn delete_image(&self, id: ImageId) -> AppResult<Deleted> {
        self.state.send_modify(|s| s.loads().begin());
        let result = self.delete_then_refresh(id).await;
        self.state.send_modify(|s| s.loads().finish(&result));
        result
    }

    async fn upload_then_refresh(
        &self,
        file: UploadFile,
        auto_refresh: bool,
    ) -> AppResult<UploadReceipt> {
        let receipt = self.api.upload(file).await?;
        info!(file_id = %receipt.file_id, existing = receipt.existing, "upload accepted");
        if auto_refresh {
            self.refresh().await?;
        }
        Ok(receipt)
    }

    async fn delete_then_refresh(&self, id: ImageId) -> AppResult<Deleted> {
        self.api.delete(id).await?;
        info!(%id, "image deleted");
        self.refresh().await?;
        Ok(Deleted { id })
    }

    async fn refresh(&self) -> AppResult<ImagePage> {
        let (page, page_size) = {
            let s = self.state.borrow();
            (s.current_page, s.page_size)
        };
        self.fetch_user_images(page, page_size)
            .await
            .map_err(|e| e.with_context(PHASE_CONTEXT_KEY, PHASE_REFRESH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{HttpMethod, MemoryStore, MockTransport};
    use crate::config::ClientConfig;
    use crate::event::SessionEvents;
    use serde_json::{json, Value};

    fn fixture() -> (ImageStore, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let client = ApiClient::new(
            &ClientConfig::default(),
            transport.clone(),
            Arc::new(MemoryStore::new()),
            SessionEvents::new(),
        )
        .unwrap();
        (ImageStore::new(Arc::new(client)), transport)
    }

    fn page_json(ids: std::ops::Range<u64>, total: u64, page: u32) -> Value {
        let images: Vec<Value> = ids
            .map(|id| json!({"id": id, "file_id": format!("f{id}")}))
            .collect();
        json!({"images": images, "total": total, "page": page})
    }

    #[test]
    fn starts_on_first_page() {
        let (store, _) = fixture();
        let state = store.state();
        assert_eq!(state.current_page, 1);
        assert_eq!(state.page_size, 10);
        assert!(state.images.is_empty());
        assert!(!state.loading && !state.uploading);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_eager_page_and_old_images() {
        let (store, transport) = fixture();
        transport.push_json(200, &page_json(1..4, 3, 1));
        store.fetch_user_images(1, 10).await.unwrap();

        transport.push_json(500, &json!({"error": "db down"}));
        let err = store.fetch_user_images(4, 5).await.unwrap_err();

        assert_eq!(err.message, "db down");
        let state = store.state();
        assert_eq!(state.current_page, 4);
        assert_eq!(state.page_size, 5);
        assert_eq!(state.images.len(), 3);
        assert_eq!(state.error.as_deref(), Some("db down"));
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn upload_without_refresh_sends_one_request() {
        let (store, transport) = fixture();
        transport.push_json(200, &json!({"message": "ok", "file_id": "f9", "existing": true}));

        let receipt = store
            .upload_image(UploadFile::new("a.gif", vec![0u8; 4]), false)
            .await
            .unwrap();

        assert!(receipt.existing);
        assert_eq!(transport.requests().len(), 1);
        let state = store.state();
        assert!(!state.uploading);
        assert!(!state.loading);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn failed_upload_does_not_refresh() {
        let (store, transport) = fixture();
        transport.push_json(400, &json!({"error": "too large"}));

        let err = store
            .upload_image(UploadFile::new("a.png", vec![0u8; 4]), true)
            .await
            .unwrap_err();

        assert!(!err.is_refresh_failure());
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(store.state().error.as_deref(), Some("too large"));
        assert!(!store.state().uploading);
    }

    #[tokio::test]
    async fn delete_refreshes_current_page() {
        let (store, transport) = fixture();
        transport.push_json(200, &page_json(1..11, 12, 2));
        store.fetch_user_images(2, 10).await.unwrap();

        transport.push_json(200, &json!({"message": "deleted"}));
        transport.push_json(200, &page_json(1..10, 11, 2));

        let deleted = store.delete_image(ImageId(5)).await.unwrap();

        assert_eq!(deleted, Deleted { id: ImageId(5) });
        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].method(), HttpMethod::Delete);
        assert_eq!(requests[1].url().path(), "/api/v1/image/5");
        assert_eq!(
            requests[2].url().query_pairs(),
            vec![
                ("page".to_string(), "2".to_string()),
                ("page_size".to_string(), "10".to_string())
            ]
        );
        let state = store.state();
        assert_eq!(state.images.len(), 9);
        assert_eq!(state.total, 11);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn failed_delete_skips_refresh() {
        let (store, transport) = fixture();
        transport.push_json(403, &json!({"error": "not yours"}));

        let err = store.delete_image(ImageId(1)).await.unwrap_err();

        assert_eq!(err.message, "not yours");
        assert!(!err.is_refresh_failure());
        assert_eq!(transport.requests().len(), 1);
        assert!(!store.state().loading);
    }

    #[tokio::test]
    async fn delete_refresh_failure_is_tagged() {
        let (store, transport) = fixture();
        transport.push_json(200, &json!({"message": "deleted"}));
        transport.push_json(500, &json!({"error": "list failed"}));

        let err = store.delete_image(ImageId(1)).await.unwrap_err();

        assert!(err.is_refresh_failure());
        assert_eq!(store.state().error.as_deref(), Some("list failed"));
    }
}
