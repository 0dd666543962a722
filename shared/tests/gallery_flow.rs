use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use photobed_shared::capabilities::{
    HttpRequest, HttpResult, HttpTransport, MockTransport,
};
use photobed_shared::model::{AdminImageQuery, FilterUpdate, UploadFile};
use photobed_shared::stores::Stores;
use photobed_shared::{ApiClient, ClientConfig, KeyValueStore, MemoryStore, SessionEvents};
use serde_json::{json, Value};
use tokio::sync::Notify;

fn stores_over(transport: Arc<dyn HttpTransport>) -> Stores {
    let storage = Arc::new(MemoryStore::new());
    storage.set("token", "jwt").unwrap();
    let client = ApiClient::new(
        &ClientConfig::default(),
        transport,
        storage,
        SessionEvents::new(),
    )
    .unwrap();
    Stores::new(Arc::new(client))
}

fn page(first_id: u64, count: u64, total: u64, page: u32) -> Value {
    let images: Vec<Value> = (first_id..first_id + count)
        .map(|id| json!({"id": id, "file_id": format!("tg-{id}"), "md5_hash": "m"}))
        .collect();
    json!({"images": images, "total": total, "page": page, "page_size": 10})
}

fn query_of(request: &HttpRequest) -> Vec<(String, String)> {
    request.url().query_pairs()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[tokio::test]
async fn second_page_of_user_images() {
    let transport = Arc::new(MockTransport::new());
    let stores = stores_over(transport.clone());
    transport.push_json(200, &page(11, 8, 28, 2));

    let response = stores.image.fetch_user_images(2, 10).await.unwrap();

    assert_eq!(response.page_size, Some(10));
    let state = stores.image.state();
    assert_eq!(state.images.len(), 8);
    assert_eq!(state.total, 28);
    assert_eq!(state.current_page, 2);
    assert_eq!(state.page_size, 10);
    assert!(!state.loading);
    assert_eq!(state.error, None);
    assert_eq!(
        query_of(&transport.last_request().unwrap()),
        pairs(&[("page", "2"), ("page_size", "10")])
    );
}

#[tokio::test]
async fn upload_then_refresh_of_current_page() {
    let transport = Arc::new(MockTransport::new());
    let stores = stores_over(transport.clone());
    transport.push_json(200, &page(1, 10, 10, 1));
    stores.image.fetch_user_images(1, 10).await.unwrap();

    // 1. Upload accepted
    transport.push_json(
        200,
        &json!({"message": "ok", "file_id": "tg-11", "proxy_url": "http://h/proxy/image/tg-11",
                "md5_hash": "m", "existing": false}),
    );
    // 2. Refresh sees the new image
    transport.push_json(200, &page(1, 10, 11, 1));

    let receipt = stores
        .image
        .upload_image(UploadFile::new("sunset.webp", vec![7u8; 32]), true)
        .await
        .unwrap();

    assert_eq!(receipt.file_id, "tg-11");
    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].url().path(), "/api/v1/image/upload");
    assert_eq!(query_of(&requests[2]), pairs(&[("page", "1"), ("page_size", "10")]));
    let state = stores.image.state();
    assert_eq!(state.total, 11);
    assert!(!state.uploading);
    assert!(!state.loading);
}

#[tokio::test]
async fn upload_succeeds_but_refresh_fails() {
    let transport = Arc::new(MockTransport::new());
    let stores = stores_over(transport.clone());
    transport.push_json(200, &json!({"message": "ok", "file_id": "tg-1"}));
    transport.push_json(500, &json!({"error": "list unavailable"}));

    let err = stores
        .image
        .upload_image(UploadFile::new("a.png", vec![1u8]), true)
        .await
        .unwrap_err();

    assert!(err.is_refresh_failure());
    assert_eq!(err.message, "list unavailable");
    let state = stores.image.state();
    assert_eq!(state.error.as_deref(), Some("list unavailable"));
    assert!(!state.uploading);
    assert!(!state.loading);
}

#[tokio::test]
async fn admin_filters_merge_into_listing() {
    let transport = Arc::new(MockTransport::new());
    let stores = stores_over(transport.clone());
    stores.admin.set_filters(FilterUpdate::default().user_id("abc"));
    transport.push_json(200, &json!({"images": [{"id": 1, "user_id": "abc"}], "total": 1, "page": 1}));

    stores
        .admin
        .fetch_all_images(AdminImageQuery::new())
        .await
        .unwrap();

    let request = transport.last_request().unwrap();
    assert_eq!(request.url().path(), "/api/v1/admin/images");
    assert_eq!(
        query_of(&request),
        pairs(&[("page", "1"), ("page_size", "20"), ("user_id", "abc")])
    );
    assert_eq!(stores.admin.state().all_images.len(), 1);
}

#[tokio::test]
async fn every_action_clears_error_when_it_starts() {
    let transport = Arc::new(MockTransport::new());
    let stores = stores_over(transport.clone());
    transport.push_json(500, &json!({"error": "first"}));
    assert!(stores.admin.fetch_stats().await.is_err());
    assert_eq!(stores.admin.state().error.as_deref(), Some("first"));

    let mut watcher = stores.admin.subscribe();
    transport.push_json(200, &json!({"total_images": 1}));
    stores.admin.fetch_stats().await.unwrap();

    assert!(watcher.has_changed().unwrap());
    let state = watcher.borrow_and_update().clone();
    assert_eq!(state.error, None);
    assert!(!state.loading);
}

/// Holds the first request's response until released; later requests pass
/// straight through.
struct HoldFirst {
    inner: MockTransport,
    calls: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl HttpTransport for HoldFirst {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.inner.execute(request).await;
        if n == 0 {
            self.release.notified().await;
        }
        response
    }
}

#[tokio::test]
async fn superseded_fetch_does_not_overwrite_newer_page() {
    let transport = Arc::new(HoldFirst {
        inner: MockTransport::new(),
        calls: AtomicUsize::new(0),
        release: Notify::new(),
    });
    transport.inner.push_json(200, &page(1, 10, 30, 1));
    transport.inner.push_json(200, &page(21, 10, 30, 3));
    let stores = stores_over(transport.clone());

    let image = stores.image.clone();
    let slow = tokio::spawn(async move { image.fetch_user_images(1, 10).await });
    while transport.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    stores.image.fetch_user_images(3, 10).await.unwrap();
    let state = stores.image.state();
    assert_eq!(state.images[0].id.0, 21);
    assert!(state.loading);

    transport.release.notify_one();
    let stale = slow.await.unwrap().unwrap();
    assert_eq!(stale.images[0].id.0, 1);

    let state = stores.image.state();
    assert_eq!(state.images[0].id.0, 21);
    assert_eq!(state.current_page, 3);
    assert!(!state.loading);
}
