//! Effects the core relies on from its host: performing HTTP requests and
//! keeping a handful of strings in durable storage.

mod http;
mod kv;
pub mod mock;

#[cfg(feature = "native-transport")]
mod transport;

pub use self::http::{
    ContentType, FilePart, HttpBody, HttpError, HttpHeaders, HttpMethod, HttpRequest,
    HttpResponse, HttpResult, HttpTransport, MultipartForm, QueryParams, ValidatedUrl,
};
pub use self::kv::{validate_key, KeyValueStore, KvError, MemoryStore, SessionKey};

#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteStore;

pub use self::mock::MockTransport;

#[cfg(feature = "native-transport")]
pub use self::transport::ReqwestTransport;

