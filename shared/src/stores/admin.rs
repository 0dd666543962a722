use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, instrument};

use super::{Flight, Generation, Track};
use crate::api::AdminApi;
use crate::client::ApiClient;
use crate::model::{AdminImageQuery, FilterUpdate, Filters, Image, ImagePage, Stats};
use crate::{AppResult, DEFAULT_ADMIN_PAGE_SIZE, FIRST_PAGE};

#[derive(Clone, Debug)]
pub struct AdminState {
    pub all_images: Vec<Image>,
    pub total: u64,
    pub current_page: u32,
    pub page_size: u32,
    pub stats: Option<Stats>,
    pub loading: bool,
    pub error: Option<String>,
    pub filters: Filters,
    flight: Flight,
    list: Generation,
}

impl Default for AdminState {
    fn default() -> Self {
        Self {
            all_images: Vec::new(),
            total: 0,
            current_page: FIRST_PAGE,
            page_size: DEFAULT_ADMIN_PAGE_SIZE,
            stats: None,
            loading: false,
            error: None,
            filters: Filters::default(),
            flight: Flight::default(),
            list: Generation::default(),
        }
    }
}

impl AdminState {
    fn track(&mut self) -> Track<'_> {
        Track {
            flight: &mut self.flight,
            busy: &mut self.loading,
            error: &mut self.error,
        }
    }
}

/// Every user's images plus aggregate statistics, for administrators.
pub struct AdminStore {
    api: AdminApi,
    state: watch::Sender<AdminState>,
}

impl AdminStore {
    pub fn new(client: Arc<ApiClient>) -> Self {
        let (state, _) = watch::channel(AdminState::default());
        Self {
            api: AdminApi::new(client),
            state,
        }
    }

    pub fn state(&self) -> AdminState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AdminState> {
        self.state.subscribe()
    }

    pub fn filters(&self) -> Filters {
        self.state.borrow().filters.clone()
    }

    /// Lists images using the current page, size and filters, with any
    /// overrides in `params` taking precedence.
    #[instrument(skip(self))]
    pub async fn fetch_all_images(&self, params: AdminImageQuery) -> AppResult<ImagePage> {
        let mut query = Vec::new();
        let mut ticket = 0;
        self.state.send_modify(|s| {
            query = params.build(s.current_page, s.page_size, &s.filters);
            ticket = s.list.issue();
            s.track().begin();
        });

        let result = self.api.list_images(&query).await;

        self.state.send_modify(|s| {
            if let Ok(body) = &result {
                if s.list.is_current(ticket) {
                    s.all_images.clone_from(&body.images);
                    s.total = body.total;
                    s.current_page = body.page;
                } else {
                    debug!(page = body.page, "dropping superseded admin page");
                }
            }
            s.track().finish(&result);
        });
        result
    }

    #[instrument(skip(self))]
    pub async fn fetch_stats(&self) -> AppResult<Stats> {
        self.state.send_modify(|s| s.track().begin());
        let result = self.api.stats().await;
        self.state.send_modify(|s| {
            if let Ok(stats) = &result {
                s.stats = Some(stats.clone());
            }
            s.track().finish(&result);
        });
        result
    }

    /// Merges `update` into the filters. Takes effect on the next fetch.
    pub fn set_filters(&self, update: FilterUpdate) {
        self.state.send_modify(|s| s.filters.merge(update));
    }

    pub fn reset_filters(&self) {
        self.state.send_modify(|s| s.filters = Filters::default());
    }
}
