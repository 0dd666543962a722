//! Observable state containers.
//!
//! Each container keeps its state in a `tokio::sync::watch` channel: actions
//! mutate it with `send_modify`, views read snapshots or subscribe for change
//! notification. Every action clears `error` when it starts, records the
//! failure message when it fails, and hands the failure back to the caller.

mod admin;
mod image;
mod user;

use std::sync::Arc;

use crate::client::ApiClient;
use crate::AppResult;

pub use self::admin::{AdminState, AdminStore};
pub use self::image::{ImageState, ImageStore};
pub use self::user::{UserState, UserStore};

/// Count of in-flight actions sharing one busy flag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Flight {
    pending: u32,
}

impl Flight {
    pub(crate) fn enter(&mut self) {
        self.pending = self.pending.saturating_add(1);
    }

    pub(crate) fn leave(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    pub(crate) fn is_idle(self) -> bool {
        self.pending == 0
    }
}

/// Orders list fetches: only the most recently started fetch may write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Generation(u64);

impl Generation {
    pub(crate) fn issue(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }

    pub(crate) fn is_current(self, ticket: u64) -> bool {
        self.0 == ticket
    }
}

/// The fields one action touches for its bookkeeping.
pub(crate) struct Track<'a> {
    pub(crate) flight: &'a mut Flight,
    pub(crate) busy: &'a mut bool,
    pub(crate) error: &'a mut Option<String>,
}

impl Track<'_> {
    pub(crate) fn begin(self) {
        self.flight.enter();
        *self.busy = true;
        *self.error = None;
    }

    pub(crate) fn finish<T>(self, result: &AppResult<T>) {
        self.flight.leave();
        *self.busy = !self.flight.is_idle();
        if let Err(e) = result {
            *self.error = Some(e.message.clone());
        }
    }
}

/// The three containers over one client.
#[derive(Clone)]
pub struct Stores {
    pub user: Arc<UserStore>,
    pub image: Arc<ImageStore>,
    pub admin: Arc<AdminStore>,
}

impl Stores {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            user: Arc::new(UserStore::new(client.clone())),
            image: Arc::new(ImageStore::new(client.clone())),
            admin: Arc::new(AdminStore::new(client)),
        }
    }
}
