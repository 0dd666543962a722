use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::{Flight, Track};
use crate::api::AuthApi;
use crate::capabilities::{KeyValueStore, SessionKey};
use crate::client::ApiClient;
use crate::event::{Secret, SessionEvent, SessionEvents, UserId};
use crate::model::{GithubAuthUrl, GithubSession, UserProfile};
use crate::AppResult;

#[derive(Clone, Debug, Default)]
pub struct UserState {
    pub token: Secret,
    pub user_id: UserId,
    pub username: String,
    pub user_info: Option<UserProfile>,
    pub loading: bool,
    pub error: Option<String>,
    flight: Flight,
}

impl UserState {
    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn is_admin(&self) -> bool {
        self.user_info.as_ref().is_some_and(|u| u.is_admin)
    }

    fn track(&mut self) -> Track<'_> {
        Track {
            flight: &mut self.flight,
            busy: &mut self.loading,
            error: &mut self.error,
        }
    }

    fn restore(store: &dyn KeyValueStore) -> Self {
        let read = |key: SessionKey| match store.get(key.as_str()) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "failed to restore session field");
                String::new()
            }
        };
        Self {
            token: Secret::new(read(SessionKey::Token)),
            user_id: UserId::new(read(SessionKey::UserId)),
            username: read(SessionKey::Username),
            ..Self::default()
        }
    }
}

/// Session state: the token, who it belongs to, and the loaded profile.
pub struct UserStore {
    auth: AuthApi,
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<UserState>,
}

impl UserStore {
    /// Starts from whatever session the key-value store still holds.
    pub fn new(client: Arc<ApiClient>) -> Self {
        let store = client.store().clone();
        let restored = UserState::restore(store.as_ref());
        if restored.is_authenticated() {
            debug!(user_id = %restored.user_id, "session restored");
        }
        let (state, _) = watch::channel(restored);
        Self {
            auth: AuthApi::new(client),
            store,
            state,
        }
    }

    pub fn state(&self) -> UserState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UserState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_admin(&self) -> bool {
        self.state.borrow().is_admin()
    }

    /// Replaces the in-memory session and writes it through to storage.
    /// An empty `token` or `user_id` deletes its stored key, so no stale
    /// bearer outlives it. A missing or empty `username` leaves the stored
    /// one untouched. Every key is attempted; the first storage failure is
    /// returned.
    pub fn set_auth(&self, token: &str, user_id: &str, username: Option<&str>) -> AppResult<()> {
        let username = username.unwrap_or_default();
        self.state.send_modify(|s| {
            s.token = Secret::new(token);
            s.user_id = UserId::new(user_id);
            s.username = username.to_string();
        });

        let mut first_err = None;
        for (key, value) in [(SessionKey::Token, token), (SessionKey::UserId, user_id)] {
            let written = if value.is_empty() {
                self.store.delete(key.as_str())
            } else {
                self.store.set(key.as_str(), value)
            };
            if let Err(e) = written {
                warn!(key = key.as_str(), error = %e, "failed to store session key");
                first_err.get_or_insert(e);
            }
        }
        if !username.is_empty() {
            if let Err(e) = self.store.set(SessionKey::Username.as_str(), username) {
                warn!(key = SessionKey::Username.as_str(), error = %e, "failed to store session key");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => {
                info!(user_id, "session stored");
                Ok(())
            }
        }
    }

    /// Empties the session in memory and in storage. Every key is attempted;
    /// the first storage failure is returned.
    pub fn clear_auth(&self) -> AppResult<()> {
        self.state.send_modify(|s| {
            s.token = Secret::default();
            s.user_id = UserId::default();
            s.username.clear();
            s.user_info = None;
        });

        let mut first_err = None;
        for key in SessionKey::ALL {
            if let Err(e) = self.store.delete(key.as_str()) {
                warn!(key = key.as_str(), error = %e, "failed to delete session key");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn logout(&self) -> AppResult<()> {
        info!("logout");
        self.clear_auth()
    }

    /// Mirrors a 401 invalidation into memory. The client has already removed
    /// the stored token and user id; the username is kept as storage keeps it.
    pub fn sync_invalidated(&self) {
        self.state.send_modify(|s| {
            s.token = Secret::default();
            s.user_id = UserId::default();
            s.user_info = None;
        });
    }

    /// Applies [`sync_invalidated`](Self::sync_invalidated) for every
    /// invalidation published on `events`. The task ends once this store is
    /// dropped or the hub closes.
    pub fn spawn_invalidation_listener(
        self: &Arc<Self>,
        events: &SessionEvents,
    ) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::Invalidated { redirect_to }) => {
                        let Some(store) = store.upgrade() else { break };
                        debug!(redirect_to = %redirect_to, "clearing in-memory session");
                        store.sync_invalidated();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session events lagged");
                        if let Some(store) = store.upgrade() {
                            store.sync_invalidated();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    #[instrument(skip(self))]
    pub async fn fetch_user_info(&self) -> AppResult<Option<UserProfile>> {
        self.state.send_modify(|s| s.track().begin());
        let result = self.auth.current_user().await.map(|current| current.user);
        self.state.send_modify(|s| {
            if let Ok(user) = &result {
                s.user_info.clone_from(user);
            }
            s.track().finish(&result);
        });
        result
    }

    #[instrument(skip(self))]
    pub async fn github_auth_url(&self) -> AppResult<GithubAuthUrl> {
        self.state.send_modify(|s| s.track().begin());
        let result = self.auth.github_auth_url().await;
        self.state.send_modify(|s| s.track().finish(&result));
        result
    }

    /// Exchanges an OAuth `code` and stores the resulting session.
    #[instrument(skip(self, code))]
    pub async fn complete_github_login(&self, code: &str) -> AppResult<GithubSession> {
        self.state.send_modify(|s| s.track().begin());
        let result = match self.auth.github_callback(code).await {
            Ok(session) => self
                .set_auth(
                    session.token.expose(),
                    session.user_id.as_str(),
                    Some(session.username.as_str()),
                )
                .map(|()| session),
            Err(e) => Err(e),
        };
        self.state.send_modify(|s| s.track().finish(&result));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{KvError, MemoryStore, MockTransport};
    use crate::config::ClientConfig;
    use crate::ErrorKind;
    use proptest::prelude::*;
    use serde_json::json;

    fn fixture_with(store: Arc<dyn KeyValueStore>) -> (UserStore, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let client = ApiClient::new(
            &ClientConfig::default(),
            transport.clone(),
            store,
            SessionEvents::new(),
        )
        .unwrap();
        (UserStore::new(Arc::new(client)), transport)
    }

    fn fixture() -> (UserStore, Arc<MemoryStore>, Arc<MockTransport>) {
        let store = Arc::new(MemoryStore::new());
        let (user, transport) = fixture_with(store.clone());
        (user, store, transport)
    }

    #[test]
    fn set_auth_persists_all_fields() {
        let (user, store, _) = fixture();
        user.set_auth("t", "u", Some("n")).unwrap();

        assert_eq!(store.get("token").unwrap().as_deref(), Some("t"));
        assert_eq!(store.get("user_id").unwrap().as_deref(), Some("u"));
        assert_eq!(store.get("username").unwrap().as_deref(), Some("n"));
        let state = user.state();
        assert_eq!(state.token.expose(), "t");
        assert_eq!(state.user_id.as_str(), "u");
        assert_eq!(state.username, "n");
        assert!(user.is_authenticated());
    }

    #[test]
    fn omitted_username_is_not_stored() {
        let (user, store, _) = fixture();
        user.set_auth("t", "u", None).unwrap();
        assert_eq!(store.get("username").unwrap(), None);
        assert_eq!(user.state().username, "");
    }

    #[test]
    fn omitted_username_keeps_previous_stored_value() {
        let (user, store, _) = fixture();
        user.set_auth("t1", "u", Some("octocat")).unwrap();
        user.set_auth("t2", "u", None).unwrap();
        assert_eq!(store.get("username").unwrap().as_deref(), Some("octocat"));
        assert_eq!(store.get("token").unwrap().as_deref(), Some("t2"));
    }

    #[test]
    fn empty_credentials_remove_stored_keys() {
        let (user, store, _) = fixture();
        user.set_auth("old-jwt", "u1", Some("n")).unwrap();

        user.set_auth("", "u2", None).unwrap();
        assert_eq!(store.get("token").unwrap(), None);
        assert_eq!(store.get("user_id").unwrap().as_deref(), Some("u2"));
        assert_eq!(store.get("username").unwrap().as_deref(), Some("n"));
        assert!(!user.is_authenticated());

        user.set_auth("t3", "", None).unwrap();
        assert_eq!(store.get("token").unwrap().as_deref(), Some("t3"));
        assert_eq!(store.get("user_id").unwrap(), None);
        assert!(user.state().user_id.is_empty());
    }

    #[tokio::test]
    async fn emptied_token_stops_the_bearer() {
        let (user, _, transport) = fixture();
        user.set_auth("old-jwt", "u1", Some("n")).unwrap();
        user.set_auth("", "u", None).unwrap();
        transport.push_json(200, &json!({"user": null}));

        user.fetch_user_info().await.unwrap();

        let request = transport.last_request().unwrap();
        assert!(!request.headers().contains("authorization"));
    }

    #[test]
    fn clear_auth_removes_everything() {
        let (user, store, _) = fixture();
        user.set_auth("t", "u", Some("n")).unwrap();
        user.logout().unwrap();

        for key in SessionKey::ALL {
            assert_eq!(store.get(key.as_str()).unwrap(), None);
        }
        let state = user.state();
        assert!(state.token.is_empty());
        assert!(state.user_id.is_empty());
        assert!(state.username.is_empty());
        assert!(state.user_info.is_none());
        assert!(!user.is_authenticated());
    }

    #[test]
    fn session_is_restored_from_storage() {
        let store = Arc::new(MemoryStore::new());
        store.set("token", "saved").unwrap();
        store.set("user_id", "7").unwrap();
        store.set("username", "octocat").unwrap();

        let (user, _) = fixture_with(store);

        let state = user.state();
        assert_eq!(state.token.expose(), "saved");
        assert_eq!(state.user_id.as_str(), "7");
        assert_eq!(state.username, "octocat");
        assert!(state.is_authenticated());
        assert!(!state.loading);
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _: &str) -> Result<Option<String>, KvError> {
            Err(KvError::Backend {
                message: "disk gone".into(),
            })
        }
        fn set(&self, _: &str, _: &str) -> Result<(), KvError> {
            Err(KvError::Backend {
                message: "disk gone".into(),
            })
        }
        fn delete(&self, _: &str) -> Result<(), KvError> {
            Err(KvError::Backend {
                message: "disk gone".into(),
            })
        }
    }

    #[test]
    fn storage_failures_surface_but_memory_is_updated() {
        let (user, _) = fixture_with(Arc::new(BrokenStore));
        assert!(!user.is_authenticated());

        let err = user.set_auth("t", "u", None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
        assert!(user.is_authenticated());

        let err = user.clear_auth().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
        assert!(!user.is_authenticated());
    }

    #[tokio::test]
    async fn fetch_user_info_stores_profile() {
        let (user, _, transport) = fixture();
        transport.push_json(200, &json!({"user": {"is_admin": true, "username": "root"}}));

        let profile = user.fetch_user_info().await.unwrap().unwrap();

        assert!(profile.is_admin);
        let state = user.state();
        assert!(state.is_admin());
        assert!(!state.loading);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn fetch_user_info_failure_records_message() {
        let (user, _, transport) = fixture();
        transport.push_json(500, &json!({"error": "db down"}));

        let err = user.fetch_user_info().await.unwrap_err();

        assert_eq!(err.message, "db down");
        let state = user.state();
        assert_eq!(state.error.as_deref(), Some("db down"));
        assert!(!state.loading);
        assert!(!state.is_admin());
    }

    #[tokio::test]
    async fn github_login_stores_returned_session() {
        let (user, store, transport) = fixture();
        transport.push_json(
            200,
            &json!({"token": "jwt", "user_id": "42", "username": "octocat",
                    "redirect_url": "http://app/cb?token=jwt"}),
        );

        let session = user.complete_github_login("code-1").await.unwrap();

        assert_eq!(session.user_id.as_str(), "42");
        assert_eq!(store.get("token").unwrap().as_deref(), Some("jwt"));
        assert_eq!(store.get("username").unwrap().as_deref(), Some("octocat"));
        assert!(user.is_authenticated());
        assert!(!user.state().loading);
    }

    #[tokio::test]
    async fn github_auth_url_failure_leaves_session_alone() {
        let (user, _, transport) = fixture();
        user.set_auth("t", "u", None).unwrap();
        transport.push_json(502, &json!({}));

        let err = user.github_auth_url().await.unwrap_err();

        assert_eq!(err.message, "HTTP error: 502");
        assert!(user.is_authenticated());
        assert_eq!(user.state().error.as_deref(), Some("HTTP error: 502"));
    }

    #[test]
    fn sync_invalidated_keeps_username() {
        let (user, _, _) = fixture();
        user.set_auth("t", "u", Some("octocat")).unwrap();
        user.sync_invalidated();

        let state = user.state();
        assert!(!state.is_authenticated());
        assert!(state.user_id.is_empty());
        assert_eq!(state.username, "octocat");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(String, String, Option<String>),
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            ("[a-z0-9]{0,6}", "[0-9]{0,3}", proptest::option::of("[a-z]{0,4}"))
                .prop_map(|(t, u, n)| Op::Set(t, u, n)),
            Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn stored_credentials_track_memory(ops in proptest::collection::vec(op(), 0..16)) {
            let (user, store, _) = fixture();
            for op in ops {
                match op {
                    Op::Set(t, u, n) => user.set_auth(&t, &u, n.as_deref()).unwrap(),
                    Op::Clear => user.clear_auth().unwrap(),
                }
                let state = user.state();
                prop_assert_eq!(state.is_authenticated(), !state.token.is_empty());
                prop_assert_eq!(store.get("token").unwrap().unwrap_or_default(), state.token.expose());
                prop_assert_eq!(store.get("user_id").unwrap().unwrap_or_default(), state.user_id.as_str());
                prop_assert!(!state.is_admin());
            }
        }

        #[test]
        fn admin_flag_follows_profile(is_admin in any::<bool>(), loaded in any::<bool>()) {
            let state = UserState {
                user_info: loaded.then(|| UserProfile { is_admin, ..UserProfile::default() }),
                ..UserState::default()
            };
            prop_assert_eq!(state.is_admin(), loaded && is_admin);
        }
    }
}
