//! Session store
//!
//! Owns the current session (user, roles, tokens) and is the only writer of
//! it. Readers take snapshots or subscribe to changes through a
//! `tokio::sync::watch` channel; every transition is a single atomic update
//! of the channel value.
//!
//! Transitions:
//! - `restore` - rehydrate from durable storage on boot
//! - `apply_session` - after OTP verification or invite acceptance
//! - `refresh` - swap in a refreshed token pair
//! - `logout` - clear everything, including the validator cache
//!
//! Each new session (or logout) bumps an epoch. Work started under an older
//! epoch, such as a slow role fetch, is discarded when it completes.
//! Storage writes take the storage lock and check the epoch first, so a
//! late refresh cannot write tokens back after a logout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::auth::storage::{FileTokenStorage, TokenStorage};
use crate::auth::token::TokenValidator;
use crate::config::Config;
use crate::models::{Role, RoleSet, SessionPayload, SessionSnapshot, TokenPair, User};
use crate::services::api_client::{ApiClientError, AuthApi, HttpAuthApi, LoginChallenge};
use crate::services::remote_log::{LogLevel, LogRecord, RemoteLogger};

/// Context name used for remote log records
const LOG_CONTEXT: &str = "session";

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Input rejected before contacting the backend
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend could not be reached or refused the request
    #[error("Remote call failed: {0}")]
    Network(#[from] ApiClientError),

    /// Operation needs a signed-in session
    #[error("Not signed in")]
    NotAuthenticated,

    /// Both tokens have expired
    #[error("Session expired")]
    SessionExpired,
}

impl SessionError {
    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Network(e) => e.user_message(),
            Self::NotAuthenticated => "Please sign in to continue.".to_string(),
            Self::SessionExpired => "Your session has expired. Please sign in again.".to_string(),
        }
    }
}

/// The backend rejected the credentials themselves, not the request
fn is_rejection(e: &ApiClientError) -> bool {
    matches!(e, ApiClientError::Status { status: 401 | 403, .. })
}

fn validate_email(identifier: &str) -> Result<&str, SessionError> {
    let email = identifier.trim();
    if email.is_empty() {
        return Err(SessionError::Validation("Email cannot be empty".to_string()));
    }
    if !email.contains('@') {
        return Err(SessionError::Validation("Invalid email format".to_string()));
    }
    Ok(email)
}

/// Session store; construct once and share through `Arc`.
pub struct SessionStore {
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn TokenStorage>,
    validator: Arc<TokenValidator>,
    state: watch::Sender<SessionSnapshot>,
    epoch: AtomicU64,
    /// Serializes storage writes with the epoch bumps that go with them
    storage_lock: Mutex<()>,
    logger: Option<RemoteLogger>,
}

impl SessionStore {
    /// Create a store in the initial (loading) state
    pub fn new(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn TokenStorage>,
        validator: Arc<TokenValidator>,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::initial());
        Self {
            api,
            storage,
            validator,
            state,
            epoch: AtomicU64::new(0),
            storage_lock: Mutex::new(()),
            logger: None,
        }
    }

    /// Create a store that reports notable events to the remote log
    pub fn with_logger(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn TokenStorage>,
        validator: Arc<TokenValidator>,
        logger: RemoteLogger,
    ) -> Self {
        Self {
            logger: Some(logger),
            ..Self::new(api, storage, validator)
        }
    }

    /// Wire a store to the configured backend, token file and log endpoint
    pub fn from_config(config: &Config) -> Result<Self, ApiClientError> {
        let api = HttpAuthApi::new(&config.api)?;
        Ok(Self::with_logger(
            Arc::new(api),
            Arc::new(FileTokenStorage::new(&config.auth.storage_path)),
            Arc::new(TokenValidator::with_ttl(config.auth.token_cache_ttl())),
            RemoteLogger::new(&config.logging),
        ))
    }

    fn report(&self, level: LogLevel, message: String, data: Option<serde_json::Value>) {
        if let Some(ref logger) = self.logger {
            let record = LogRecord::new(level, LOG_CONTEXT, message);
            logger.log(match data {
                Some(data) => record.with_data(data),
                None => record,
            });
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver notified on every transition
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn roles(&self) -> RoleSet {
        self.state.borrow().roles.clone()
    }

    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    /// Time left on the current access token, for scheduling a refresh
    pub fn access_expires_in(&self) -> Option<std::time::Duration> {
        let access = self.state.borrow().access_token().map(str::to_string)?;
        self.validator.time_until_expiration(&access)
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Start a new epoch and update state in the same atomic step.
    fn begin(&self, update: impl FnOnce(&mut SessionSnapshot)) -> u64 {
        let mut epoch = 0;
        self.state.send_modify(|state| {
            epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            update(state);
        });
        epoch
    }

    /// Update state only if no newer epoch has started. Returns whether the
    /// update was applied.
    fn commit(&self, epoch: u64, update: impl FnOnce(&mut SessionSnapshot)) -> bool {
        self.state.send_if_modified(|state| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            update(state);
            true
        })
    }

    /// Current epoch together with a consistent view of the state
    fn current(&self) -> (u64, SessionSnapshot) {
        let state = self.state.borrow();
        (self.epoch.load(Ordering::SeqCst), state.clone())
    }

    async fn persist(&self, tokens: &TokenPair) {
        if let Err(e) = self.storage.save(tokens).await {
            tracing::warn!("Failed to persist tokens: {:#}", e);
        }
    }

    async fn forget_tokens(&self) {
        if let Err(e) = self.storage.clear().await {
            tracing::warn!("Failed to remove stored tokens: {:#}", e);
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Store `tokens` unless a newer epoch has started. The returned guard
    /// keeps the epoch fixed until it is dropped.
    async fn persist_if_current(&self, epoch: u64, tokens: &TokenPair) -> Option<MutexGuard<'_, ()>> {
        let guard = self.storage_lock.lock().await;
        if !self.is_current(epoch) {
            return None;
        }
        self.persist(tokens).await;
        Some(guard)
    }

    /// Remove stored tokens, unless a newer epoch has started.
    async fn forget_tokens_if_current(&self, epoch: u64) {
        let _guard = self.storage_lock.lock().await;
        if self.is_current(epoch) {
            self.forget_tokens().await;
        }
    }

    /// Rehydrate the session from durable storage.
    ///
    /// - valid access token: fetch the user
    /// - expired access but valid refresh token: refresh first
    /// - both expired, or rejected by the backend: clear storage
    ///
    /// Always leaves `is_loading` false.
    pub async fn restore(&self) -> Result<(), SessionError> {
        let epoch = {
            let _guard = self.storage_lock.lock().await;
            self.begin(|s| s.is_loading = true)
        };

        let stored = match self.storage.load().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Failed to read stored tokens: {:#}", e);
                None
            }
        };

        let Some(mut tokens) = stored else {
            self.commit(epoch, |s| *s = SessionSnapshot::signed_out());
            return Ok(());
        };

        if !self.validator.validate(&tokens.access).await {
            if !self.validator.validate(&tokens.refresh).await {
                tracing::info!("Stored session expired, clearing it");
                self.forget_tokens_if_current(epoch).await;
                self.commit(epoch, |s| *s = SessionSnapshot::signed_out());
                return Ok(());
            }

            match self.api.refresh_tokens(&tokens.refresh).await {
                Ok(refreshed) => {
                    if self.persist_if_current(epoch, &refreshed).await.is_none() {
                        tracing::debug!("Session changed during restore, dropping refreshed tokens");
                        return Ok(());
                    }
                    tokens = refreshed;
                }
                Err(e) => return Err(self.abandon_restore(epoch, e).await),
            }
        }

        match self.api.current_user(&tokens.access).await {
            Ok(user) => {
                let user_id = user.id;
                let name = user.display_name();
                let applied = self.commit(epoch, |s| {
                    *s = SessionSnapshot {
                        user: Some(user),
                        roles: RoleSet::new(),
                        tokens: Some(tokens),
                        is_loading: false,
                        roles_loading: true,
                        is_authenticated: true,
                    }
                });
                if applied {
                    tracing::info!(user_id, name = %name, "Session restored");
                } else {
                    tracing::debug!("Session changed during restore, dropping user");
                }
                Ok(())
            }
            Err(e) => Err(self.abandon_restore(epoch, e).await),
        }
    }

    /// Finish a failed restore. Tokens the backend rejected are removed;
    /// after a network failure they are kept for the next attempt.
    async fn abandon_restore(&self, epoch: u64, e: ApiClientError) -> SessionError {
        if is_rejection(&e) {
            self.forget_tokens_if_current(epoch).await;
        }
        tracing::warn!("Failed to restore session: {}", e);
        self.commit(epoch, |s| *s = SessionSnapshot::signed_out());
        SessionError::Network(e)
    }

    /// Start the passwordless email flow.
    ///
    /// Does not change session state, whether it succeeds or fails.
    pub async fn login(&self, identifier: &str) -> Result<LoginChallenge, SessionError> {
        let email = validate_email(identifier)?;

        match self.api.request_login(email).await {
            Ok(challenge) => {
                tracing::info!("Login code requested");
                Ok(challenge)
            }
            Err(e) => {
                self.report(
                    LogLevel::Warn,
                    format!("Login request failed: {}", e),
                    None,
                );
                Err(SessionError::Network(e))
            }
        }
    }

    /// Finish the passwordless flow and establish the session.
    pub async fn verify_otp(&self, identifier: &str, otp: &str) -> Result<User, SessionError> {
        let email = validate_email(identifier)?;
        let otp = otp.trim();
        if otp.is_empty() {
            return Err(SessionError::Validation("Code cannot be empty".to_string()));
        }

        let payload = self.api.verify_otp(email, otp).await.map_err(|e| {
            self.report(LogLevel::Warn, format!("OTP verification failed: {}", e), None);
            SessionError::Network(e)
        })?;

        let user = payload.user.clone();
        self.apply_session(payload).await;
        Ok(user)
    }

    /// Accept an event-team invitation and establish the session it returns.
    pub async fn accept_invite(&self, invite_token: &str) -> Result<User, SessionError> {
        let invite_token = invite_token.trim();
        if invite_token.is_empty() {
            return Err(SessionError::Validation("Invitation token is missing".to_string()));
        }

        let payload = self.api.accept_invite(invite_token).await.map_err(|e| {
            self.report(LogLevel::Warn, format!("Invite acceptance failed: {}", e), None);
            SessionError::Network(e)
        })?;

        let user = payload.user.clone();
        self.apply_session(payload).await;
        Ok(user)
    }

    /// Install a new session: tokens and user in one step, roles pending.
    pub async fn apply_session(&self, payload: SessionPayload) {
        let _guard = self.storage_lock.lock().await;
        self.persist(&payload.tokens).await;

        let SessionPayload { tokens, user } = payload;
        let user_id = user.id;
        let name = user.display_name();
        self.begin(|s| {
            *s = SessionSnapshot {
                user: Some(user),
                roles: RoleSet::new(),
                tokens: Some(tokens),
                is_loading: false,
                roles_loading: true,
                is_authenticated: true,
            }
        });
        tracing::info!(user_id, name = %name, "Session applied");
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// An expired or rejected refresh token ends the session. If the session
    /// changes while the request is in flight, the new pair is dropped and
    /// `NotAuthenticated` is returned.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let (epoch, state) = self.current();
        let tokens = state.tokens.ok_or(SessionError::NotAuthenticated)?;

        if !self.validator.validate(&tokens.refresh).await {
            self.end_session(Some(epoch)).await;
            return Err(SessionError::SessionExpired);
        }

        match self.api.refresh_tokens(&tokens.refresh).await {
            Ok(refreshed) => {
                let Some(_guard) = self.persist_if_current(epoch, &refreshed).await else {
                    tracing::debug!("Session changed during refresh, dropping new tokens");
                    return Err(SessionError::NotAuthenticated);
                };
                self.commit(epoch, |s| s.tokens = Some(refreshed));
                tracing::debug!("Tokens refreshed");
                Ok(())
            }
            Err(e) if is_rejection(&e) => {
                self.end_session(Some(epoch)).await;
                Err(SessionError::Network(e))
            }
            Err(e) => Err(SessionError::Network(e)),
        }
    }

    /// Make sure a signed-in session still holds a usable access token,
    /// refreshing or signing out as needed. Returns whether a valid session
    /// remains.
    pub async fn ensure_valid_session(&self) -> bool {
        let access = self.state.borrow().access_token().map(str::to_string);
        let Some(access) = access else {
            return false;
        };

        if self.validator.validate(&access).await {
            return true;
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        match self.refresh().await {
            Ok(()) => true,
            Err(e) => {
                tracing::info!("Access token expired and could not be refreshed: {}", e);
                self.end_session(Some(epoch)).await;
                false
            }
        }
    }

    /// Fetch the roles of the signed-in user.
    ///
    /// Role names the client does not know are skipped. A result that
    /// arrives after the session changed is discarded.
    pub async fn load_roles(&self) -> Result<RoleSet, SessionError> {
        let (epoch, state) = self.current();
        let Some(access) = state.access_token().map(str::to_string) else {
            self.commit(epoch, |s| s.roles_loading = false);
            return Err(SessionError::NotAuthenticated);
        };

        self.commit(epoch, |s| s.roles_loading = true);

        let records = match self.api.list_roles(&access).await {
            Ok(records) => records,
            Err(e) => {
                self.commit(epoch, |s| s.roles_loading = false);
                tracing::warn!("Failed to load roles: {}", e);
                return Err(SessionError::Network(e));
            }
        };

        let mut roles = RoleSet::new();
        for record in &records {
            match record.name.parse::<Role>() {
                Ok(role) => {
                    roles.insert(role);
                }
                Err(_) => tracing::warn!(role = %record.name, "Ignoring unknown role"),
            }
        }

        let applied = {
            let roles = roles.clone();
            self.commit(epoch, move |s| {
                s.roles = roles;
                s.roles_loading = false;
            })
        };
        if !applied {
            tracing::debug!("Discarding role list for a previous session");
        }
        Ok(roles)
    }

    /// End the session: clear state, stored tokens and cached validity.
    pub async fn logout(&self) {
        self.end_session(None).await;
    }

    /// Sign out, or when `expected` is given, only if that epoch is still
    /// current.
    async fn end_session(&self, expected: Option<u64>) {
        let guard = self.storage_lock.lock().await;
        if expected.is_some_and(|epoch| !self.is_current(epoch)) {
            return;
        }
        let user_id = self.state.borrow().user.as_ref().map(|u| u.id);

        self.begin(|s| *s = SessionSnapshot::signed_out());
        self.forget_tokens().await;
        drop(guard);
        self.validator.clear_cache().await;

        tracing::info!(?user_id, "Signed out");
        self.report(
            LogLevel::Info,
            "Signed out".to_string(),
            user_id.map(|id| serde_json::json!({ "user_id": id })),
        );
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.state.borrow())
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish()
    }
}
