//! Access guard
//!
//! Decides whether protected content may be shown for the current session.
//! The decision is a four-state machine evaluated over a `SessionSnapshot`:
//!
//! - `Loading` - session or role resolution still pending
//! - `Unauthenticated` - resolved, nobody signed in
//! - `Forbidden` - signed in without any of the required roles
//! - `Authorized` - show the content
//!
//! `AccessGuard::render` is the canonical shape: it picks one of the content
//! or placeholder builders. `wrap` adapts a component function to the same
//! semantics and `navigate` maps the states onto redirects.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::routes::RouteClassifier;
use crate::auth::session::SessionStore;
use crate::models::{Role, RoleSet, SessionSnapshot};

/// Outcome of evaluating a guard against a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Loading,
    Unauthenticated,
    Forbidden,
    Authorized,
}

impl GuardState {
    pub fn is_authorized(&self) -> bool {
        matches!(self, GuardState::Authorized)
    }
}

/// What a router should do with a guarded navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Resolution pending; do nothing yet
    Wait,
    Proceed,
    Redirect(String),
}

/// Content and placeholders for one guarded render.
///
/// Builders are only invoked for the state that is shown, so protected
/// content is never built for a visitor who may not see it.
pub struct GuardedView<'a, R> {
    content: Box<dyn FnOnce() -> R + 'a>,
    loading: Option<Box<dyn FnOnce() -> R + 'a>>,
    unauthorized: Option<Box<dyn FnOnce() -> R + 'a>>,
}

impl<'a, R> GuardedView<'a, R> {
    pub fn new(content: impl FnOnce() -> R + 'a) -> Self {
        Self {
            content: Box::new(content),
            loading: None,
            unauthorized: None,
        }
    }

    /// Shown while the session or roles are resolving
    pub fn loading(mut self, placeholder: impl FnOnce() -> R + 'a) -> Self {
        self.loading = Some(Box::new(placeholder));
        self
    }

    /// Shown when nobody is signed in or the required roles are missing
    pub fn unauthorized(mut self, placeholder: impl FnOnce() -> R + 'a) -> Self {
        self.unauthorized = Some(Box::new(placeholder));
        self
    }
}

/// Role-aware guard for protected content.
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    required: RoleSet,
}

impl AccessGuard {
    /// Guard that only requires a signed-in user
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard that requires at least one of `roles`
    pub fn requiring(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            required: roles.into_iter().collect(),
        }
    }

    pub fn required_roles(&self) -> &RoleSet {
        &self.required
    }

    pub fn evaluate(&self, session: &SessionSnapshot) -> GuardState {
        if session.is_loading || session.roles_loading {
            return GuardState::Loading;
        }
        if !session.is_authenticated || session.user.is_none() {
            return GuardState::Unauthenticated;
        }
        if !session.roles.satisfies(&self.required) {
            return GuardState::Forbidden;
        }
        GuardState::Authorized
    }

    /// Produce the view for `session`. Missing placeholders render
    /// `R::default()`.
    pub fn render<R: Default>(&self, session: &SessionSnapshot, view: GuardedView<'_, R>) -> R {
        match self.evaluate(session) {
            GuardState::Loading => view.loading.map_or_else(R::default, |build| build()),
            GuardState::Unauthenticated | GuardState::Forbidden => {
                view.unauthorized.map_or_else(R::default, |build| build())
            }
            GuardState::Authorized => (view.content)(),
        }
    }

    /// Wrap a component so it only runs for authorized sessions.
    pub fn wrap<'a, R, F>(self, component: F) -> impl Fn(&SessionSnapshot) -> R + 'a
    where
        R: Default + 'a,
        F: Fn(&SessionSnapshot) -> R + 'a,
    {
        move |session: &SessionSnapshot| {
            self.render(session, GuardedView::new(|| component(session)))
        }
    }

    /// Redirect variant: anonymous visitors go to login (returning to
    /// `path` afterwards), visitors without the required roles go to the
    /// unauthorized page.
    pub fn navigate(
        &self,
        session: &SessionSnapshot,
        path: &str,
        routes: &RouteClassifier,
    ) -> Navigation {
        match self.evaluate(session) {
            GuardState::Loading => Navigation::Wait,
            GuardState::Unauthenticated => Navigation::Redirect(routes.login_redirect(path)),
            GuardState::Forbidden => Navigation::Redirect(routes.redirects().unauthorized.clone()),
            GuardState::Authorized => Navigation::Proceed,
        }
    }

    /// Wait until the session is resolved and evaluate it.
    ///
    /// Resolution that takes longer than `timeout`, or a store that goes
    /// away, counts as unauthenticated.
    pub async fn resolve(
        &self,
        session: &mut watch::Receiver<SessionSnapshot>,
        timeout: Duration,
    ) -> GuardState {
        match tokio::time::timeout(timeout, session.wait_for(SessionSnapshot::is_resolved)).await {
            Ok(Ok(snapshot)) => self.evaluate(&snapshot),
            Ok(Err(_)) => {
                tracing::warn!("Session store closed before the session resolved");
                GuardState::Unauthenticated
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Session resolution timed out"
                );
                GuardState::Unauthenticated
            }
        }
    }

    /// Start resolving the session for this guard.
    ///
    /// Restores the stored session if that has not happened yet, refreshes
    /// an expired one and loads roles. Dropping the returned handle aborts
    /// whatever is still in flight.
    pub fn mount(&self, store: Arc<SessionStore>) -> MountedGuard {
        let session = store.subscribe();
        let task = tokio::spawn(async move {
            let state = store.snapshot();
            if state.is_loading {
                if let Err(e) = store.restore().await {
                    tracing::debug!("Session restore failed: {}", e);
                }
            } else if state.is_authenticated {
                store.ensure_valid_session().await;
            }

            let state = store.snapshot();
            if state.is_authenticated && state.roles_loading {
                if let Err(e) = store.load_roles().await {
                    tracing::debug!("Role loading failed: {}", e);
                }
            }
        });

        MountedGuard {
            guard: self.clone(),
            session,
            task,
        }
    }
}

/// A guard bound to a live session. Aborts its resolution work on drop.
#[derive(Debug)]
pub struct MountedGuard {
    guard: AccessGuard,
    session: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl MountedGuard {
    /// State for the latest session snapshot
    pub fn state(&self) -> GuardState {
        self.guard.evaluate(&self.session.borrow())
    }

    pub fn render<R: Default>(&self, view: GuardedView<'_, R>) -> R {
        let session = self.session.borrow().clone();
        self.guard.render(&session, view)
    }

    pub async fn resolve(&mut self, timeout: Duration) -> GuardState {
        self.guard.resolve(&mut self.session, timeout).await
    }

    /// Resolution work has completed or been aborted
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MountedGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::mock::{fresh_tokens, payload, user, MockAuthApi};
    use crate::auth::storage::MemoryTokenStorage;
    use crate::auth::token::TokenValidator;
    use crate::config::{Config, RedirectPaths, RouteRules};
    use std::cell::Cell;
    use std::sync::atomic::Ordering;

    fn signed_in(roles: &[Role]) -> SessionSnapshot {
        SessionSnapshot {
            user: Some(user()),
            roles: roles.iter().copied().collect(),
            tokens: Some(fresh_tokens()),
            is_loading: false,
            roles_loading: false,
            is_authenticated: true,
        }
    }

    fn view<'a>(built: &'a Cell<bool>) -> GuardedView<'a, String> {
        GuardedView::new(move || {
            built.set(true);
            "content".to_string()
        })
        .loading(|| "loading".to_string())
        .unauthorized(|| "fallback".to_string())
    }

    fn classifier() -> RouteClassifier {
        RouteClassifier::new(&RouteRules::default(), &RedirectPaths::default()).unwrap()
    }

    #[test]
    fn test_evaluate_states() {
        let guard = AccessGuard::requiring([Role::Admin]);

        assert_eq!(guard.evaluate(&SessionSnapshot::initial()), GuardState::Loading);
        assert_eq!(guard.evaluate(&SessionSnapshot::signed_out()), GuardState::Unauthenticated);
        assert_eq!(guard.evaluate(&signed_in(&[Role::Customer])), GuardState::Forbidden);
        assert_eq!(guard.evaluate(&signed_in(&[Role::Admin])), GuardState::Authorized);
    }

    #[test]
    fn test_pending_roles_count_as_loading() {
        let guard = AccessGuard::requiring([Role::Admin]);
        let mut session = signed_in(&[]);
        session.roles_loading = true;

        assert_eq!(guard.evaluate(&session), GuardState::Loading);
        assert_eq!(AccessGuard::new().evaluate(&session), GuardState::Loading);
    }

    #[test]
    fn test_any_required_role_is_enough() {
        let guard = AccessGuard::requiring([Role::Admin, Role::EventOrganizer]);
        assert!(guard.evaluate(&signed_in(&[Role::EventOrganizer])).is_authorized());
    }

    #[test]
    fn test_no_requirement_admits_any_signed_in_user() {
        let guard = AccessGuard::new();
        assert!(guard.evaluate(&signed_in(&[])).is_authorized());
    }

    #[test]
    fn test_wrong_role_renders_fallback_and_never_content() {
        let guard = AccessGuard::requiring([Role::Admin]);
        let built = Cell::new(false);

        let output = guard.render(&signed_in(&[Role::Customer]), view(&built));

        assert_eq!(output, "fallback");
        assert!(!built.get());
    }

    #[test]
    fn test_render_each_state() {
        let guard = AccessGuard::requiring([Role::Admin]);
        let built = Cell::new(false);

        assert_eq!(guard.render(&SessionSnapshot::initial(), view(&built)), "loading");
        assert_eq!(guard.render(&SessionSnapshot::signed_out(), view(&built)), "fallback");
        assert!(!built.get());
        assert_eq!(guard.render(&signed_in(&[Role::Admin]), view(&built)), "content");
        assert!(built.get());
    }

    #[test]
    fn test_missing_placeholders_render_default() {
        let guard = AccessGuard::new();
        let content = || "content".to_string();

        assert_eq!(guard.render(&SessionSnapshot::initial(), GuardedView::new(content)), "");
        assert_eq!(guard.render(&SessionSnapshot::signed_out(), GuardedView::new(content)), "");
    }

    #[test]
    fn test_wrap_matches_render() {
        let guard = AccessGuard::requiring([Role::EventTeam]);
        let page = guard.clone().wrap(|session: &SessionSnapshot| {
            session.user.as_ref().map(|u| u.email.clone()).unwrap_or_default()
        });

        assert_eq!(page(&signed_in(&[Role::EventTeam])), "organizer@example.com");
        assert_eq!(page(&signed_in(&[Role::Customer])), "");
        assert_eq!(page(&SessionSnapshot::initial()), "");
    }

    #[test]
    fn test_navigate() {
        let routes = classifier();
        let guard = AccessGuard::requiring([Role::Admin]);

        assert_eq!(
            guard.navigate(&SessionSnapshot::initial(), "/dashboard/admin", &routes),
            Navigation::Wait
        );
        assert_eq!(
            guard.navigate(&SessionSnapshot::signed_out(), "/dashboard/admin", &routes),
            Navigation::Redirect("/login?redirect=%2Fdashboard%2Fadmin".to_string())
        );
        assert_eq!(
            guard.navigate(&signed_in(&[Role::Customer]), "/dashboard/admin", &routes),
            Navigation::Redirect("/unauthorized".to_string())
        );
        assert_eq!(
            guard.navigate(&signed_in(&[Role::Admin]), "/dashboard/admin", &routes),
            Navigation::Proceed
        );
    }

    #[tokio::test]
    async fn test_resolve_times_out_closed() {
        let (_tx, mut rx) = watch::channel(SessionSnapshot::initial());

        let state = AccessGuard::new()
            .resolve(&mut rx, Duration::from_millis(20))
            .await;

        assert_eq!(state, GuardState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_resolve_waits_for_roles() {
        let mut pending = signed_in(&[]);
        pending.roles_loading = true;
        let (tx, mut rx) = watch::channel(pending);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send_modify(|s| {
                s.roles = RoleSet::from([Role::Admin]);
                s.roles_loading = false;
            });
            // keep the sender alive until the guard has seen the update
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let state = AccessGuard::requiring([Role::Admin])
            .resolve(&mut rx, Duration::from_secs(5))
            .await;
        assert_eq!(state, GuardState::Authorized);
    }

    #[tokio::test]
    async fn test_resolve_closed_store() {
        let (tx, mut rx) = watch::channel(SessionSnapshot::initial());
        drop(tx);

        let state = AccessGuard::new().resolve(&mut rx, Duration::from_secs(5)).await;
        assert_eq!(state, GuardState::Unauthenticated);
    }

    fn store(api: Arc<MockAuthApi>, stored: bool) -> Arc<SessionStore> {
        let storage = if stored {
            MemoryTokenStorage::with_tokens(fresh_tokens())
        } else {
            MemoryTokenStorage::new()
        };
        Arc::new(SessionStore::new(
            api,
            Arc::new(storage),
            Arc::new(TokenValidator::new()),
        ))
    }

    #[tokio::test]
    async fn test_mount_restores_session_and_roles() {
        let api = Arc::new(MockAuthApi::with_roles(&["ADMIN"]));
        let store = store(api.clone(), true);

        let mut mounted = AccessGuard::requiring([Role::Admin]).mount(store.clone());
        let state = mounted.resolve(Config::default().auth.guard_timeout()).await;

        assert_eq!(state, GuardState::Authorized);
        assert_eq!(api.call_count("current_user"), 1);
        assert_eq!(api.call_count("list_roles"), 1);
        assert_eq!(mounted.render(GuardedView::new(|| 1u8)), 1);
    }

    #[tokio::test]
    async fn test_mount_without_session_resolves_unauthenticated() {
        let api = Arc::new(MockAuthApi::default());
        let mut mounted = AccessGuard::new().mount(store(api.clone(), false));

        assert_eq!(
            mounted.resolve(Duration::from_secs(5)).await,
            GuardState::Unauthenticated
        );
        assert_eq!(api.call_count("list_roles"), 0);
    }

    #[tokio::test]
    async fn test_mount_with_applied_session_only_loads_roles() {
        let api = Arc::new(MockAuthApi::with_roles(&["CUSTOMER"]));
        let store = store(api.clone(), false);
        store.apply_session(payload()).await;

        let mut mounted = AccessGuard::requiring([Role::Admin]).mount(store);

        assert_eq!(mounted.resolve(Duration::from_secs(5)).await, GuardState::Forbidden);
        assert_eq!(api.call_count("current_user"), 0);
    }

    #[tokio::test]
    async fn test_dropping_mounted_guard_cancels_role_fetch() {
        let api = Arc::new(MockAuthApi::with_roles(&["ADMIN"]));
        api.gate_roles.store(true, Ordering::SeqCst);
        let store = store(api.clone(), false);
        store.apply_session(payload()).await;

        let mounted = AccessGuard::new().mount(store.clone());
        api.roles_requested.notified().await;
        assert_eq!(mounted.state(), GuardState::Loading);

        drop(mounted);
        api.release_roles.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let state = store.snapshot();
        assert!(state.roles_loading);
        assert!(state.roles.is_empty());
    }
}
