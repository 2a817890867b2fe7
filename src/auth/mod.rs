//! Authentication and route protection
//!
//! - `token` - expiry validation of bearer tokens with a short-lived cache
//! - `routes` - route classification and redirect decisions
//! - `storage` - durable storage of the token pair
//! - `session` - the session store, single writer of session state
//! - `guard` - role-aware access guard over session snapshots

pub mod guard;
pub mod routes;
pub mod session;
pub mod storage;
pub mod token;

pub use guard::{AccessGuard, GuardState, GuardedView, MountedGuard, Navigation};
pub use routes::{PathMatcher, RouteClassifier, RouteError};
pub use session::{SessionError, SessionStore};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use token::{decode_claims, TokenClaims, TokenError, TokenValidator};
