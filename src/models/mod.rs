//! Data models
//!
//! This module contains the data structures shared by the auth layer, the
//! API client and the edge server:
//! - Users and roles
//! - Tokens and session snapshots
//! - Route categories

mod route;
mod session;
mod user;

pub use route::RouteCategory;
pub use session::{SessionPayload, SessionSnapshot, TokenPair};
pub use user::{Role, RoleRecord, RoleSet, User};
