//! Route category model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access-control class of a navigable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteCategory {
    /// Requires an authenticated session
    Protected,
    /// Sign-in flow pages; authenticated users are sent to the dashboard
    Auth,
    /// Open to everyone
    Public,
    /// Matched no rule
    NotFound,
}

impl fmt::Display for RouteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteCategory::Protected => write!(f, "protected"),
            RouteCategory::Auth => write!(f, "auth"),
            RouteCategory::Public => write!(f, "public"),
            RouteCategory::NotFound => write!(f, "not_found"),
        }
    }
}
