//! User model
//!
//! This module defines the User entity and the closed set of roles used for
//! dashboard authorization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// User as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier assigned by the backend
    pub id: i64,
    /// Email address used for passwordless login
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl User {
    /// Name shown in the dashboard header, falling back to the email.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone(),
        }
    }
}

/// Role for authorization.
///
/// Roles are a closed set so an unknown role name can never silently fail a
/// permission check:
/// - SuperAdmin: platform operator
/// - Admin: platform administrator
/// - EventOrganizer: owns events and their ticketing
/// - EventTeam: invited helper on an organizer's events
/// - Customer: buys tickets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    Admin,
    EventOrganizer,
    EventTeam,
    Customer,
}

impl Role {
    /// All roles, highest privilege first
    pub const ALL: [Role; 5] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::EventOrganizer,
        Role::EventTeam,
        Role::Customer,
    ];

    /// Wire name used by the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::Admin => "ADMIN",
            Role::EventOrganizer => "EVENT_ORGANIZER",
            Role::EventTeam => "EVENT_TEAM",
            Role::Customer => "CUSTOMER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    /// Accepts the wire name in any case, with `-` or spaces in place of `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace(|c: char| c == '-' || c == ' ', "_");
        match normalized.as_str() {
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            "ADMIN" => Ok(Role::Admin),
            "EVENT_ORGANIZER" => Ok(Role::EventOrganizer),
            "EVENT_TEAM" => Ok(Role::EventTeam),
            "CUSTOMER" => Ok(Role::Customer),
            _ => Err(anyhow::anyhow!("Invalid role: {}", s)),
        }
    }
}

/// A set of roles with the set operations authorization needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the two sets share at least one role
    pub fn intersects(&self, other: &RoleSet) -> bool {
        self.0.intersection(&other.0).next().is_some()
    }

    /// Satisfies a requirement list: an empty requirement is always met,
    /// otherwise at least one required role must be held.
    pub fn satisfies(&self, required: &RoleSet) -> bool {
        required.is_empty() || self.intersects(required)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Role; N]> for RoleSet {
    fn from(roles: [Role; N]) -> Self {
        roles.into_iter().collect()
    }
}

/// Entry of the role-listing endpoint (`[{name, ...}]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}
