//! Route classification
//!
//! Pure decisions about navigation: which access class a path belongs to and
//! where, if anywhere, a request for it must be redirected. Performing the
//! redirect is left to the caller (the edge middleware or a client router).

use regex::Regex;

use crate::config::{RedirectPaths, RouteRules};
use crate::models::RouteCategory;

/// Error raised when a route pattern cannot be compiled
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid route pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A single route rule.
///
/// Every `*` matches any run of characters, `/` included; everything else is
/// literal. Patterns without `*` are kept as plain strings.
#[derive(Debug, Clone)]
enum RoutePattern {
    Literal(String),
    Wildcard(Regex),
}

impl RoutePattern {
    fn parse(pattern: &str) -> Result<Self, RouteError> {
        if !pattern.contains('*') {
            return Ok(Self::Literal(pattern.to_string()));
        }

        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Regex::new(&format!("^{}$", body))
            .map(Self::Wildcard)
            .map_err(|source| RouteError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    fn parse_all(patterns: &[String]) -> Result<Vec<Self>, RouteError> {
        patterns.iter().map(|p| Self::parse(p)).collect()
    }

    /// Literal patterns match any path they prefix
    fn matches_prefix(&self, path: &str) -> bool {
        match self {
            Self::Literal(literal) => path.starts_with(literal.as_str()),
            Self::Wildcard(regex) => regex.is_match(path),
        }
    }

    /// Literal patterns match only the identical path
    fn matches_exact(&self, path: &str) -> bool {
        match self {
            Self::Literal(literal) => path == literal,
            Self::Wildcard(regex) => regex.is_match(path),
        }
    }
}

/// Set of exact-or-wildcard patterns, used for paths the guard skips.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<RoutePattern>,
}

impl PathMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, RouteError> {
        Ok(Self {
            patterns: RoutePattern::parse_all(patterns)?,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches_exact(path))
    }
}

/// Classifies paths against ordered rule lists and derives redirects.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    protected: Vec<RoutePattern>,
    auth: Vec<String>,
    public: Vec<RoutePattern>,
    redirects: RedirectPaths,
}

impl RouteClassifier {
    pub fn new(rules: &RouteRules, redirects: &RedirectPaths) -> Result<Self, RouteError> {
        Ok(Self {
            protected: RoutePattern::parse_all(&rules.protected)?,
            auth: rules.auth.clone(),
            public: RoutePattern::parse_all(&rules.public)?,
            redirects: redirects.clone(),
        })
    }

    pub fn redirects(&self) -> &RedirectPaths {
        &self.redirects
    }

    /// Protected rules win over auth rules, which win over public rules.
    pub fn classify(&self, path: &str) -> RouteCategory {
        if self.protected.iter().any(|p| p.matches_prefix(path)) {
            return RouteCategory::Protected;
        }
        if self.auth.iter().any(|a| a == path) {
            return RouteCategory::Auth;
        }
        if self.public.iter().any(|p| p.matches_exact(path)) {
            return RouteCategory::Public;
        }
        RouteCategory::NotFound
    }

    /// Where a navigation to `path` must go instead, if anywhere.
    pub fn redirect_target(&self, path: &str, is_authenticated: bool) -> Option<String> {
        match self.classify(path) {
            RouteCategory::Auth if is_authenticated => Some(self.redirects.dashboard.clone()),
            RouteCategory::Protected if !is_authenticated => Some(self.login_redirect(path)),
            RouteCategory::NotFound => Some(self.redirects.unauthorized.clone()),
            _ => None,
        }
    }

    /// Login URL that returns to `path` after signing in
    pub fn login_redirect(&self, path: &str) -> String {
        let separator = if self.redirects.login.contains('?') { '&' } else { '?' };
        format!(
            "{}{}redirect={}",
            self.redirects.login,
            separator,
            urlencoding::encode(path)
        )
    }
}
