//! Token validation
//!
//! Decodes the payload of a bearer token (JWT shape `header.payload.signature`)
//! without verifying the signature, which is the backend's job, and answers
//! whether its `exp` claim is still in the future.
//!
//! Answers are cached per raw token string for a fixed TTL (60 seconds by
//! default) so render storms and repeated page requests do not re-decode the
//! same token. Undecodable tokens are cached as invalid too.

use chrono::Utc;
use data_encoding::BASE64URL_NOPAD;
use moka::future::Cache;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default time a validity answer is trusted
pub const DEFAULT_VALIDATION_TTL: Duration = Duration::from_secs(60);

/// Upper bound on distinct tokens remembered at once
const MAX_CACHED_TOKENS: u64 = 10_000;

/// Reasons a token cannot be decoded
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token is not a three-part JWT")]
    Malformed,
    #[error("Token payload is not valid base64url: {0}")]
    Encoding(#[from] data_encoding::DecodeError),
    #[error("Token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Token has no expiry claim")]
    MissingExpiry,
}

/// Claims the auth layer reads from a token payload
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    /// Expiry, seconds since the Unix epoch
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued-at, seconds since the Unix epoch
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenClaims {
    pub fn expiry(&self) -> Result<i64, TokenError> {
        self.exp.ok_or(TokenError::MissingExpiry)
    }
}

/// Decode the claims of a token without checking its signature.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };
    if header.is_empty() || payload.is_empty() {
        return Err(TokenError::Malformed);
    }

    let bytes = BASE64URL_NOPAD.decode(payload.trim_end_matches('=').as_bytes())?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Cached validity answer for one token
#[derive(Debug, Clone)]
struct ValidationCacheEntry {
    is_valid: bool,
    checked_at: Instant,
    /// Expiry claim, when the token decoded
    expires_at: Option<i64>,
}

impl ValidationCacheEntry {
    /// An entry is trusted only inside the TTL, and a positive answer never
    /// outlives the token's own expiry.
    fn is_fresh(&self, ttl: Duration, now: i64) -> bool {
        if self.checked_at.elapsed() >= ttl {
            return false;
        }
        !(self.is_valid && self.expires_at.is_some_and(|exp| now >= exp))
    }
}

/// Token validator with a TTL cache of validity answers.
///
/// Constructed explicitly and shared through `Arc`; tests build isolated
/// instances.
pub struct TokenValidator {
    cache: Cache<String, ValidationCacheEntry>,
    ttl: Duration,
    /// Number of times a token was actually decoded
    decodes: AtomicU64,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("entry_count", &self.cache.entry_count())
            .field("ttl", &self.ttl)
            .field("decodes", &self.decode_count())
            .finish()
    }
}

impl TokenValidator {
    /// Create a validator with the default 60 second TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_VALIDATION_TTL)
    }

    /// Create a validator with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_TOKENS)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            ttl,
            decodes: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the token's expiry lies in the future.
    pub async fn validate(&self, token: &str) -> bool {
        let now = Utc::now().timestamp();

        if let Some(entry) = self.cache.get(token).await {
            if entry.is_fresh(self.ttl, now) {
                tracing::trace!(valid = entry.is_valid, "token validity cache hit");
                return entry.is_valid;
            }
        }

        let entry = self.check(token, now);
        let is_valid = entry.is_valid;
        self.cache.insert(token.to_string(), entry).await;
        is_valid
    }

    fn check(&self, token: &str, now: i64) -> ValidationCacheEntry {
        self.decodes.fetch_add(1, Ordering::Relaxed);

        match decode_claims(token).and_then(|claims| claims.expiry()) {
            Ok(exp) => ValidationCacheEntry {
                is_valid: exp > now,
                checked_at: Instant::now(),
                expires_at: Some(exp),
            },
            Err(e) => {
                tracing::debug!(error = %e, "rejecting undecodable token");
                ValidationCacheEntry {
                    is_valid: false,
                    checked_at: Instant::now(),
                    expires_at: None,
                }
            }
        }
    }

    /// Forget every cached answer. Called on logout.
    pub async fn clear_cache(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Time left before the token expires.
    ///
    /// `None` when the token cannot be decoded or carries no expiry,
    /// `Duration::ZERO` once it has expired.
    pub fn time_until_expiration(&self, token: &str) -> Option<Duration> {
        let exp = decode_claims(token).and_then(|c| c.expiry()).ok()?;
        let remaining = exp - Utc::now().timestamp();
        Some(Duration::from_secs(remaining.max(0) as u64))
    }

    /// Total decodes performed, for instrumentation
    pub fn decode_count(&self) -> u64 {
        self.decodes.load(Ordering::Relaxed)
    }
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self::new()
    }
}
