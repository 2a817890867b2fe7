//! Durable token storage
//!
//! The session store persists the token pair so a session survives a
//! reload. Two implementations are provided:
//! - `FileTokenStorage` - JSON file on disk, the default
//! - `MemoryTokenStorage` - process memory, for tests and embedding

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::models::TokenPair;

/// Key-value persistence for the token pair
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Read the stored pair, `None` when nothing is stored
    async fn load(&self) -> Result<Option<TokenPair>>;

    /// Replace the stored pair
    async fn save(&self, tokens: &TokenPair) -> Result<()>;

    /// Remove the stored pair; removing nothing is not an error
    async fn clear(&self) -> Result<()>;
}

/// Token storage backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn load(&self) -> Result<Option<TokenPair>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read token file '{}'", self.path.display())
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let tokens = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse token file '{}'", self.path.display()))?;
        Ok(Some(tokens))
    }

    async fn save(&self, tokens: &TokenPair) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create '{}'", parent.display()))?;
        }

        let json = serde_json::to_string(tokens).context("Failed to serialize tokens")?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write '{}'", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace '{}'", self.path.display()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove '{}'", self.path.display())),
        }
    }
}

/// Token storage held in memory
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn load(&self) -> Result<Option<TokenPair>> {
        Ok(self.tokens.read().await.clone())
    }

    async fn save(&self, tokens: &TokenPair) -> Result<()> {
        *self.tokens.write().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.tokens.write().await = None;
        Ok(())
    }
}
