use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;

use crate::{core::auth::Secret, ports::SecretStore};

/// Secrets held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<String, Secret>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), Secret::new(value));
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn secret(&self, name: &str) -> Option<Secret> {
        self.secrets.get(name).cloned()
    }
}

/// One file per secret under a directory, the way container orchestrators
/// mount them. Values are trimmed; files are read on every lookup so rotated
/// secrets are picked up.
#[derive(Debug, Clone)]
pub struct DirectorySecretStore {
    root: PathBuf,
}

impl DirectorySecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SecretStore for DirectorySecretStore {
    async fn secret(&self, name: &str) -> Option<Secret> {
        // Names are plain file names; anything that could escape the root is refused
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            tracing::warn!(name = %name, "Rejected secret reference");
            return None;
        }
        match tokio::fs::read_to_string(self.root.join(name)).await {
            Ok(content) => {
                let value = content.trim();
                (!value.is_empty()).then(|| Secret::new(value))
            }
            Err(e) => {
                tracing::debug!(name = %name, error = %e, "Secret not readable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_store() {
        let store = StaticSecretStore::new().with_secret("api", "k-123");
        assert_eq!(store.secret("api").await.unwrap().expose(), "k-123");
        assert!(store.secret("other").await.is_none());
    }

    #[tokio::test]
    async fn test_directory_store_trims_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("client-secret"), "s3cr3t\n").unwrap();
        std::fs::write(dir.path().join("blank"), "  \n").unwrap();

        let store = DirectorySecretStore::new(dir.path());
        assert_eq!(store.secret("client-secret").await.unwrap().expose(), "s3cr3t");
        assert!(store.secret("blank").await.is_none());
        assert!(store.secret("missing").await.is_none());
        assert!(store.secret("../client-secret").await.is_none());
    }
}
