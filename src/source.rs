//! Source store: object-key addressed access to uploaded source text

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::config::SourceConfig;
use crate::error::{Error, Result};

/// Where uploaded sources live
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Read the full text stored under `object_key`
    ///
    /// A missing object is [`Error::NotFound`].
    async fn fetch(&self, object_key: &str) -> Result<String>;

    /// Store `text` under `object_key`, replacing any previous content
    async fn put(&self, object_key: &str, text: &str) -> Result<()>;
}

/// [`SourceStore`] rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsSourceStore {
    root: PathBuf,
}

impl FsSourceStore {
    /// Store objects below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the configured source directory
    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.root_dir)
    }

    /// Map an object key to a path below the root
    ///
    /// Keys are relative paths made of normal components only.
    fn resolve(&self, object_key: &str) -> Result<PathBuf> {
        if object_key.trim().is_empty() {
            return Err(Error::Validation("object key must not be empty".into()));
        }

        let key = Path::new(object_key);
        if !key
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::Validation(format!(
                "object key '{}' must be a relative path without '..'",
                object_key
            )));
        }

        Ok(self.root.join(key))
    }
}

#[async_trait]
impl SourceStore for FsSourceStore {
    async fn fetch(&self, object_key: &str) -> Result<String> {
        let path = self.resolve(object_key)?;

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(format!(
                "source object '{}'",
                object_key
            ))),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn put(&self, object_key: &str, text: &str) -> Result<()> {
        let path = self.resolve(object_key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename so readers never see a partial file
        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, text).await?;
        tokio::fs::rename(&partial, &path).await?;

        tracing::debug!(object_key, bytes = text.len(), "Stored source object");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSourceStore::new(dir.path());

        store
            .put("uploads/2024/pilot.txt", "INT. ROOM - DAY\n")
            .await
            .unwrap();

        assert_eq!(
            store.fetch("uploads/2024/pilot.txt").await.unwrap(),
            "INT. ROOM - DAY\n"
        );
        assert!(!dir.path().join("uploads/2024/pilot.txt.partial").exists());
    }

    #[tokio::test]
    async fn put_replaces_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSourceStore::new(dir.path());

        store.put("a.txt", "first").await.unwrap();
        store.put("a.txt", "second").await.unwrap();

        assert_eq!(store.fetch("a.txt").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSourceStore::new(dir.path());

        assert!(matches!(
            store.fetch("nope.txt").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn escaping_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSourceStore::new(dir.path().join("root"));

        for key in ["../secret.txt", "a/../../b.txt", "/etc/passwd", "", "  "] {
            assert!(
                matches!(store.fetch(key).await, Err(Error::Validation(_))),
                "{key:?}"
            );
            assert!(
                matches!(store.put(key, "x").await, Err(Error::Validation(_))),
                "{key:?}"
            );
        }
    }
}
