//! Object storage.
//!
//! Assets live in containers of named objects. Object names may contain `/`
//! (live-archive fragments are stored as `<stem>/<time>`).

use std::path::{Component, Path, PathBuf};

use af_core::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Suffix of objects that are still being written.
const PART_SUFFIX: &str = ".part";

/// A readable object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read and write access to containers of named objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All container names, sorted.
    async fn containers(&self) -> Result<Vec<String>>;

    async fn container_exists(&self, container: &str) -> Result<bool>;

    /// Names of the objects in a container that start with `prefix`, sorted.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>>;

    async fn exists(&self, container: &str, name: &str) -> Result<bool>;

    /// Open an object for reading. A missing object is [`Error::NotFound`].
    async fn open(&self, container: &str, name: &str) -> Result<ObjectReader>;

    /// Store an object, replacing any previous version. The object only
    /// becomes visible once all bytes are written. Returns the bytes stored.
    async fn put(
        &self,
        container: &str,
        name: &str,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// Read a whole object as UTF-8 text.
    async fn read_to_string(&self, container: &str, name: &str) -> Result<String> {
        let mut reader = self.open(container, name).await?;
        let mut text = String::new();
        reader.read_to_string(&mut text).await?;
        Ok(text)
    }
}

/// Object store backed by a directory: one subdirectory per container.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> Result<PathBuf> {
        let mut components = Path::new(container).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(container)),
            _ => Err(Error::Validation(format!(
                "invalid container name: {container:?}"
            ))),
        }
    }

    /// Filesystem path of an object. Names that could escape the container
    /// are rejected.
    pub fn object_path(&self, container: &str, name: &str) -> Result<PathBuf> {
        let mut path = self.container_path(container)?;
        if name.is_empty() || name.starts_with('/') || name.contains('\\') {
            return Err(Error::Validation(format!("invalid object name: {name:?}")));
        }
        for part in name.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(Error::Validation(format!("invalid object name: {name:?}")));
            }
            path.push(part);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn containers(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("store root", self.root.display()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        let path = self.container_path(container)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>> {
        let dir = self.container_path(container)?;
        if !self.container_exists(container).await? {
            return Err(Error::not_found("container", container));
        }
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            let mut names = Vec::new();
            for entry in walkdir::WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| match e {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        tracing::warn!(error = %err, "Error walking container");
                        None
                    }
                })
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&dir) else {
                    continue;
                };
                let name = relative
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect::<Vec<_>>()
                    .join("/");
                if name.ends_with(PART_SUFFIX) || !name.starts_with(&prefix) {
                    continue;
                }
                names.push(name);
            }
            names.sort();
            names
        })
        .await
        .map_err(|e| Error::Internal(format!("container listing task failed: {e}")))
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool> {
        let path = self.object_path(container, name)?;
        Ok(tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false))
    }

    async fn open(&self, container: &str, name: &str) -> Result<ObjectReader> {
        let path = self.object_path(container, name)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("object", format!("{container}/{name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let path = self.object_path(container, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut part = path.clone().into_os_string();
        part.push(PART_SUFFIX);
        let part = PathBuf::from(part);

        let written = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let n = tokio::io::copy(data, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, std::io::Error>(n)
        }
        .await;

        match written {
            Ok(n) => {
                tokio::fs::rename(&part, &path).await?;
                tracing::debug!(container, object = name, bytes = n, "Stored object");
                Ok(n)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e.into())
            }
        }
    }
}
