use crate::error::PortalError;
use crate::models::IMAGES_DIR;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

// 1. ImageStore Contract
/// ImageStore
///
/// Abstract contract for the image file store. Handlers talk to this trait so
/// the on-disk implementation (LocalImageStore) can be swapped for the
/// in-memory MockImageStore in tests.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persists one image under its derived path, relative to the storage root.
    async fn save(&self, relative_path: &str, bytes: &[u8]) -> Result<(), PortalError>;

    /// Removes a stored image. Compensating cleanup for a failed upload; a
    /// missing file is not an error.
    async fn remove(&self, relative_path: &str) -> Result<(), PortalError>;

    /// Builds a single ZIP archive (deflate) of every file under the images
    /// root. Entry names are paths relative to the storage root, so the
    /// archive re-creates the `dr_images/...` hierarchy at its top level.
    /// Entry order is directory-walk order and not guaranteed stable.
    ///
    /// Fails with `StorageUnavailable` when the images root does not exist,
    /// rather than producing an empty archive.
    async fn export_archive(&self) -> Result<Vec<u8>, PortalError>;
}

/// StorageState
///
/// The concrete type used to share the image store across the application state.
pub type StorageState = Arc<dyn ImageStore>;

/// sanitize_relative_path
///
/// Strips directory-navigation components from a derived path before it
/// touches the filesystem, preventing traversal out of the storage root.
fn sanitize_relative_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Writes one ZIP entry per file beneath `images_root`, named relative to `root`.
fn zip_directory(root: &Path, images_root: &Path) -> Result<Vec<u8>, PortalError> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(images_root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| PortalError::Internal(e.to_string()))?
            .to_string_lossy()
            .into_owned();

        let bytes = std::fs::read(entry.path())
            .map_err(|e| PortalError::StorageUnavailable(e.to_string()))?;

        writer
            .start_file(relative, options)
            .map_err(|e| PortalError::Internal(e.to_string()))?;
        writer
            .write_all(&bytes)
            .map_err(|e| PortalError::Internal(e.to_string()))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| PortalError::Internal(e.to_string()))?;
    Ok(cursor.into_inner())
}

// 2. The Real Implementation (local filesystem)
/// LocalImageStore
///
/// Stores images on the local filesystem beneath a configured storage root.
/// The directory layout below the root is exactly the derived relative paths
/// (`dr_images/<territory>/<doctor folder>/<file>`).
#[derive(Clone)]
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn save(&self, relative_path: &str, bytes: &[u8]) -> Result<(), PortalError> {
        let relative = sanitize_relative_path(relative_path);
        let full_path = self.root.join(&relative);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortalError::StorageUnavailable(e.to_string()))?;
        }

        tokio::fs::write(&full_path, bytes)
            .await
            .map_err(|e| PortalError::StorageUnavailable(e.to_string()))?;

        tracing::debug!("stored image at {}", full_path.display());
        Ok(())
    }

    async fn remove(&self, relative_path: &str) -> Result<(), PortalError> {
        let full_path = self.root.join(sanitize_relative_path(relative_path));
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortalError::StorageUnavailable(e.to_string())),
        }
    }

    async fn export_archive(&self) -> Result<Vec<u8>, PortalError> {
        let root = self.root.clone();
        let images_root = root.join(IMAGES_DIR);

        if !images_root.is_dir() {
            return Err(PortalError::StorageUnavailable(format!(
                "no images found under {}",
                images_root.display()
            )));
        }

        // The walk and compression are blocking filesystem work; the whole
        // archive is buffered in memory, which is acceptable at this scale.
        tokio::task::spawn_blocking(move || zip_directory(&root, &images_root))
            .await
            .map_err(|e| PortalError::Internal(e.to_string()))?
    }
}

// 3. The Mock Implementation (For Tests)
/// MockImageStore
///
/// In-memory `ImageStore` used by unit and integration tests. Records every
/// saved path so tests can assert on derived layouts, and builds real ZIP
/// archives from its map so export tests exercise the same entry naming.
#[derive(Clone, Default)]
pub struct MockImageStore {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    should_fail: bool,
}

impl MockImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Saved relative paths, in sorted order.
    pub fn stored_paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ImageStore for MockImageStore {
    async fn save(&self, relative_path: &str, bytes: &[u8]) -> Result<(), PortalError> {
        if self.should_fail {
            return Err(PortalError::StorageUnavailable(
                "mock storage failure requested".to_string(),
            ));
        }
        self.files
            .lock()
            .unwrap()
            .insert(sanitize_relative_path(relative_path), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, relative_path: &str) -> Result<(), PortalError> {
        self.files
            .lock()
            .unwrap()
            .remove(&sanitize_relative_path(relative_path));
        Ok(())
    }

    async fn export_archive(&self) -> Result<Vec<u8>, PortalError> {
        if self.should_fail {
            return Err(PortalError::StorageUnavailable(
                "mock storage failure requested".to_string(),
            ));
        }

        let files = self.files.lock().unwrap().clone();
        if files.is_empty() {
            return Err(PortalError::StorageUnavailable(
                "no images found".to_string(),
            ));
        }

        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, bytes) in files {
            writer
                .start_file(name, options)
                .map_err(|e| PortalError::Internal(e.to_string()))?;
            writer
                .write_all(&bytes)
                .map_err(|e| PortalError::Internal(e.to_string()))?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| PortalError::Internal(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}
