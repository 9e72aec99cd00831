//! Shared namespace access.
//!
//! The namespace is a POSIX-like directory tree mounted into every service
//! instance. Artifacts live under one of three category directories and are
//! only ever made visible through [`publish`], which writes a uniquely named
//! temporary file next to the target and renames it into place. A concurrent
//! reader therefore sees either nothing or the complete content.
//!
//! ```text
//! {mount_root}/
//!   models/          published artifacts (default category)
//!   inputs/          published artifacts keyed under `inputs/`
//!   outputs/         processing result records
//!   .index/ids/      artifact identifier -> namespace-relative path
//!   .index/paths/    path digest -> identifier assigned on first publish
//! ```

use bytes::Bytes;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Prefix of in-flight temporary files
pub const TEMP_PREFIX: &str = ".tmp-";

/// Directory holding the identifier index
pub const INDEX_DIR: &str = ".index";

/// Category directory an artifact is published into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Models,
    Inputs,
    Outputs,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Models, Category::Inputs, Category::Outputs];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Models => "models",
            Category::Inputs => "inputs",
            Category::Outputs => "outputs",
        }
    }
}

/// Logical key rejected during path derivation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key must not be empty")]
    Empty,

    #[error("key {0:?} must be relative and must not contain '.' or '..' components")]
    Traversal(String),

    #[error("key {0:?} does not name a file")]
    NoFileName(String),
}

/// Filesystem failure against the shared namespace
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("failed to create namespace directory {path}: {source}")]
    Layout {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} exists but is not a regular file")]
    NotAFile { path: PathBuf },
}

/// A resolved location inside the namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPath {
    category: Category,
    relative: PathBuf,
    absolute: PathBuf,
}

impl ArtifactPath {
    pub fn category(&self) -> Category {
        self.category
    }

    /// Full path under the mount root
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Path relative to the mount root, e.g. `models/foo.bin`
    pub fn namespace_relative(&self) -> String {
        Path::new(self.category.dir_name())
            .join(&self.relative)
            .to_string_lossy()
            .into_owned()
    }

    pub fn display(&self) -> String {
        self.absolute.to_string_lossy().into_owned()
    }
}

/// Whether [`publish`] may replace an existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Leave an existing target untouched
    CreateOnly,
    /// Atomically replace whatever is at the target
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { size: u64 },
    AlreadyPresent { size: u64 },
}

/// Handle on the mounted namespace
#[derive(Debug)]
pub struct Namespace {
    root: PathBuf,
    ready: OnceCell<()>,
}

impl Namespace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ready: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive the target path for a logical key.
    ///
    /// `models/<rest>` and `inputs/<rest>` keep `<rest>` under their category;
    /// any other key falls back to `models/<basename(key)>`.
    pub fn resolve(&self, key: &str) -> Result<ArtifactPath, KeyError> {
        if key.is_empty() {
            return Err(KeyError::Empty);
        }

        let (category, rest) = if let Some(rest) = key.strip_prefix("models/") {
            (Category::Models, rest)
        } else if let Some(rest) = key.strip_prefix("inputs/") {
            (Category::Inputs, rest)
        } else {
            let basename = match key.rfind('/') {
                Some(idx) => &key[idx + 1..],
                None => key,
            };
            (Category::Models, basename)
        };

        let relative = validate_relative(key, rest)?;
        let absolute = self.category_dir(category).join(&relative);

        Ok(ArtifactPath {
            category,
            relative,
            absolute,
        })
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// Path of a file directly under `outputs/`
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.category_dir(Category::Outputs).join(file_name)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    fn layout_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Category::ALL
            .iter()
            .map(|category| self.category_dir(*category))
            .collect();
        dirs.push(self.index_dir().join("ids"));
        dirs.push(self.index_dir().join("paths"));
        dirs
    }

    /// Create the category and index directories.
    ///
    /// Runs at most once successfully per process; a failed attempt is not
    /// remembered, so the next caller tries again.
    pub async fn ensure_layout(&self) -> Result<(), NamespaceError> {
        self.ready
            .get_or_try_init(|| async {
                for dir in self.layout_dirs() {
                    fs::create_dir_all(&dir)
                        .await
                        .map_err(|source| NamespaceError::Layout {
                            path: dir.clone(),
                            source,
                        })?;
                    info!(path = %dir.display(), "Ensured namespace directory exists");
                }
                Ok::<(), NamespaceError>(())
            })
            .await
            .map(|_| ())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }
}

fn validate_relative(key: &str, rest: &str) -> Result<PathBuf, KeyError> {
    if rest.is_empty() || rest.ends_with('/') {
        return Err(KeyError::NoFileName(key.to_string()));
    }

    let path = Path::new(rest);
    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(KeyError::Traversal(key.to_string()));
    }

    Ok(path.to_path_buf())
}

/// Size of the file at `path`, or `None` when nothing is there.
///
/// Any other kind of entry (a directory left by a nested key, for one) is
/// reported as [`NamespaceError::NotAFile`] and never counts as published.
pub async fn existing_size(path: &Path) -> Result<Option<u64>, NamespaceError> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
        Ok(_) => Err(NamespaceError::NotAFile {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(NamespaceError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read a whole file, or `None` when nothing is there
pub async fn read(path: &Path) -> Result<Option<Bytes>, NamespaceError> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(NamespaceError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Publish `bytes` at `target` via write-temp-then-rename.
///
/// The temporary file lives in the target's directory so the rename never
/// crosses a volume. Concurrent first-time publishers of the same target all
/// succeed; which complete write ends up visible is unspecified.
#[instrument(skip(target, bytes), fields(path = %target.display(), size_bytes = bytes.len()))]
pub async fn publish(
    target: &Path,
    bytes: &[u8],
    mode: PublishMode,
) -> Result<PublishOutcome, NamespaceError> {
    if mode == PublishMode::CreateOnly {
        if let Some(size) = existing_size(target).await? {
            debug!(size_bytes = size, "Target already present, skipping write");
            return Ok(PublishOutcome::AlreadyPresent { size });
        }
    }

    let write_error = |source: io::Error| NamespaceError::Write {
        path: target.to_path_buf(),
        source,
    };

    let parent = target.parent().ok_or_else(|| {
        write_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "target has no parent directory",
        ))
    })?;
    fs::create_dir_all(parent).await.map_err(write_error)?;

    let temp = parent.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4()));
    debug!(temp = %temp.display(), "Writing temporary file");

    if let Err(source) = write_then_rename(&temp, target, bytes).await {
        discard_temp(&temp).await;
        return Err(write_error(source));
    }

    sync_dir(parent).await;

    debug!("Atomic rename complete");
    Ok(PublishOutcome::Published {
        size: bytes.len() as u64,
    })
}

async fn write_then_rename(temp: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(temp, target).await
}

/// Best-effort removal of a temporary file after a failed publish
async fn discard_temp(temp: &Path) {
    match fs::remove_file(temp).await {
        Ok(()) => debug!(temp = %temp.display(), "Removed temporary file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            temp = %temp.display(),
            error = %e,
            "Failed to remove temporary file, leaving orphan"
        ),
    }
}

/// Persist the rename itself; failures only cost durability of the entry
#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    let result = match fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!(dir = %dir.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn namespace() -> Namespace {
        Namespace::new("/mnt/efs")
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(TEMP_PREFIX))
            .collect()
    }

    #[test]
    fn test_resolve_category_prefixes() {
        let ns = namespace();

        let models = ns.resolve("models/foo.bin").unwrap();
        assert_eq!(models.category(), Category::Models);
        assert_eq!(models.absolute(), Path::new("/mnt/efs/models/foo.bin"));
        assert_eq!(models.namespace_relative(), "models/foo.bin");

        let inputs = ns.resolve("inputs/batch/001.csv").unwrap();
        assert_eq!(inputs.category(), Category::Inputs);
        assert_eq!(inputs.absolute(), Path::new("/mnt/efs/inputs/batch/001.csv"));
    }

    #[test]
    fn test_resolve_unknown_prefix_falls_back_to_basename() {
        let ns = namespace();

        let path = ns.resolve("uploads/2024/data.bin").unwrap();
        assert_eq!(path.category(), Category::Models);
        assert_eq!(path.absolute(), Path::new("/mnt/efs/models/data.bin"));

        let bare = ns.resolve("data.bin").unwrap();
        assert_eq!(bare.absolute(), Path::new("/mnt/efs/models/data.bin"));
    }

    #[test]
    fn test_resolve_rejects_bad_keys() {
        let ns = namespace();

        assert_eq!(ns.resolve(""), Err(KeyError::Empty));
        assert!(matches!(ns.resolve("models/"), Err(KeyError::NoFileName(_))));
        assert!(matches!(ns.resolve("uploads/"), Err(KeyError::NoFileName(_))));
        assert!(matches!(
            ns.resolve("models/../../etc/passwd"),
            Err(KeyError::Traversal(_))
        ));
        assert!(matches!(ns.resolve(".."), Err(KeyError::Traversal(_))));
        assert!(matches!(ns.resolve("inputs//abs"), Err(KeyError::Traversal(_))));
    }

    #[tokio::test]
    async fn test_ensure_layout_creates_directories_once() {
        let temp_dir = TempDir::new().unwrap();
        let ns = Namespace::new(temp_dir.path());

        assert!(!ns.is_ready());
        ns.ensure_layout().await.unwrap();
        assert!(ns.is_ready());

        for category in Category::ALL {
            assert!(ns.category_dir(category).is_dir());
        }
        assert!(ns.index_dir().join("ids").is_dir());

        // A second call is answered from the readiness guard
        std::fs::remove_dir(ns.category_dir(Category::Inputs)).unwrap();
        ns.ensure_layout().await.unwrap();
        assert!(!ns.category_dir(Category::Inputs).exists());
    }

    #[tokio::test]
    async fn test_ensure_layout_failure_is_retried() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("mount");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let ns = Namespace::new(&blocker);
        assert!(matches!(
            ns.ensure_layout().await,
            Err(NamespaceError::Layout { .. })
        ));
        assert!(!ns.is_ready());

        std::fs::remove_file(&blocker).unwrap();
        ns.ensure_layout().await.unwrap();
        assert!(ns.is_ready());
    }

    #[tokio::test]
    async fn test_publish_writes_and_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("models").join("foo.bin");

        let outcome = publish(&target, b"hello", PublishMode::CreateOnly)
            .await
            .unwrap();

        assert_eq!(outcome, PublishOutcome::Published { size: 5 });
        assert_eq!(std::fs::read(&target).unwrap(), b"hello");
        assert!(temp_files(target.parent().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_publish_create_only_keeps_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("foo.bin");

        publish(&target, b"first", PublishMode::CreateOnly)
            .await
            .unwrap();
        let outcome = publish(&target, b"second write", PublishMode::CreateOnly)
            .await
            .unwrap();

        assert_eq!(outcome, PublishOutcome::AlreadyPresent { size: 5 });
        assert_eq!(std::fs::read(&target).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_publish_replace_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("foo.result");

        publish(&target, b"old", PublishMode::Replace).await.unwrap();
        let outcome = publish(&target, b"newer", PublishMode::Replace)
            .await
            .unwrap();

        assert_eq!(outcome, PublishOutcome::Published { size: 5 });
        assert_eq!(std::fs::read(&target).unwrap(), b"newer");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_publish_failure_cleans_up_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        // Renaming a file onto a non-empty directory fails after the temp file is written
        let target = temp_dir.path().join("occupied");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("child"), b"x").unwrap();

        let result = publish(&target, b"payload", PublishMode::Replace).await;

        assert!(matches!(result, Err(NamespaceError::Write { .. })));
        assert!(temp_files(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_read_and_existing_size() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("foo.bin");

        assert_eq!(existing_size(&target).await.unwrap(), None);
        assert_eq!(read(&target).await.unwrap(), None);

        std::fs::write(&target, b"abc").unwrap();
        assert_eq!(existing_size(&target).await.unwrap(), Some(3));
        assert_eq!(read(&target).await.unwrap(), Some(Bytes::from_static(b"abc")));
    }

    #[tokio::test]
    async fn test_directory_is_never_an_existing_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("models").join("sub");
        std::fs::create_dir_all(target.join("nested")).unwrap();

        assert!(matches!(
            existing_size(&target).await,
            Err(NamespaceError::NotAFile { .. })
        ));

        let result = publish(&target, b"hello", PublishMode::CreateOnly).await;
        assert!(matches!(result, Err(NamespaceError::NotAFile { .. })));
        assert!(target.is_dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_never_expose_partial_content() {
        const PUBLISHERS: usize = 8;
        const READERS: usize = 8;
        const SIZE: usize = 256 * 1024;

        let temp_dir = TempDir::new().unwrap();
        let target = Arc::new(temp_dir.path().join("models").join("race.bin"));

        let mut handles = Vec::new();
        for i in 0..PUBLISHERS {
            let target = target.clone();
            handles.push(tokio::spawn(async move {
                let payload = vec![i as u8; SIZE];
                publish(&target, &payload, PublishMode::CreateOnly)
                    .await
                    .map(|_| ())
            }));
        }

        let mut readers = Vec::new();
        for _ in 0..READERS {
            let target = target.clone();
            readers.push(tokio::spawn(async move {
                let mut observed = Vec::new();
                for _ in 0..50 {
                    if let Some(data) = read(&target).await.unwrap() {
                        observed.push(data);
                    }
                    tokio::task::yield_now().await;
                }
                observed
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        for reader in readers {
            for data in reader.await.unwrap() {
                assert_eq!(data.len(), SIZE, "reader observed a partial write");
                assert!(data.iter().all(|b| *b == data[0]), "reader observed mixed writes");
            }
        }

        let final_content = std::fs::read(target.as_ref()).unwrap();
        assert_eq!(final_content.len(), SIZE);
        assert!(final_content.iter().all(|b| *b == final_content[0]));
        assert!(temp_files(target.parent().unwrap()).is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_resolve_is_pure_and_stays_under_root(key in "[a-z]{1,8}(/[a-z0-9._-]{1,8}){0,3}") {
                let ns = namespace();
                let first = ns.resolve(&key);
                let second = ns.resolve(&key);
                prop_assert_eq!(&first, &second);

                if let Ok(path) = first {
                    prop_assert!(path.absolute().starts_with("/mnt/efs"));
                    prop_assert!(path.absolute().starts_with(ns.category_dir(path.category())));
                }
            }

            #[test]
            fn prop_create_only_is_idempotent(payload in prop::collection::vec(any::<u8>(), 0..4096)) {
                let temp_dir = TempDir::new().unwrap();
                let target = temp_dir.path().join("models").join("prop.bin");

                let (first, second) = tokio_test::block_on(async {
                    let first = publish(&target, &payload, PublishMode::CreateOnly).await.unwrap();
                    let second = publish(&target, b"other", PublishMode::CreateOnly).await.unwrap();
                    (first, second)
                });

                prop_assert_eq!(first, PublishOutcome::Published { size: payload.len() as u64 });
                prop_assert_eq!(second, PublishOutcome::AlreadyPresent { size: payload.len() as u64 });
                prop_assert_eq!(std::fs::read(&target).unwrap(), payload);
            }
        }
    }
}
