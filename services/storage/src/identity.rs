//! Artifact identifiers and the identifier index.
//!
//! A first publish is assigned a random identifier. The index records it
//! twice, once keyed by identifier (pointing at the namespace-relative path)
//! and once keyed by [`replay_id`] of the final path, so that replays of the
//! same key return the identifier of the original publish and so that the
//! processing stage can accept an identifier in place of a key.

use crate::namespace::{self, ArtifactPath, Namespace, NamespaceError, PublishMode};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Random identifier for a first-time publish
pub fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Stable identifier derived from the final namespace path
pub fn replay_id(path: &Path) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, path.to_string_lossy().as_bytes()).to_string()
}

/// Identifier index stored under `{mount_root}/.index`
pub struct IdentityIndex<'a> {
    namespace: &'a Namespace,
}

impl<'a> IdentityIndex<'a> {
    pub fn new(namespace: &'a Namespace) -> Self {
        Self { namespace }
    }

    fn id_entry(&self, file_id: &str) -> Option<PathBuf> {
        single_component(file_id).then(|| self.namespace.index_dir().join("ids").join(file_id))
    }

    fn path_entry(&self, artifact: &ArtifactPath) -> PathBuf {
        self.namespace
            .index_dir()
            .join("paths")
            .join(replay_id(artifact.absolute()))
    }

    /// Record `file_id` for `artifact`. Existing entries are kept, so the
    /// first identifier recorded for a path stays authoritative.
    ///
    /// Publishers call this after the artifact's rename, so there is a window
    /// in which the artifact is visible but unindexed. A replay landing there
    /// (or after a failed record) reports [`replay_id`] of the path instead of
    /// the fresh identifier; only the recorded one resolves through
    /// [`IdentityIndex::locate`], while the key always does.
    pub async fn record(&self, file_id: &str, artifact: &ArtifactPath) -> Result<(), NamespaceError> {
        if let Some(entry) = self.id_entry(file_id) {
            namespace::publish(
                &entry,
                artifact.namespace_relative().as_bytes(),
                PublishMode::CreateOnly,
            )
            .await?;
        }

        namespace::publish(
            &self.path_entry(artifact),
            file_id.as_bytes(),
            PublishMode::CreateOnly,
        )
        .await?;

        debug!(file_id, path = %artifact.display(), "Recorded artifact identity");
        Ok(())
    }

    /// Identifier first recorded for `artifact`, if any
    pub async fn identity_for(&self, artifact: &ArtifactPath) -> Result<Option<String>, NamespaceError> {
        let entry = self.path_entry(artifact);
        let Some(content) = namespace::read(&entry).await? else {
            return Ok(None);
        };

        let file_id = String::from_utf8_lossy(&content).trim().to_string();
        if file_id.is_empty() {
            warn!(entry = %entry.display(), "Ignoring empty identity index entry");
            return Ok(None);
        }
        Ok(Some(file_id))
    }

    /// Artifact path recorded for `file_id`, if any
    pub async fn locate(&self, file_id: &str) -> Result<Option<ArtifactPath>, NamespaceError> {
        let Some(entry) = self.id_entry(file_id) else {
            return Ok(None);
        };
        let Some(content) = namespace::read(&entry).await? else {
            return Ok(None);
        };

        let relative = String::from_utf8_lossy(&content);
        match self.namespace.resolve(relative.trim()) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                warn!(entry = %entry.display(), error = %e, "Ignoring malformed identity index entry");
                Ok(None)
            }
        }
    }
}

fn single_component(name: &str) -> bool {
    !name.starts_with('.')
        && matches!(
            Path::new(name).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        )
}
