//! Content-addressed blob directory. Cached thumbnails live here.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub digest: String,
    /// Path below the store root.
    pub relative_path: PathBuf,
    /// `true` when the blob was already on disk.
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

fn blob_name(digest: &str, ext: &str) -> String {
    match ext.trim().trim_start_matches('.') {
        "" => digest.to_string(),
        ext => format!("{digest}.{}", ext.to_ascii_lowercase()),
    }
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `namespace/ab/cd/abcd….ext`, two levels of fan-out from the digest.
    pub fn layout(namespace: &str, digest: &str, ext: &str) -> PathBuf {
        let mut path = PathBuf::from(namespace);
        path.push(digest.get(0..2).unwrap_or("__"));
        path.push(digest.get(2..4).unwrap_or("__"));
        path.push(blob_name(digest, ext));
        path
    }

    /// Writes `bytes` once per digest. The blob appears atomically: it is written
    /// beside its final name and renamed into place.
    pub async fn store_bytes(
        &self,
        namespace: &str,
        ext: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let digest = hex::encode(Sha256::digest(bytes));
        let relative_path = Self::layout(namespace, &digest, ext);
        let target = self.root.join(&relative_path);
        let result = |deduplicated| StoredArtifact {
            digest: digest.clone(),
            relative_path: relative_path.clone(),
            deduplicated,
        };

        if fs::metadata(&target).await.is_ok() {
            return Ok(result(true));
        }
        let dir = target.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let partial = dir.join(format!(".partial-{}", Uuid::new_v4().simple()));
        fs::write(&partial, bytes)
            .await
            .with_context(|| format!("writing {}", partial.display()))?;
        match fs::rename(&partial, &target).await {
            Ok(()) => Ok(result(false)),
            Err(err) => {
                let _ = fs::remove_file(&partial).await;
                if err.kind() == ErrorKind::AlreadyExists {
                    return Ok(result(true));
                }
                Err(err).with_context(|| format!("moving blob into {}", target.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_fans_out_on_the_digest() {
        assert_eq!(
            ArtifactStore::layout("thumbs/ppomppu", "abcdef01", ".JPG"),
            PathBuf::from("thumbs/ppomppu/ab/cd/abcdef01.jpg")
        );
        assert_eq!(
            ArtifactStore::layout("thumbs", "abcdef01", ""),
            PathBuf::from("thumbs/ab/cd/abcdef01")
        );
    }

    #[tokio::test]
    async fn same_image_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let first = store.store_bytes("thumbs/quasarzone", "png", b"\x89PNG same").await.unwrap();
        let second = store.store_bytes("thumbs/clien", "png", b"\x89PNG same").await.unwrap();
        let again = store.store_bytes("thumbs/quasarzone", "png", b"\x89PNG same").await.unwrap();

        assert!(!first.deduplicated);
        assert!(!second.deduplicated);
        assert!(again.deduplicated);
        assert_eq!(first, StoredArtifact { deduplicated: false, ..again });
        assert_eq!(first.digest, second.digest);
        assert!(dir.path().join(&first.relative_path).is_file());
    }
}
