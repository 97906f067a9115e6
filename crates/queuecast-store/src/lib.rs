//! Persisted fingerprint set used to suppress duplicate submissions
//! across sync runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub const CRATE_NAME: &str = "queuecast-store";

/// Content-addressed digest over `content + "|" + schedule ISO 8601`.
/// The same text posted at two different times is not a duplicate;
/// identical text+time submitted twice is.
pub fn fingerprint(content: &str, schedule_iso: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(b"|");
    hasher.update(schedule_iso.as_bytes());
    hex::encode(hasher.finalize())
}

/// Flat set of hex digests, read entirely into memory and rewritten
/// entirely on flush. Membership only ever grows.
#[derive(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    hashes: HashSet<String>,
}

impl FingerprintStore {
    /// Load persisted membership. A missing, unreadable, or corrupt file
    /// degrades to an empty set with a warning; duplicates are possible
    /// after corruption, but pending posts are never silently dropped.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let hashes = match fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<Vec<String>>(&text) {
                Ok(entries) => entries.into_iter().collect(),
                Err(err) => {
                    warn!(path = %path.display(), %err, "fingerprint store corrupt, starting empty");
                    HashSet::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => {
                warn!(path = %path.display(), %err, "fingerprint store unreadable, starting empty");
                HashSet::new()
            }
        };
        Self { path, hashes }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.hashes.contains(fingerprint)
    }

    /// Idempotent insert; returns whether the fingerprint was new.
    pub fn add(&mut self, fingerprint: String) -> bool {
        self.hashes.insert(fingerprint)
    }

    /// Durably persist current membership as a JSON array, via a temp file
    /// and atomic rename. Called once at the end of a sync pass, including
    /// after partial failure, so already-sent rows are not resubmitted.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let mut entries: Vec<&str> = self.hashes.iter().map(String::as_str).collect();
        entries.sort_unstable();
        let body = serde_json::to_vec_pretty(&entries).context("serializing fingerprint store")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating store directory {}", parent.display()))?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("creating temp store file {}", temp_path.display()))?;
        file.write_all(&body)
            .await
            .with_context(|| format!("writing temp store file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp store file {}", temp_path.display()))?;
        drop(file);

        fs::rename(&temp_path, &self.path).await.with_context(|| {
            format!(
                "atomically renaming temp store {} -> {}",
                temp_path.display(),
                self.path.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fingerprint_is_stable_and_schedule_sensitive() {
        let a = fingerprint("hello", "2026-02-03T15:00:00Z");
        let b = fingerprint("hello", "2026-02-03T15:00:00Z");
        let c = fingerprint("hello", "2026-02-04T15:00:00Z");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = FingerprintStore::load(dir.path().join("sent-hashes.json")).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sent-hashes.json");
        std::fs::write(&path, "{not json").expect("write");
        let store = FingerprintStore::load(&path).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let mut store = FingerprintStore::load(dir.path().join("sent-hashes.json")).await;
        assert!(store.add("abc123".into()));
        assert!(!store.add("abc123".into()));
        assert_eq!(store.len(), 1);
        assert!(store.contains("abc123"));
    }

    #[tokio::test]
    async fn flush_then_reload_preserves_membership() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sent-hashes.json");

        let mut store = FingerprintStore::load(&path).await;
        store.add(fingerprint("hello", "2026-02-03T15:00:00Z"));
        store.add(fingerprint("other", "2026-02-04T15:00:00Z"));
        store.flush().await.expect("flush");

        let reloaded = FingerprintStore::load(&path).await;
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(&fingerprint("hello", "2026-02-03T15:00:00Z")));
    }

    #[tokio::test]
    async fn flushed_file_is_a_flat_json_array() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sent-hashes.json");

        let mut store = FingerprintStore::load(&path).await;
        store.add("ffff".into());
        store.add("aaaa".into());
        store.flush().await.expect("flush");

        let text = std::fs::read_to_string(&path).expect("read");
        let entries: Vec<String> = serde_json::from_str(&text).expect("parse");
        assert_eq!(entries, vec!["aaaa".to_string(), "ffff".to_string()]);
    }
}
