//! Local fallback sink - append-only, write-once JSON files.
//!
//! Serves two roles: a standalone durable sink for offline deployments, and
//! the demotion target when another sink exhausts its retry budget. Files
//! are keyed identically to object-store keys so a recovery job can replay
//! them 1:1; demoted records nest under a per-origin-sink subdirectory.

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Sink, SinkError, WriteAck};
use crate::types::TierRecord;

pub struct LocalFallbackSink {
    root: PathBuf,
}

impl LocalFallbackSink {
    /// Create or open the fallback root directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, SinkError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| SinkError::Permanent(format!("fallback root {}: {e}", root.display())))?;
        info!(root = %root.display(), "Local fallback sink ready");
        Ok(Self { root })
    }

    /// Write a record under an origin-sink subdirectory (retry-exhaustion
    /// demotion path). Keyed identically to the primary write.
    pub fn demote(&self, origin_sink: &str, key: &str, record: &TierRecord) -> Result<WriteAck, SinkError> {
        self.write_at(&self.root.join(origin_sink), key, record)
    }

    fn write_at(&self, base: &Path, key: &str, record: &TierRecord) -> Result<WriteAck, SinkError> {
        let path = base.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SinkError::Permanent(format!("{}: {e}", parent.display())))?;
        }

        // Write-once: a record for the same (tier, sequence_no) is already
        // durable, so a re-write is an idempotent ack.
        if path.exists() {
            debug!(key, "Fallback file already present, skipping");
            return Ok(WriteAck {
                sink: "local_fallback",
                key: key.to_string(),
            });
        }

        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| SinkError::Permanent(format!("serialize {key}: {e}")))?;

        // Atomic: write temp file, then rename
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &json)
            .map_err(|e| SinkError::Transient(format!("{}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| SinkError::Transient(format!("{}: {e}", path.display())))?;

        debug!(key, bytes = json.len(), "Fallback file written");
        Ok(WriteAck {
            sink: "local_fallback",
            key: key.to_string(),
        })
    }

    /// Number of fallback files under the root (recursive). Test/ops helper.
    pub fn file_count(&self) -> usize {
        fn walk(dir: &Path) -> usize {
            let Ok(entries) = fs::read_dir(dir) else {
                return 0;
            };
            entries
                .filter_map(|e| e.ok())
                .map(|e| {
                    let path = e.path();
                    if path.is_dir() {
                        walk(&path)
                    } else if path.extension().and_then(|x| x.to_str()) == Some("json") {
                        1
                    } else {
                        0
                    }
                })
                .sum()
        }
        walk(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Sink for LocalFallbackSink {
    async fn write(&self, key: &str, record: &TierRecord) -> Result<WriteAck, SinkError> {
        self.write_at(&self.root, key, record)
    }

    fn sink_name(&self) -> &'static str {
        "local_fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Tier, TierPayload};
    use chrono::Utc;

    fn record(seq: u64) -> TierRecord {
        TierRecord {
            tier: Tier::Bronze,
            sequence_no: seq,
            model_version: "test-v1".to_string(),
            created_at: Utc::now(),
            payload: TierPayload::Raw(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_write_creates_keyed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = LocalFallbackSink::open(tmp.path().join("fallback")).unwrap();

        let r = record(1);
        let ack = sink.write(&r.object_key(), &r).await.unwrap();
        assert_eq!(ack.key, "bronze/batch_00000001.json");
        assert!(tmp
            .path()
            .join("fallback/bronze/batch_00000001.json")
            .exists());
    }

    #[tokio::test]
    async fn test_rewrite_same_key_is_idempotent_ack() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = LocalFallbackSink::open(tmp.path().join("fallback")).unwrap();

        let r = record(2);
        sink.write(&r.object_key(), &r).await.unwrap();
        sink.write(&r.object_key(), &r).await.unwrap();
        assert_eq!(sink.file_count(), 1);
    }

    #[tokio::test]
    async fn test_demotion_nests_under_origin_sink() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = LocalFallbackSink::open(tmp.path().join("fallback")).unwrap();

        let r = record(3);
        sink.demote("object_store", &r.object_key(), &r).unwrap();
        assert!(tmp
            .path()
            .join("fallback/object_store/bronze/batch_00000003.json")
            .exists());
    }
}
