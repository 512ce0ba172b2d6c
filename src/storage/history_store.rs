use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

use crate::error::HistoryError;

/// Audit entry for one provider call. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: Uuid,
    pub name: String,
    pub service: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ai_model: String,
    pub ai_configuration: String,
    pub prompt: String,
    pub description: String,
    pub style: String,
    pub color_scheme: String,
    pub text: String,
    pub text_style: String,
    pub layout: String,
    pub theme: String,
    pub additional_elements: String,
    pub product: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError>;

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError>;
}

/// One pretty-printed JSON file per record.
///
/// File names start with a sortable UTC timestamp, so listing the directory
/// in reverse lexical order yields newest-first.
#[derive(Clone, Debug)]
pub struct JsonFileHistoryStore {
    dir: PathBuf,
}

impl JsonFileHistoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn record_path(&self, record: &HistoryRecord) -> PathBuf {
        let stamp = record.created_at.format("%Y%m%dT%H%M%S%.6fZ");
        let digest_source = format!("{}:{}:{}:{}", record.id, record.service, record.kind, record.name);
        let digest = hex::encode(Sha256::digest(digest_source.as_bytes()));
        self.dir.join(format!("{stamp}_{digest}.json"))
    }
}

#[async_trait]
impl HistoryStore for JsonFileHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let payload = serde_json::to_vec_pretty(record)?;
        fs::create_dir_all(&self.dir).await.map_err(HistoryError::Write)?;
        fs::write(self.record_path(record), payload)
            .await
            .map_err(HistoryError::Write)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(HistoryError::Read(err)),
        };
        let mut entries: Vec<PathBuf> = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(HistoryError::Read)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                entries.push(path);
            }
        }
        entries.sort_by(|a, b| b.cmp(a));

        let mut records = Vec::with_capacity(limit.min(entries.len()));
        for path in entries {
            if records.len() >= limit {
                break;
            }
            let bytes = fs::read(&path).await.map_err(HistoryError::Read)?;
            match serde_json::from_slice::<HistoryRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable history record");
                }
            }
        }
        Ok(records)
    }
}
