//! Directory-backed object store for reference documents uploaded by admins.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::types::DocumentInfo;

const SNIPPET_CHARS: usize = 200;

pub struct DocumentStore {
    root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentHit {
    pub name: String,
    pub snippet: String,
    #[serde(skip)]
    pub matches: usize,
}

pub fn is_safe_document_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name.len() <= 255
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.chars().any(char::is_control)
}

impl DocumentStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_document_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    pub async fn list(&self) -> Result<Vec<DocumentInfo>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let uploaded = metadata
                .modified()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            documents.push(DocumentInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                uploaded,
            });
        }
        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }

    pub async fn put(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    /// Deleting a missing document is not an error.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Case-insensitive search over UTF-8 documents. Each hit carries the
    /// first matching line; hits are ranked by number of matching lines.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<DocumentHit>, StoreError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for document in self.list().await? {
            let bytes = tokio::fs::read(self.root.join(&document.name)).await?;
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            let mut matching = text
                .lines()
                .map(str::trim)
                .filter(|line| line.to_lowercase().contains(&needle));
            let Some(first) = matching.next() else {
                continue;
            };
            hits.push(DocumentHit {
                name: document.name,
                snippet: first.chars().take(SNIPPET_CHARS).collect(),
                matches: 1 + matching.count(),
            });
        }

        hits.sort_by(|a, b| b.matches.cmp(&a.matches).then_with(|| a.name.cmp(&b.name)));
        hits.truncate(limit);
        Ok(hits)
    }
}
