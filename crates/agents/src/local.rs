//! Manual-upload source backed by a local directory.
//!
//! Each regular file becomes one item with a single part. The Source step's
//! `query` names a sub-directory of the root; `.` lists the root itself.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::traits::SourceProvider;
use crate::types::{ItemRef, MimePart, Provider, RawItem};
use crate::AgentError;

pub struct LocalDirSource {
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `relative` under the root, refusing anything that escapes it.
    fn resolve(&self, relative: &str) -> Result<PathBuf, AgentError> {
        let relative = Path::new(relative.trim());
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(AgentError::Fatal(format!(
                "path '{}' escapes the upload directory",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl SourceProvider for LocalDirSource {
    fn provider(&self) -> Provider {
        Provider::Upload
    }

    async fn is_authenticated(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn list_items(&self, query: &str, max: usize) -> Result<Vec<ItemRef>, AgentError> {
        let dir = self.resolve(query)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| AgentError::Fatal(format!("cannot read {}: {e}", dir.display())))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::Retryable(e.to_string()))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                    names.push(relative.to_string_lossy().into_owned());
                }
            }
        }
        names.sort();
        debug!(dir = %dir.display(), found = names.len(), "listed upload directory");

        Ok(names.into_iter().take(max).map(ItemRef::new).collect())
    }

    async fn fetch_item(&self, item: &ItemRef) -> Result<RawItem, AgentError> {
        let path = self.resolve(&item.id)?;
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| AgentError::Fatal(format!("cannot read {}: {e}", path.display())))?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.id.clone());
        let mime_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        let mut headers = BTreeMap::new();
        headers.insert("Subject".to_string(), filename.clone());

        Ok(RawItem {
            id: item.id.clone(),
            headers,
            body: String::new(),
            parts: vec![MimePart::leaf(filename, mime_type, Bytes::from(body))],
        })
    }
}
