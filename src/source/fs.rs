//! Local filesystem document source.
//!
//! Walks a directory recursively, keeping files whose extension maps to the
//! requested content type. `.git`, `target` and `node_modules` are always
//! excluded; more exclusions come from `source.exclude_globs`. Listings are
//! sorted by relative path for deterministic indexing order.

use std::path::Path;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{Error, Result, SourceError};
use crate::extract::content_type_for_extension;
use crate::models::DocumentRef;

use super::{DocumentSource, ANY_CONTENT_TYPE};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

pub struct FsSource {
    excludes: GlobSet,
}

impl FsSource {
    pub fn new(exclude_globs: &[String]) -> Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        patterns.extend(exclude_globs.iter().cloned());
        Ok(Self {
            excludes: build_globset(&patterns)?,
        })
    }

    fn scan(&self, folder: &Path, mime_type: &str) -> std::result::Result<Vec<DocumentRef>, SourceError> {
        if !folder.is_dir() {
            return Err(SourceError::NotFound(format!(
                "directory does not exist: {}",
                folder.display()
            )));
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(folder) {
            let entry = entry.map_err(|e| SourceError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(folder).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();
            if self.excludes.is_match(&rel_str) {
                continue;
            }

            let content_type = match path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(content_type_for_extension)
            {
                Some(ct) => ct,
                None => continue,
            };
            if mime_type != ANY_CONTENT_TYPE && mime_type != content_type {
                continue;
            }

            documents.push(DocumentRef {
                id: path.to_string_lossy().to_string(),
                name: rel_str,
                content_type: content_type.to_string(),
            });
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(documents)
    }
}

#[async_trait]
impl DocumentSource for FsSource {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list(
        &self,
        folder: &str,
        mime_type: &str,
    ) -> std::result::Result<Vec<DocumentRef>, SourceError> {
        self.scan(Path::new(folder), mime_type)
    }

    async fn download(&self, id: &str) -> std::result::Result<Vec<u8>, SourceError> {
        match tokio::fs::read(id).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(id.to_string()))
            }
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::Configuration(format!("invalid exclude glob {}: {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Configuration(format!("invalid exclude globs: {}", e)))
}
