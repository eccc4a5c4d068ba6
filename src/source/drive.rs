//! Google Drive v3 document source.
//!
//! Lists a folder with
//! `GET /drive/v3/files?q='<folder>' in parents and mimeType='<mime>' and trashed=false`,
//! following `nextPageToken` until exhausted, and downloads file contents
//! with `GET /drive/v3/files/<id>?alt=media`. A `*` listing keeps only
//! files whose MIME type can be extracted.
//!
//! Requests carry a bearer token taken from `GOOGLE_DRIVE_ACCESS_TOKEN`.
//! Minting that token (service-account JWT exchange) is left to the caller.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::extract::is_supported;
use crate::models::DocumentRef;
use crate::retry::{describe_failure, is_transient_status, retry, RetryPolicy};

use super::{DocumentSource, ANY_CONTENT_TYPE};

const PAGE_SIZE: u32 = 100;

pub struct DriveSource {
    api_url: String,
    access_token: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: Option<String>,
}

impl DriveSource {
    pub fn new(access_token: impl Into<String>, client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self {
            api_url: "https://www.googleapis.com".to_string(),
            access_token: access_token.into(),
            client,
            retry,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, SourceError> {
        let page_size = PAGE_SIZE.to_string();
        let mut params = vec![
            ("q", query),
            ("fields", "nextPageToken, files(id, name, mimeType)"),
            ("pageSize", page_size.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response = self
            .client
            .get(format!("{}/drive/v3/files", self.api_url))
            .bearer_auth(&self.access_token)
            .query(&params)
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("Drive request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SourceError::Permanent(format!("malformed Drive listing: {}", e)));
        }
        Err(classify(status, describe_failure(response).await))
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>, SourceError> {
        let response = self
            .client
            .get(format!("{}/drive/v3/files/{}", self.api_url, id))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| SourceError::Transient(format!("Drive request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(id.to_string()));
        }
        if status.is_success() {
            return response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| SourceError::Transient(format!("Drive download interrupted: {}", e)));
        }
        Err(classify(status, describe_failure(response).await))
    }
}

#[async_trait]
impl DocumentSource for DriveSource {
    fn name(&self) -> &str {
        "drive"
    }

    async fn list(&self, folder: &str, mime_type: &str) -> Result<Vec<DocumentRef>, SourceError> {
        let query = folder_query(folder, mime_type);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = retry(&self.retry, "drive.list", || {
                self.list_page(&query, page_token.as_deref())
            })
            .await?;
            debug!(files = page.files.len(), "drive listing page");

            for file in page.files {
                let content_type = file.mime_type.unwrap_or_else(|| mime_type.to_string());
                // A wildcard listing also returns Docs, Sheets, images and subfolders.
                if mime_type == ANY_CONTENT_TYPE && !is_supported(&content_type) {
                    debug!(name = %file.name, %content_type, "skipping unsupported file");
                    continue;
                }
                documents.push(DocumentRef {
                    id: file.id,
                    name: file.name,
                    content_type,
                });
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>, SourceError> {
        retry(&self.retry, "drive.download", || self.fetch(id)).await
    }
}

/// Build the `q` parameter for a folder listing.
fn folder_query(folder: &str, mime_type: &str) -> String {
    let mut query = format!("'{}' in parents", escape(folder));
    if mime_type != ANY_CONTENT_TYPE {
        query.push_str(&format!(" and mimeType='{}'", escape(mime_type)));
    }
    query.push_str(" and trashed=false");
    query
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn classify(status: reqwest::StatusCode, detail: String) -> SourceError {
    let detail = format!("Drive API error {}", detail);
    if is_transient_status(status) {
        SourceError::Transient(detail)
    } else {
        SourceError::Permanent(detail)
    }
}
