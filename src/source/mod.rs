//! Document sources: where the documents to index come from.
//!
//! A [`DocumentSource`] lists the documents of one folder (filtered by
//! content type) and downloads each one's bytes. Listing happens once per
//! indexing run; downloads happen per document so a single unreadable file
//! fails only that document.
//!
//! | Provider | Folder means | Implementation |
//! |----------|--------------|----------------|
//! | `drive` | Google Drive folder ID | [`DriveSource`] |
//! | `filesystem` | local directory | [`FsSource`] |

pub mod drive;
pub mod fs;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, Credentials};
use crate::error::{Error, Result, SourceError};
use crate::models::DocumentRef;
use crate::retry::RetryPolicy;

pub use drive::DriveSource;
pub use fs::FsSource;

/// Content-type filter that matches every supported format.
pub const ANY_CONTENT_TYPE: &str = "*";

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Short provider name for log output.
    fn name(&self) -> &str;

    /// List the documents in `folder` whose content type is `mime_type`
    /// (or any supported type for [`ANY_CONTENT_TYPE`]).
    async fn list(
        &self,
        folder: &str,
        mime_type: &str,
    ) -> std::result::Result<Vec<DocumentRef>, SourceError>;

    /// Fetch the raw bytes of a listed document.
    async fn download(&self, id: &str) -> std::result::Result<Vec<u8>, SourceError>;
}

/// Create the source selected by `config.source.provider`.
pub fn create_source(config: &Config, credentials: &Credentials) -> Result<Arc<dyn DocumentSource>> {
    match config.source.provider.as_str() {
        "drive" => {
            let token = credentials.drive_access_token.clone().ok_or_else(|| {
                Error::Configuration(
                    "GOOGLE_DRIVE_ACCESS_TOKEN environment variable not set".to_string(),
                )
            })?;
            let client = config.network.http_client()?;
            Ok(Arc::new(
                DriveSource::new(token, client, RetryPolicy::from(&config.retry))
                    .with_api_url(config.source.api_url.clone()),
            ))
        }
        "filesystem" => Ok(Arc::new(FsSource::new(&config.source.exclude_globs)?)),
        other => Err(Error::Configuration(format!(
            "unknown document source provider: {}",
            other
        ))),
    }
}
