//! Default source opener backed by `object_store`.
//!
//! Accepts bare local paths as well as `file://`, `s3://`, `gs://`, `az://`
//! and `http(s)://` URLs. Objects are streamed, never buffered whole.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use snafu::prelude::*;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use super::traits::{OpenedSource, SourceOpener};
use crate::error::{InvalidLocationSnafu, LocalPathSnafu, OpenSnafu, SourceError, StoreConfigSnafu};

/// Opens sources through `object_store`, with per-backend options such as
/// `aws_region` or `google_service_account` passed through untouched.
#[derive(Debug, Clone, Default)]
pub struct StorageOpener {
    storage_options: HashMap<String, String>,
}

impl StorageOpener {
    pub fn new(storage_options: HashMap<String, String>) -> Self {
        Self { storage_options }
    }

    async fn to_url(location: &str) -> Result<Url, SourceError> {
        // Single-letter schemes are Windows drive letters, not URLs.
        match Url::parse(location) {
            Ok(url) if url.scheme().len() > 1 => return Ok(url),
            _ => {}
        }

        let path = tokio::fs::canonicalize(location)
            .await
            .context(LocalPathSnafu { location })?;
        Url::from_file_path(&path)
            .ok()
            .context(InvalidLocationSnafu { location })
    }
}

#[async_trait]
impl SourceOpener for StorageOpener {
    async fn open(&self, location: &str) -> Result<OpenedSource, SourceError> {
        let url = Self::to_url(location).await?;
        let (store, path) = object_store::parse_url_opts(&url, &self.storage_options)
            .context(StoreConfigSnafu { location })?;

        let result = store.get(&path).await.context(OpenSnafu { location })?;
        let content_length = result.meta.size;
        debug!(location, bytes = content_length, "Opened source");

        let stream = result.into_stream().map_err(std::io::Error::other);
        Ok(OpenedSource {
            reader: Box::new(StreamReader::new(stream)),
            content_length: Some(content_length),
            location: location.to_string(),
        })
    }
}
