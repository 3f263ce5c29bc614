// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Url};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::config::Config;
use crate::error::{ShipperError, TransferError};
use crate::http_utils::build_client;

/// One transfer handle shared by the event-driven uploader and the sweeper. Holding the lock is
/// what makes a transfer exclusive: the uploader holds it for each upload-and-delete sequence,
/// the sweeper for an entire sweep.
pub type SharedClient<T> = Arc<Mutex<T>>;

pub fn shared<T: Transfer>(transfer: T) -> SharedClient<T> {
    Arc::new(Mutex::new(transfer))
}

#[async_trait]
pub trait Transfer: Send + Sync {
    /// Sends the file at `path`, which lives in the spool directory called `directory`, to the
    /// collector. Never modifies or deletes the file.
    async fn upload(&self, path: &Path, directory: &str) -> Result<(), TransferError>;
}

/// Uploads files to the collector with HTTP `PUT`, one at a time, over a single reused client.
#[derive(Debug)]
pub struct UploadClient {
    client: reqwest::Client,
    uploads_url: Url,
    node_id: String,
    build_id: String,
}

impl UploadClient {
    pub fn new(config: &Config, node_id: String) -> Result<Self, ShipperError> {
        let uploads_url = Url::parse(&config.uploads_url).map_err(|e| {
            ShipperError::InvalidConfig(format!(
                "invalid collector URL '{}': {e}",
                config.uploads_url
            ))
        })?;
        let client = build_client(
            config.https_proxy.as_deref(),
            config.upload_timeout,
            config.skip_tls_verify,
        )
        .map_err(|e| ShipperError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            uploads_url,
            node_id,
            build_id: config.build_id.clone(),
        })
    }

    /// The collector URL carrying the metadata of one upload as escaped query parameters.
    pub fn upload_url(&self, path: &Path, directory: &str) -> Result<Url, TransferError> {
        let filename = path.to_str().ok_or(TransferError::Escape("filename"))?;

        let mut url = self.uploads_url.clone();
        url.query_pairs_mut()
            .append_pair("filename", filename)
            .append_pair("node_id", &self.node_id)
            .append_pair("build_id", &self.build_id)
            .append_pair("directory", directory);
        Ok(url)
    }
}

#[async_trait]
impl Transfer for UploadClient {
    async fn upload(&self, path: &Path, directory: &str) -> Result<(), TransferError> {
        let url = self.upload_url(path, directory)?;
        let open_error = |source| TransferError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(open_error)?;
        let metadata = file.metadata().await.map_err(open_error)?;
        if !metadata.is_file() {
            return Err(open_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let file_len = metadata.len();

        // Streamed from disk so a large spool file is never held in memory
        debug!("Uploading {} ({} bytes)", path.display(), file_len);
        let response = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, file_len)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status));
        }
        Ok(())
    }
}
