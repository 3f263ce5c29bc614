// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{SharedClient, Transfer};
use crate::error::ShipperError;
use crate::spool::SpoolRegistry;
use crate::watcher::{EventStream, SpoolEvent, SpoolEventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The event did not describe a complete file arriving
    Ignored,
    /// Uploaded and removed from the spool
    Uploaded,
    /// Uploaded, but the file could not be removed and may be sent again later
    UploadedNotCollected,
    /// Upload failed; the file stays where it is for the sweeper
    Failed,
}

/// Uploads `path` and deletes it on success. The caller must hold the client lock for the whole
/// call so no other transfer starts in between.
pub(crate) async fn upload_and_delete<T: Transfer + ?Sized>(
    transfer: &T,
    path: &Path,
    directory: &str,
) -> UploadOutcome {
    if let Err(e) = transfer.upload(path, directory).await {
        warn!("Failed to upload {}: {e}", path.display());
        return UploadOutcome::Failed;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("Uploaded {}", path.display());
            UploadOutcome::Uploaded
        }
        Err(e) => {
            error!(
                "Uploaded file {} not garbage collected: {e}",
                path.display()
            );
            UploadOutcome::UploadedNotCollected
        }
    }
}

/// Uploads files as soon as they are moved into a spool directory.
pub struct EventUploader<T> {
    registry: Arc<SpoolRegistry>,
    client: SharedClient<T>,
}

impl<T: Transfer> EventUploader<T> {
    pub fn new(registry: Arc<SpoolRegistry>, client: SharedClient<T>) -> Self {
        Self { registry, client }
    }

    /// Handles events until `cancel_token` fires. Returns an error when the event source fails
    /// or goes away, which the process cannot recover from.
    pub async fn run(
        &self,
        mut events: EventStream,
        cancel_token: CancellationToken,
    ) -> Result<(), ShipperError> {
        debug!("Event uploader started");
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Event uploader stopped");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(Ok(event)) => {
                        self.handle_event(&event).await;
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(ShipperError::EventStreamClosed),
                },
            }
        }
    }

    pub async fn handle_event(&self, event: &SpoolEvent) -> UploadOutcome {
        if event.kind != SpoolEventKind::MovedInto {
            return UploadOutcome::Ignored;
        }
        let Some(directory) = self.registry.get(event.directory) else {
            warn!("Event for unknown spool directory {}", event.directory);
            return UploadOutcome::Ignored;
        };
        let path = directory.path().join(&event.file_name);
        info!("File move detected: {}", path.display());

        let client = self.client.lock().await;
        upload_and_delete(&*client, &path, directory.name()).await
    }
}
