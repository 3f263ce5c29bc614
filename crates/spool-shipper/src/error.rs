// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors that stop the shipper from starting or from continuing its event loop.
#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read node id from {path}: {reason}")]
    NodeId { path: PathBuf, reason: String },

    #[error("Failed to enumerate spool root {path}: {source}")]
    SpoolRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Directory watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Directory event stream closed")]
    EventStreamClosed,
}

/// A single failed upload attempt. Always transient from the caller's point of view: the file
/// stays in its spool directory and is retried by the next sweep.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to escape {0} for the upload URL")]
    Escape(&'static str),

    #[error("Failed to upload: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Collector rejected upload with status {0}")]
    Status(reqwest::StatusCode),
}
