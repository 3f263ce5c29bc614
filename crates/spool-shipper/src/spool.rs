// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The fixed set of spool directories the shipper monitors.
//!
//! The registry is built once at startup by scanning the uploads root and is never modified
//! afterwards; the uploader, the sweeper, the watcher and failure accounting all share it.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ShipperError;

/// One monitored directory. `name` is the directory's basename and is sent with every upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolDirectory {
    name: String,
    path: PathBuf,
}

impl SpoolDirectory {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpoolRegistry {
    directories: Vec<SpoolDirectory>,
}

impl SpoolRegistry {
    /// Registers every immediate, non-hidden subdirectory of `root`, ordered by name.
    pub fn scan(root: &Path) -> Result<Self, ShipperError> {
        let spool_root_error = |source| ShipperError::SpoolRoot {
            path: root.to_path_buf(),
            source,
        };
        let root = root.canonicalize().map_err(spool_root_error)?;

        let mut directories = Vec::new();
        for entry in std::fs::read_dir(&root).map_err(spool_root_error)? {
            let entry = entry.map_err(spool_root_error)?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    warn!("Skipping spool directory with non UTF-8 name {:?}", name);
                    continue;
                }
            };
            // Skip hidden entries
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if std::fs::metadata(&path).map_err(spool_root_error)?.is_dir() {
                debug!("Registering spool directory {}", path.display());
                directories.push(SpoolDirectory::new(name, path));
            }
        }
        directories.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self { directories })
    }

    pub fn from_directories(directories: Vec<SpoolDirectory>) -> Self {
        Self { directories }
    }

    pub fn len(&self) -> usize {
        self.directories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SpoolDirectory> {
        self.directories.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpoolDirectory> {
        self.directories.iter()
    }

    /// Index of the directory whose path is exactly `path`.
    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.directories.iter().position(|dir| dir.path == path)
    }
}
