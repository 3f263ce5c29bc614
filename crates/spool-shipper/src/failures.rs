// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::spool::SpoolRegistry;

/// Number of files evicted from each spool directory since startup.
#[derive(Debug)]
pub struct FailureCounters {
    registry: Arc<SpoolRegistry>,
    counts: Vec<u64>,
    report_path: PathBuf,
}

impl FailureCounters {
    pub fn new(registry: Arc<SpoolRegistry>, report_path: impl Into<PathBuf>) -> Self {
        let counts = vec![0; registry.len()];
        Self {
            registry,
            counts,
            report_path: report_path.into(),
        }
    }

    pub fn increment(&mut self, directory: usize) {
        if let Some(count) = self.counts.get_mut(directory) {
            *count += 1;
        }
    }

    pub fn get(&self, directory: usize) -> u64 {
        self.counts.get(directory).copied().unwrap_or(0)
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// One `<name> <count>` line per spool directory, in registry order.
    pub fn render(&self) -> String {
        self.registry
            .iter()
            .zip(&self.counts)
            .map(|(directory, count)| format!("{} {count}\n", directory.name()))
            .collect()
    }

    /// Replaces the report with the current counts. The report is written next to its final
    /// location and renamed into place.
    pub async fn persist(&self) -> io::Result<()> {
        if let Some(parent) = self.report_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut staging = self.report_path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, self.render()).await?;
        tokio::fs::rename(&staging, &self.report_path).await?;
        debug!("Wrote failure report {}", self.report_path.display());
        Ok(())
    }
}
