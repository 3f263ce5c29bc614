// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic retry of files whose upload failed, and bounding of the backlog they form.
//!
//! A sweep runs in two phases while holding the shared client lock:
//!
//! 1. Retry: every regular file or symlink in every spool directory whose status-change time
//!    is older than the retry interval is uploaded again. Files that upload are deleted; the rest,
//!    together with files too young to retry, form the backlog.
//! 2. Bound: under [`BacklogPolicy::Quota`] the backlog is fitted into the byte quota newest
//!    first and whatever does not fit is deleted. Under [`BacklogPolicy::MaxAge`] files past the
//!    maximum age were already dropped during the retry phase.
//!
//! Every deletion made to bound the backlog is counted in [`FailureCounters`] and the failure
//! report is rewritten at the end of any sweep that deleted something.

use std::fs::Metadata;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backlog::{Backlog, BacklogEntry};
use crate::client::{SharedClient, Transfer};
use crate::config::BacklogPolicy;
use crate::failures::FailureCounters;
use crate::spool::{SpoolDirectory, SpoolRegistry};
use crate::uploader::{upload_and_delete, UploadOutcome};

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Files old enough to be uploaded again
    pub retried: usize,
    pub uploaded: usize,
    pub failed: usize,
    /// Files deleted to bound the backlog
    pub evicted: usize,
    pub retained: usize,
    pub retained_bytes: u64,
}

/// Time of the last status change of a file: when it was moved into the spool or last touched.
#[cfg(unix)]
pub fn status_changed(metadata: &Metadata) -> SystemTime {
    use std::os::unix::fs::MetadataExt;

    let secs = u64::try_from(metadata.ctime()).unwrap_or(0);
    let nanos = u32::try_from(metadata.ctime_nsec()).unwrap_or(0);
    SystemTime::UNIX_EPOCH + Duration::new(secs, nanos)
}

#[cfg(not(unix))]
pub fn status_changed(metadata: &Metadata) -> SystemTime {
    metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

pub struct RetrySweeper<T> {
    registry: Arc<SpoolRegistry>,
    client: SharedClient<T>,
    failures: FailureCounters,
    retry_interval: Duration,
    backlog_policy: BacklogPolicy,
}

impl<T: Transfer> RetrySweeper<T> {
    pub fn new(
        registry: Arc<SpoolRegistry>,
        client: SharedClient<T>,
        failures: FailureCounters,
        retry_interval: Duration,
        backlog_policy: BacklogPolicy,
    ) -> Self {
        Self {
            registry,
            client,
            failures,
            retry_interval,
            backlog_policy,
        }
    }

    pub fn failures(&self) -> &FailureCounters {
        &self.failures
    }

    /// Sweeps once right away, then again one retry interval after each sweep completes, until
    /// `cancel_token` fires.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        debug!(
            "Retry sweeper started, sweeping every {}s",
            self.retry_interval.as_secs()
        );
        loop {
            let report = self.sweep().await;
            debug!("Sweep finished: {:?}", report);

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Retry sweeper stopped");
                    return;
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    pub async fn sweep(&mut self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Runs one sweep, measuring file ages against `now`.
    pub async fn sweep_at(&mut self, now: SystemTime) -> SweepReport {
        let client = Arc::clone(&self.client);
        let transfer = client.lock().await;
        let registry = Arc::clone(&self.registry);

        let mut report = SweepReport::default();
        let mut backlog = Backlog::new();
        for (index, directory) in registry.iter().enumerate() {
            self.retry_directory(&*transfer, index, directory, now, &mut backlog, &mut report)
                .await;
        }

        match self.backlog_policy {
            BacklogPolicy::Quota { max_bytes } => {
                self.evict_over_quota(backlog, max_bytes, &mut report).await;
            }
            BacklogPolicy::MaxAge { .. } => {
                report.retained = backlog.len();
                report.retained_bytes = backlog.total_bytes();
            }
        }

        if report.evicted > 0 {
            if let Err(e) = self.failures.persist().await {
                error!(
                    "Failed to write failure report {}: {e}",
                    self.failures.report_path().display()
                );
            }
        }
        report
    }

    async fn retry_directory(
        &mut self,
        transfer: &T,
        index: usize,
        directory: &SpoolDirectory,
        now: SystemTime,
        backlog: &mut Backlog,
        report: &mut SweepReport,
    ) {
        let mut entries = match tokio::fs::read_dir(directory.path()).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to list {}: {e}", directory.path().display());
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to list {}: {e}", directory.path().display());
                    break;
                }
            };
            let path = entry.path();
            let metadata = match tokio::fs::symlink_metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    error!("Failed to stat {}: {e}", path.display());
                    continue;
                }
            };
            let file_type = metadata.file_type();
            if !file_type.is_file() && !file_type.is_symlink() {
                continue;
            }
            // Size and modification time of what a symlink points to
            let target = if file_type.is_symlink() {
                match tokio::fs::metadata(&path).await {
                    Ok(target) if target.is_file() => target,
                    Ok(_) => {
                        debug!("Skipping link to non-file {}", path.display());
                        continue;
                    }
                    Err(e) => {
                        warn!("Skipping dangling link {}: {e}", path.display());
                        continue;
                    }
                }
            } else {
                metadata.clone()
            };

            let age = now
                .duration_since(status_changed(&metadata))
                .unwrap_or(Duration::ZERO);

            if let BacklogPolicy::MaxAge { max_age } = self.backlog_policy {
                if age > max_age {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => {
                            info!(
                                "Gave up on {} after {}s in the spool",
                                path.display(),
                                age.as_secs()
                            );
                            self.failures.increment(index);
                            report.evicted += 1;
                        }
                        Err(e) => error!("Failed to remove expired {}: {e}", path.display()),
                    }
                    continue;
                }
            }

            if age > self.retry_interval {
                info!("Retrying file {}", path.display());
                report.retried += 1;
                match upload_and_delete(transfer, &path, directory.name()).await {
                    UploadOutcome::Failed => report.failed += 1,
                    _ => {
                        report.uploaded += 1;
                        continue;
                    }
                }
            } else {
                debug!(
                    "Not retrying {} yet, {}s in the spool",
                    path.display(),
                    age.as_secs()
                );
            }

            let last_modified = match target.modified() {
                Ok(last_modified) => last_modified,
                Err(e) => {
                    error!("Failed to read modification time of {}: {e}", path.display());
                    continue;
                }
            };
            backlog.push(BacklogEntry {
                path,
                directory: index,
                last_modified,
                size: target.len(),
            });
        }
    }

    async fn evict_over_quota(&mut self, backlog: Backlog, max_bytes: u64, report: &mut SweepReport) {
        let backlog_bytes = backlog.total_bytes();
        let plan = backlog.plan_eviction(max_bytes);
        report.retained = plan.retained.len();
        report.retained_bytes = plan.retained_bytes();

        if plan.evicted.is_empty() {
            debug!("Backlog of {backlog_bytes} bytes is within the {max_bytes} byte quota");
            return;
        }
        warn!(
            "Backlog of {backlog_bytes} bytes exceeds the {max_bytes} byte quota, evicting {} files",
            plan.evicted.len()
        );

        for entry in plan.evicted {
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => {
                    info!("Evicted {} ({} bytes)", entry.path.display(), entry.size);
                    self.failures.increment(entry.directory);
                    report.evicted += 1;
                }
                Err(e) => error!("Failed to evict {}: {e}", entry.path.display()),
            }
        }
    }
}
