// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Directory event source for the spool directories.
//!
//! Producers are expected to write a file elsewhere and then move it into a spool directory, so
//! only "moved into the directory" notifications mean a complete file is ready. Everything else
//! the platform reports (creation, writes, metadata changes, removals) is passed along as
//! [`SpoolEventKind::Other`] and ignored by the uploader.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::ShipperError;
use crate::spool::SpoolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolEventKind {
    /// A file was moved or renamed into the directory
    MovedInto,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolEvent {
    /// Index of the spool directory in the registry
    pub directory: usize,
    pub file_name: OsString,
    pub kind: SpoolEventKind,
}

/// Stream of directory events. A watcher error ends the event loop.
pub type EventStream = mpsc::UnboundedReceiver<Result<SpoolEvent, ShipperError>>;

/// Keeps the platform watcher alive; dropping it stops the notifications.
pub struct SpoolWatcher {
    _watcher: RecommendedWatcher,
}

impl SpoolWatcher {
    /// Starts watching every directory of `registry`.
    pub fn subscribe(registry: Arc<SpoolRegistry>) -> Result<(Self, EventStream), ShipperError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler_registry = Arc::clone(&registry);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    trace!("Directory event: {:?}", event);
                    for spool_event in translate(&handler_registry, &event) {
                        let _ = tx.send(Ok(spool_event));
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(ShipperError::Watch(e)));
                }
            }
        })?;

        for directory in registry.iter() {
            watcher.watch(directory.path(), RecursiveMode::NonRecursive)?;
            debug!("Watching {}", directory.path().display());
        }

        Ok((Self { _watcher: watcher }, rx))
    }
}

/// Maps a platform event onto spool events for the files it names.
pub fn translate(registry: &SpoolRegistry, event: &Event) -> Vec<SpoolEvent> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .filter_map(|path| locate(registry, path, SpoolEventKind::MovedInto))
            .collect(),
        // Backends that cannot tell the source from the destination
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event
            .paths
            .iter()
            .filter_map(|path| {
                let kind = if path.is_file() {
                    SpoolEventKind::MovedInto
                } else {
                    SpoolEventKind::Other
                };
                locate(registry, path, kind)
            })
            .collect(),
        // Includes `RenameMode::Both`, whose destination also arrives as its own `To` event
        _ => event
            .paths
            .iter()
            .filter_map(|path| locate(registry, path, SpoolEventKind::Other))
            .collect(),
    }
}

fn locate(registry: &SpoolRegistry, path: &Path, kind: SpoolEventKind) -> Option<SpoolEvent> {
    let directory = registry.index_of(path.parent()?)?;
    Some(SpoolEvent {
        directory,
        file_name: path.file_name()?.to_os_string(),
        kind,
    })
}
