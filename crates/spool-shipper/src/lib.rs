// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships files dropped into spool directories to an HTTP collector.
//!
//! Files moved into a watched directory are uploaded right away by the [`uploader`]. Files whose
//! upload failed are retried by the [`sweeper`], which also keeps the leftover backlog within a
//! byte quota and records how many files it had to give up on per directory.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backlog;
pub mod client;
pub mod config;
pub mod error;
pub mod failures;
pub mod http_utils;
pub mod spool;
pub mod sweeper;
pub mod uploader;
pub mod watcher;
