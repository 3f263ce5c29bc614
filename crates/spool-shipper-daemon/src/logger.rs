// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format of the shipper daemon.
//!
//! ```text
//! SPOOL_SHIPPER | LEVEL | [crate] span{fields} > span: message {event_fields}
//! ```
//!
//! The `[crate]` tag only appears on events from dependencies, such as `notify` records forwarded
//! from the `log` facade, so shipper lines stay short.

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

const SHIPPER_TARGET_PREFIX: &str = "spool_shipper";

/// Crate an event came from, when it is not one of the shipper's own.
fn foreign_crate(target: &str) -> Option<&str> {
    let name = target.split("::").next().unwrap_or(target);
    if name.starts_with(SHIPPER_TARGET_PREFIX) {
        None
    } else {
        Some(name)
    }
}

/// Prefixes every line with `SPOOL_SHIPPER` so shipper logs stand out in a shared syslog.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "SPOOL_SHIPPER | {:<5} | ", metadata.level().as_str())?;
        if let Some(name) = foreign_crate(metadata.target()) {
            write!(writer, "[{name}] ")?;
        }

        if let Some(scope) = ctx.event_scope() {
            let mut spans = scope.from_root().peekable();
            while let Some(span) = spans.next() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>().filter(|f| !f.is_empty()) {
                    write!(writer, "{{{fields}}}")?;
                }
                let separator = if spans.peek().is_some() { " > " } else { ": " };
                write!(writer, "{separator}")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
