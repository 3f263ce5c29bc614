// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use std::error::Error;

use tracing::warn;

/// Builds a reqwest client with optional proxy configuration and timeout.
/// Uses rustls TLS. The timeout applies to the whole transfer and is the only way a stuck upload
/// gets cancelled.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
    skip_tls_verify: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    if skip_tls_verify {
        warn!("TLS certificate verification is disabled for uploads");
        builder = builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}
