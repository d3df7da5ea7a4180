// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Runtime configuration assembled from the command line.

use serde::{Deserialize, Serialize};

/// Everything the proxy needs to run, fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// URI of the infrastructure printer or system service. May be
    /// replaced by a service-assigned URI during registration.
    pub printer_uri: String,
    /// URI of the local output device (`ipp://`, `ipps://`, or
    /// `socket://`).
    pub device_uri: String,
    /// Pinned output MIME type (`-m`); `None` selects automatically from
    /// the device's supported formats.
    pub output_format: Option<String>,
    /// Requesting user name sent with every IPP operation.
    pub username: String,
    /// Authentication secret (`-p` or the `PROXY_PASSWORD` environment
    /// variable).
    pub password: Option<String>,
    /// 0 = normal, 1 = debug, 2+ = full IPP message dumps.
    pub verbosity: u8,
}

impl ProxyConfig {
    /// Default requesting-user-name when `-u` is not given: the login
    /// user, falling back to "anonymous".
    pub fn default_username() -> String {
        std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_username_is_never_empty() {
        assert!(!ProxyConfig::default_username().is_empty());
    }
}
