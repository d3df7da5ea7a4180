// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckbote — Core types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod identity;
pub mod types;

pub use config::ProxyConfig;
pub use error::DruckboteError;
pub use types::*;
