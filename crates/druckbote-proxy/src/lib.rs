// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckbote Proxy — the three control loops that bridge an infrastructure
// printer to one local output device: registration and capability
// mirroring, event polling and job discovery, and the per-job relay state
// machine. This crate talks IPP through the `ipp` crate and never spools
// or transcodes document data.

pub mod attrs;
pub mod backend;
pub mod backoff;
pub mod capabilities;
pub mod events;
pub mod registration;
pub mod registry;
pub mod relay;
pub mod session;

pub use attrs::DeviceAttributes;
pub use backend::LocalDevice;
pub use backoff::FibonacciBackoff;
pub use events::EventLoop;
pub use registration::Registrar;
pub use registry::JobRegistry;
pub use relay::RelayWorker;
pub use session::IppSession;
