// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckbote — infrastructure-printer proxy daemon.
//
// Entry point. Parses the command line, initialises logging and signal
// handling, registers the local output device with the infrastructure
// printer, then runs the event loop on this task with the relay worker
// beside it. A clean shutdown cancels the subscription and deregisters
// the device.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};

use druckbote_core::config::ProxyConfig;
use druckbote_core::error::Result;
use druckbote_core::identity;
use druckbote_core::types::DeviceScheme;
use druckbote_proxy::backend::LocalDevice;
use druckbote_proxy::capabilities;
use druckbote_proxy::events::EventLoop;
use druckbote_proxy::registration::{self, Registrar};
use druckbote_proxy::registry::JobRegistry;
use druckbote_proxy::relay::RelayWorker;
use druckbote_proxy::session::IppSession;

/// Bridge an infrastructure print service to one local output device.
#[derive(Debug, Parser)]
#[command(name = "druckbote", version, about)]
struct Cli {
    /// Local printer device URI (ipp://, ipps://, or socket://).
    #[arg(short = 'd', value_name = "DEVICE-URI")]
    device_uri: String,

    /// Desired print format.
    #[arg(short = 'm', value_name = "MIME/TYPE")]
    output_format: Option<String>,

    /// Password for authentication.
    #[arg(short = 'p', env = "PROXY_PASSWORD", value_name = "PASSWORD")]
    password: Option<String>,

    /// Username for authentication.
    #[arg(short = 'u', value_name = "USERNAME")]
    username: Option<String>,

    /// Be verbose; repeat for full IPP message dumps.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// URI of the infrastructure printer or system service.
    #[arg(value_name = "PRINTER-URI")]
    printer_uri: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version are clean exits; everything else is a
            // usage error.
            let clean = matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            );
            let _ = err.print();
            return if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE };
        }
    };

    if DeviceScheme::parse(&cli.device_uri).is_err() {
        eprintln!("druckbote: unsupported device URI scheme '{}'", cli.device_uri);
        return ExitCode::FAILURE;
    }

    init_tracing(cli.verbose);

    let config = ProxyConfig {
        printer_uri: cli.printer_uri,
        device_uri: cli.device_uri,
        output_format: cli.output_format,
        username: cli.username.unwrap_or_else(ProxyConfig::default_username),
        password: cli.password,
        verbosity: cli.verbose,
    };

    match run_proxy(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Startup, steady state, and shutdown of the proxy.
async fn run_proxy(config: ProxyConfig) -> Result<()> {
    let device_uuid = identity::device_uuid(Some(&config.device_uri));
    debug!("UUID for '{}' is '{}'", config.device_uri, device_uuid);

    info!("connecting to '{}'", config.printer_uri);
    let session = IppSession::new(
        &config.printer_uri,
        &config.username,
        config.password.as_deref(),
        &device_uuid,
        config.verbosity,
    )?;
    session.connect().await?;

    let registry = Arc::new(JobRegistry::new());
    spawn_signal_handler(registry.clone());

    // Learn what the output device can do, then introduce it to the
    // service.
    let bundle = capabilities::probe_device(&config.device_uri, &config.username).await?;

    let mut registrar = Registrar::new();
    let (session, subscription_id) = registrar.register(session, &bundle).await?;

    // The relay worker gets its own session and exclusive ownership of
    // the local device connection.
    let device = LocalDevice::from_uri(&config.device_uri, &config.username)?;
    let worker = RelayWorker::new(
        session.clone(),
        registry.clone(),
        device,
        Arc::new(bundle),
        config.output_format.clone(),
    );
    let worker_handle = tokio::spawn(worker.run());

    // Catch jobs that became fetchable before the subscription existed,
    // then poll until shutdown.
    let mut events = EventLoop::new(session.clone(), registry.clone(), subscription_id);
    events.bootstrap().await?;
    events.run().await?;

    registry.request_shutdown();
    if let Err(err) = worker_handle.await {
        error!("relay worker task failed: {err}");
    }

    registration::deregister(&session, subscription_id).await;
    info!("shutdown complete");
    Ok(())
}

/// SIGHUP, SIGINT, and SIGTERM all request a graceful shutdown.
fn spawn_signal_handler(registry: Arc<JobRegistry>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
        let mut interrupt = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut terminate = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = hangup.recv() => {}
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }

        info!("shutdown requested");
        registry.request_shutdown();
    });
}

/// Logging goes to stderr, one line per event with a UTC millisecond
/// timestamp. `-v` raises the default level; RUST_LOG still wins.
fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::new(
            "%Y-%m-%dT%H:%M:%S%.3fZ".to_string(),
        ))
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_uri_is_required() {
        let result = Cli::try_parse_from(["druckbote", "ipp://service.example.com/ipp/print"]);
        assert!(result.is_err());
    }

    #[test]
    fn printer_uri_is_required() {
        let result = Cli::try_parse_from(["druckbote", "-d", "socket://p.local:9100"]);
        assert!(result.is_err());
    }

    #[test]
    fn full_command_line_parses() {
        let cli = Cli::try_parse_from([
            "druckbote",
            "-d",
            "socket://p.local:9100",
            "-m",
            "application/vnd.hp-pcl",
            "-u",
            "operator",
            "-vv",
            "ipps://service.example.com/ipp/print",
        ])
        .unwrap();

        assert_eq!(cli.device_uri, "socket://p.local:9100");
        assert_eq!(cli.output_format.as_deref(), Some("application/vnd.hp-pcl"));
        assert_eq!(cli.username.as_deref(), Some("operator"));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.printer_uri, "ipps://service.example.com/ipp/print");
    }
}
