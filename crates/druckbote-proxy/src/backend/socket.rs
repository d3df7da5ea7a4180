// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP submission (AppSocket / JetDirect).
//
// The simplest output path: open a TCP connection and stream the
// document bytes. The printer must understand the bytes natively, so any
// transfer compression is undone before they reach the wire. There is no
// job tracking; the job is complete when the stream drains.

use std::time::Duration;

use futures::io::AsyncReadExt;
use ipp::prelude::Uri;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use druckbote_core::error::{DruckboteError, Result};

use super::{DocumentStream, LocalJobHandle};

/// Default AppSocket port.
const SOCKET_PORT: u16 = 9100;

/// Connect timeout for the device.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Copy buffer size.
const CHUNK_SIZE: usize = 16384;

/// A `socket://` output device.
pub struct SocketDevice {
    host: String,
    port: u16,
}

impl SocketDevice {
    pub fn from_uri(device_uri: &str) -> Result<Self> {
        let uri: Uri = device_uri
            .parse()
            .map_err(|_| DruckboteError::InvalidUri(device_uri.to_string()))?;
        let host = uri
            .host()
            .ok_or_else(|| DruckboteError::InvalidUri(device_uri.to_string()))?
            .to_string();
        let port = uri.port_u16().unwrap_or(SOCKET_PORT);

        Ok(Self { host, port })
    }

    /// Stream one document to the printer and close the connection.
    pub async fn send_job(
        &self,
        remote_job_id: i32,
        document: DocumentStream,
    ) -> Result<LocalJobHandle> {
        let addr = format!("{}:{}", self.host, self.port);
        debug!(job = remote_job_id, addr = %addr, "connecting to socket device");

        let mut stream = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| {
            DruckboteError::Transport(format!(
                "connection to '{addr}' timed out after {CONNECT_TIMEOUT_SECS}s"
            ))
        })?
        .map_err(|e| DruckboteError::Transport(format!("unable to connect to '{addr}': {e}")))?;

        // The printer sees plain bytes; inbound gzip/deflate is undone
        // here rather than forwarded.
        let mut reader = document.into_decompressed_reader()?;
        let mut buffer = [0u8; CHUNK_SIZE];
        let mut total: u64 = 0;

        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| DruckboteError::Transport(format!("document read failed: {e}")))?;
            if read == 0 {
                break;
            }
            stream.write_all(&buffer[..read]).await?;
            total += read as u64;
        }

        stream.flush().await?;
        stream.shutdown().await?;

        info!(job = remote_job_id, "local job created, {total} bytes");
        Ok(LocalJobHandle::Drained { bytes: total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_parsing_defaults_to_appsocket_port() {
        let device = SocketDevice::from_uri("socket://printer.local").unwrap();
        assert_eq!(device.host, "printer.local");
        assert_eq!(device.port, SOCKET_PORT);
    }

    #[test]
    fn uri_parsing_honors_explicit_port() {
        let device = SocketDevice::from_uri("socket://10.1.2.3:9101").unwrap();
        assert_eq!(device.host, "10.1.2.3");
        assert_eq!(device.port, 9101);
    }

    #[tokio::test]
    async fn streams_decompressed_bytes_and_counts_them() {
        use async_compression::futures::bufread::GzipEncoder;
        use ipp::model::{IppVersion, StatusCode};
        use ipp::payload::IppPayload;
        use ipp::prelude::*;
        use tokio::io::AsyncReadExt as _;
        use tokio::net::TcpListener;

        // A local listener stands in for the printer.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let payload_bytes = b"\x1b%-12345X@PJL ENTER LANGUAGE=PCL\r\n".repeat(40);
        let mut compressed = Vec::new();
        GzipEncoder::new(futures::io::Cursor::new(payload_bytes.clone()))
            .read_to_end(&mut compressed)
            .await
            .unwrap();

        let mut response =
            IppRequestResponse::new_response(IppVersion::v2_0(), StatusCode::SuccessfulOk, 1);
        response.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("compression", IppValue::Keyword("gzip".to_string())),
        );
        *response.payload_mut() = IppPayload::new_async(futures::io::Cursor::new(compressed));
        let document = DocumentStream::from_response(response);

        let device = SocketDevice {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let handle = device.send_job(42, document).await.unwrap();

        // The byte count reflects the decompressed size, not the wire
        // size.
        assert_eq!(handle.bytes(), payload_bytes.len() as u64);
        assert_eq!(accept.await.unwrap(), payload_bytes);
    }
}
