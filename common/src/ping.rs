// Copyright (c) 2024 The dep2p Authors

//! Liveness echo protocol.
//!
//! The initiator sends 32 random bytes on a fresh stream and expects the
//! exact bytes back; any difference is a protocol failure. The transport is
//! whatever stream the caller opened for [`crate::protocols::PING_PROTOCOL`].

use displaydoc::Display;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the echo payload.
pub const PING_PAYLOAD_LEN: usize = 32;

/// Default deadline for a round trip.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by the echo protocol.
#[derive(Debug, Display, Error)]
pub enum PingError {
    /// The echoed bytes did not match the sent bytes
    DataMismatch,
    /// The round trip exceeded its deadline
    Timeout,
    /// Stream error: {0}
    Io(#[from] std::io::Error),
}

/// Send one echo payload and verify the response.
///
/// Returns the observed round-trip time on success.
pub async fn ping<S>(stream: &mut S, timeout: Duration) -> Result<Duration, PingError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut payload = [0u8; PING_PAYLOAD_LEN];
    getrandom::getrandom(&mut payload).expect("system randomness unavailable");

    let started = std::time::Instant::now();
    let round_trip = async {
        stream.write_all(&payload).await?;
        stream.flush().await?;
        let mut echo = [0u8; PING_PAYLOAD_LEN];
        stream.read_exact(&mut echo).await?;
        Ok::<_, PingError>(echo)
    };

    let echo = tokio::time::timeout(timeout, round_trip)
        .await
        .map_err(|_| PingError::Timeout)??;

    if echo != payload {
        return Err(PingError::DataMismatch);
    }
    Ok(started.elapsed())
}

/// Serve one echo request: read the payload and write it back unchanged.
pub async fn serve_ping<S>(stream: &mut S) -> Result<(), PingError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut payload = [0u8; PING_PAYLOAD_LEN];
    stream.read_exact(&mut payload).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}
