//! Bidirectional byte splicing
//!
//! One splice handles one remote stream / local service conversation.
//! Two modes exist because payloads differ in how they end a
//! conversation:
//!
//! - [`SpliceMode::Transparent`] copies both directions and leaves
//!   connection lifecycle entirely to the two peers. Suitable for
//!   protocols that manage their own framing over a long-lived stream
//!   (e.g. SSH over the tunnel).
//! - [`SpliceMode::HalfClose`] propagates EOF as a write-side shutdown,
//!   so a local HTTP server sees the end of the request body before it
//!   produces its response.

use std::io;
use std::time::Duration;

use tokio::io::{copy_bidirectional, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// How long a local service dial may take before the splice is aborted
pub const LOCAL_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Copy discipline applied to each accepted stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpliceMode {
    /// Neither side is shut down until both directions finish
    #[default]
    Transparent,
    /// EOF on one side shuts down the peer's write side (HTTP-friendly)
    HalfClose,
}

/// Dial the local service with [`LOCAL_DIAL_TIMEOUT`]
pub async fn dial_service(addr: &str) -> io::Result<TcpStream> {
    let stream = timeout(LOCAL_DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "local service dial timed out"))??;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Splice two streams until both directions are done
///
/// EOF is never reported as a failure; common half-close races
/// (broken pipe, connection reset) are treated as graceful termination.
pub async fn splice<R, L>(remote: R, local: L, mode: SpliceMode) -> io::Result<()>
where
    R: AsyncRead + AsyncWrite + Unpin,
    L: AsyncRead + AsyncWrite + Unpin,
{
    match mode {
        SpliceMode::Transparent => transparent(remote, local).await,
        SpliceMode::HalfClose => half_close(remote, local).await,
    }
}

async fn transparent<R, L>(remote: R, local: L) -> io::Result<()>
where
    R: AsyncRead + AsyncWrite + Unpin,
    L: AsyncRead + AsyncWrite + Unpin,
{
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);
    let (mut local_read, mut local_write) = tokio::io::split(local);

    // Both halves stay open until the slower direction finishes; the
    // peers own the conversation lifecycle.
    let (inbound, outbound) = tokio::join!(
        tokio::io::copy(&mut remote_read, &mut local_write),
        tokio::io::copy(&mut local_read, &mut remote_write),
    );

    squash_graceful(inbound)?;
    squash_graceful(outbound)?;
    Ok(())
}

async fn half_close<R, L>(mut remote: R, mut local: L) -> io::Result<()>
where
    R: AsyncRead + AsyncWrite + Unpin,
    L: AsyncRead + AsyncWrite + Unpin,
{
    // copy_bidirectional shuts down the destination when the source
    // reaches EOF, which is exactly the half-close an HTTP server needs.
    let result = copy_bidirectional(&mut remote, &mut local).await;
    let _ = remote.shutdown().await;
    let _ = local.shutdown().await;
    squash_graceful(result.map(|_| 0))?;
    Ok(())
}

fn squash_graceful(result: io::Result<u64>) -> io::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(err)
            if err.kind() == io::ErrorKind::BrokenPipe
                || err.kind() == io::ErrorKind::NotConnected
                || err.kind() == io::ErrorKind::ConnectionReset
                || err.kind() == io::ErrorKind::UnexpectedEof =>
        {
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn transparent_relays_both_directions() {
        let (remote_near, mut remote_far) = duplex(1024);
        let (local_near, mut local_far) = duplex(1024);

        let task = tokio::spawn(splice(remote_near, local_near, SpliceMode::Transparent));

        remote_far.write_all(b"ping\n").await.unwrap();
        let mut buf = [0u8; 5];
        local_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");

        local_far.write_all(b"pong\n").await.unwrap();
        let mut buf = [0u8; 5];
        remote_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong\n");

        drop(remote_far);
        drop(local_far);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn transparent_preserves_byte_order() {
        let (remote_near, mut remote_far) = duplex(64);
        let (local_near, mut local_far) = duplex(64);

        let task = tokio::spawn(splice(remote_near, local_near, SpliceMode::Transparent));

        let payload: Vec<u8> = (0..=255u8).cycle().take(8 * 1024).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            remote_far.write_all(&payload).await.unwrap();
            remote_far
        });

        // Transparent mode never half-closes, so read exactly the bytes
        // that were sent rather than waiting for an EOF.
        let mut received = vec![0u8; expected.len()];
        local_far.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(writer.await.unwrap());
        drop(local_far);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn half_close_signals_eof_to_the_local_side() {
        let (remote_near, mut remote_far) = duplex(1024);
        let (local_near, mut local_far) = duplex(1024);

        let task = tokio::spawn(splice(remote_near, local_near, SpliceMode::HalfClose));

        // Remote sends a complete request and half-closes.
        remote_far.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
        remote_far.shutdown().await.unwrap();

        // The local side must observe EOF before answering.
        let mut request = Vec::new();
        local_far.read_to_end(&mut request).await.unwrap();
        assert!(request.ends_with(b"\r\n\r\n"));

        local_far.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await.unwrap();
        local_far.shutdown().await.unwrap();

        let mut response = Vec::new();
        remote_far.read_to_end(&mut response).await.unwrap();
        assert!(response.starts_with(b"HTTP/1.0 200"));

        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dial_to_unreachable_service_fails() {
        // Blackhole address: the connect either times out (auto-advanced
        // virtual clock) or is rejected outright by the host network.
        let result = dial_service("10.255.255.1:9").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dial_to_closed_port_fails_fast() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = dial_service(&addr.to_string()).await;
        assert!(result.is_err());
    }
}
