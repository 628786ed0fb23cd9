//! Async TCP primitives: connect plus length-prefixed frame I/O.
//!
//! Both the remote-node client and the command server read and write frames
//! through these helpers, so the two sides cannot drift apart on framing.

use std::net::ToSocketAddrs;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Result, TerrastoreError};

/// Maximum frame size (100 MB).
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Connects to a remote endpoint.
///
/// The address may resolve to multiple socket addresses; each is tried in
/// turn until one accepts the connection.
pub async fn connect(addr: &str) -> Result<TcpStream> {
    let socket_addrs = addr
        .to_socket_addrs()
        .map_err(|e| TerrastoreError::Communication(format!("Invalid address '{}': {}", addr, e)))?;

    let mut last_err = None;
    for socket_addr in socket_addrs {
        match TcpStream::connect(&socket_addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(TerrastoreError::Communication(format!(
        "Failed to connect to {}: {}",
        addr,
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no addresses resolved".to_string())
    )))
}

/// Writes a payload with its 4-byte big-endian length prefix.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TerrastoreError::Communication(format!(
            "Frame too large: {} bytes (max {})",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed payload.
///
/// Returns `Ok(None)` on a clean end-of-stream before the length prefix,
/// which is how a peer signals an orderly close.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TerrastoreError::Communication(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frame_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frame = read_frame(&mut stream).await.unwrap().unwrap();
            write_frame(&mut stream, &frame).await.unwrap();
        });

        let mut stream = connect(&addr).await.unwrap();
        write_frame(&mut stream, b"hello terrastore").await.unwrap();
        let echoed = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(echoed, b"hello terrastore");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_close_reads_as_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut stream = connect(&addr).await.unwrap();
        let frame = read_frame(&mut stream).await.unwrap();
        assert!(frame.is_none());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 is essentially never listening.
        let result = connect("127.0.0.1:1").await;
        assert!(matches!(result, Err(TerrastoreError::Communication(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let mut sink = Vec::new();
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        let result = write_frame(&mut sink, &payload).await;
        assert!(matches!(result, Err(TerrastoreError::Communication(_))));
    }
}
