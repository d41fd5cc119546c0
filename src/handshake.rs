//! Line-framed login handshake performed over the freshly connected remote
//! TCP socket, before any payload bytes cross (§4.3).

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// Per-read timeout during the handshake.
const READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Expected banner prefix, e.g. `VESPER PPP 1`.
const BANNER_PREFIX: &str = "VESPER PPP";

/// Run the login handshake to completion on an already-connected socket.
///
/// On any failure the caller must treat the socket as unusable and close it;
/// this function never attempts to reuse a partially negotiated connection.
pub async fn run(stream: &mut TcpStream, username: &str, password: &str) -> Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let banner = read_line(&mut reader, "banner").await?;
    if !banner.starts_with(BANNER_PREFIX) {
        return Err(BridgeError::HandshakeRejected(format!(
            "unexpected banner: {banner:?}"
        )));
    }
    debug!("handshake: banner {banner:?}");

    let prompt = read_line(&mut reader, "LOGIN: prompt").await?;
    if prompt.trim_end() != "LOGIN:" {
        return Err(BridgeError::HandshakeRejected(format!(
            "expected LOGIN: prompt, got {prompt:?}"
        )));
    }
    write_line(&mut write_half, username).await?;

    let prompt = read_line(&mut reader, "PASSWORD: prompt").await?;
    if prompt.trim_end() != "PASSWORD:" {
        return Err(BridgeError::HandshakeRejected(format!(
            "expected PASSWORD: prompt, got {prompt:?}"
        )));
    }
    write_line(&mut write_half, password).await?;

    let result = read_line(&mut reader, "auth result").await?;
    if result.trim_end() == "OK" {
        debug!("handshake: authenticated");
        Ok(())
    } else {
        Err(BridgeError::AuthFailed(result.trim_end().to_string()))
    }
}

async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R, what: &str) -> Result<String> {
    let mut line = String::new();
    let what = what.to_string();
    match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => Err(BridgeError::HandshakeTimeout { expected: what }),
        Ok(Ok(_)) => Ok(line),
        Ok(Err(e)) => Err(BridgeError::DeviceIoError(e)),
        Err(_elapsed) => Err(BridgeError::HandshakeTimeout { expected: what }),
    }
}

async fn write_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .map_err(BridgeError::DeviceIoError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_fut = TcpStream::connect(addr);
        let (server, (client, _)) =
            tokio::join!(async { listener.accept().await.unwrap() }, async {
                (client_fut.await.unwrap(), ())
            });
        (client, server.0)
    }

    #[tokio::test]
    async fn successful_handshake_completes() {
        let (mut client, mut server) = loopback_pair().await;

        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            server
                .write_all(b"VESPER PPP 1\r\nLOGIN:")
                .await
                .unwrap();
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"alice\r\n");
            server.write_all(b"PASSWORD:").await.unwrap();
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"hunter2\r\n");
            server.write_all(b"OK\r\n").await.unwrap();
        });

        run(&mut client, "alice", "hunter2").await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_wrong_banner() {
        let (mut client, mut server) = loopback_pair().await;
        let server_task = tokio::spawn(async move {
            server.write_all(b"HELLO THERE\r\n").await.unwrap();
        });
        let err = run(&mut client, "alice", "hunter2").await.unwrap_err();
        assert!(matches!(err, BridgeError::HandshakeRejected(_)));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn reports_auth_failed_on_bad_credentials() {
        let (mut client, mut server) = loopback_pair().await;
        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            server.write_all(b"VESPER PPP 1\r\nLOGIN:").await.unwrap();
            server.read(&mut buf).await.unwrap();
            server.write_all(b"PASSWORD:").await.unwrap();
            server.read(&mut buf).await.unwrap();
            server.write_all(b"BADAUTH\r\n").await.unwrap();
        });
        let err = run(&mut client, "alice", "wrong").await.unwrap_err();
        assert!(matches!(err, BridgeError::AuthFailed(_)));
        server_task.await.unwrap();
    }
}
