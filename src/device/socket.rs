//! Unix-domain and TCP device endpoints. Both follow the same bind-or-connect
//! rule from §4.1: connect if the peer is already listening (or, for Unix
//! sockets, if the path already exists), otherwise bind and accept exactly
//! one peer.

use std::path::Path;

use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::error::{BridgeError, Result};

use super::ReadOutcome;

pub struct UnixSocketDevice {
    stream: UnixStream,
}

impl UnixSocketDevice {
    pub async fn open(path: &str) -> Result<Self> {
        let stream = if Path::new(path).exists() {
            UnixStream::connect(path)
                .await
                .map_err(|e| BridgeError::DeviceUnavailable {
                    spec: format!("unix:{path}"),
                    reason: e.to_string(),
                })?
        } else {
            let listener =
                UnixListener::bind(path).map_err(|e| BridgeError::DeviceMisconfigured {
                    spec: format!("unix:{path}"),
                    reason: e.to_string(),
                })?;
            let (stream, _addr) =
                listener
                    .accept()
                    .await
                    .map_err(|e| BridgeError::DeviceUnavailable {
                        spec: format!("unix:{path}"),
                        reason: e.to_string(),
                    })?;
            stream
        };
        Ok(Self { stream })
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        read_tcp_like(&self.stream, buf).await
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        write_tcp_like(&self.stream, buf).await
    }
}

pub struct TcpSocketDevice {
    stream: TcpStream,
}

impl TcpSocketDevice {
    pub async fn open(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let stream = match TcpStream::connect(&addr).await {
            Ok(s) => s,
            Err(connect_err) => {
                let listener = TcpListener::bind(&addr).await.map_err(|_| {
                    BridgeError::DeviceUnavailable {
                        spec: format!("tcp:{addr}"),
                        reason: connect_err.to_string(),
                    }
                })?;
                let (stream, _addr) =
                    listener
                        .accept()
                        .await
                        .map_err(|e| BridgeError::DeviceUnavailable {
                            spec: format!("tcp:{addr}"),
                            reason: e.to_string(),
                        })?;
                stream
            }
        };
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        read_tcp_like(&self.stream, buf).await
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        write_tcp_like(&self.stream, buf).await
    }
}

async fn read_tcp_like<S: tokio::io::AsyncRead + Unpin>(
    mut stream: S,
    buf: &mut [u8],
) -> Result<ReadOutcome> {
    use tokio::io::AsyncReadExt;
    let n = stream.read(buf).await.map_err(BridgeError::DeviceIoError)?;
    if n == 0 {
        Ok(ReadOutcome::Eof)
    } else {
        Ok(ReadOutcome::Data(n))
    }
}

async fn write_tcp_like<S: tokio::io::AsyncWrite + Unpin>(mut stream: S, buf: &[u8]) -> Result<usize> {
    use tokio::io::AsyncWriteExt;
    stream.write(buf).await.map_err(BridgeError::DeviceIoError)
}
