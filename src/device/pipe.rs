//! Windows named pipe device backend. Compiled only under `cfg(windows)`;
//! on every other platform a `pipe:`/`\\.\pipe\` spec fails at open time with
//! `DeviceUnavailable` rather than failing to compile.

#[cfg(windows)]
mod imp {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

    use crate::error::{BridgeError, Result};

    use super::super::ReadOutcome;

    enum Endpoint {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    pub struct PipeDevice {
        endpoint: Endpoint,
    }

    impl PipeDevice {
        pub async fn open(name: &str) -> Result<Self> {
            let path = format!(r"\\.\pipe\{name}");
            let endpoint = match ClientOptions::new().open(&path) {
                Ok(client) => Endpoint::Client(client),
                Err(_) => {
                    let server = ServerOptions::new()
                        .first_pipe_instance(true)
                        .create(&path)
                        .map_err(|e| BridgeError::DeviceMisconfigured {
                            spec: format!("pipe:{name}"),
                            reason: e.to_string(),
                        })?;
                    server
                        .connect()
                        .await
                        .map_err(|e| BridgeError::DeviceUnavailable {
                            spec: format!("pipe:{name}"),
                            reason: e.to_string(),
                        })?;
                    Endpoint::Server(server)
                }
            };
            Ok(Self { endpoint })
        }

        // `&NamedPipeServer`/`&NamedPipeClient` implement `AsyncRead`/`AsyncWrite`
        // (the same by-reference pattern `TcpStream::split` relies on), so these
        // take `&self` and can run concurrently with one another in the pump.
        pub async fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
            let n = match &self.endpoint {
                Endpoint::Server(s) => (&*s).read(buf).await,
                Endpoint::Client(c) => (&*c).read(buf).await,
            }
            .map_err(BridgeError::DeviceIoError)?;
            if n == 0 {
                Ok(ReadOutcome::Eof)
            } else {
                Ok(ReadOutcome::Data(n))
            }
        }

        pub async fn write(&self, buf: &[u8]) -> Result<usize> {
            match &self.endpoint {
                Endpoint::Server(s) => (&*s).write(buf).await,
                Endpoint::Client(c) => (&*c).write(buf).await,
            }
            .map_err(BridgeError::DeviceIoError)
        }
    }
}

#[cfg(windows)]
pub use imp::PipeDevice;
