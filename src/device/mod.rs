//! Local device endpoints: native serial, character devices, Unix sockets,
//! TCP sockets, and Windows named pipes — all behind one `Device` trait.
//!
//! Opening is driven by a spec string following the grammar:
//!
//! ```text
//! spec := "unix:" path
//!       | "tcp:" host ":" port
//!       | "pipe:" name
//!       | "\\.\pipe\" name
//!       | "COM" integer
//!       | absolute-filesystem-path   ; serial or character device
//! ```

mod pipe;
mod pty;
mod serial;
mod socket;

use std::fmt;

use crate::error::{BridgeError, Result};

/// A parsed device spec, ready to be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    /// Native serial port or bare character device path (`/dev/ttyUSB0`, `COM3`).
    Serial(String),
    /// Character device with no baud concept (`/dev/pts/4`).
    Pty(String),
    /// `unix:<path>` — client if the path exists, listener otherwise.
    UnixSocket(String),
    /// `tcp:<host>:<port>` device endpoint (distinct from the remote PPP server).
    TcpSocket(String, u16),
    /// `pipe:<name>` or `\\.\pipe\<name>` — Windows named pipe.
    Pipe(String),
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Serial(p) => write!(f, "{p}"),
            DeviceSpec::Pty(p) => write!(f, "{p}"),
            DeviceSpec::UnixSocket(p) => write!(f, "unix:{p}"),
            DeviceSpec::TcpSocket(h, p) => write!(f, "tcp:{h}:{p}"),
            DeviceSpec::Pipe(n) => write!(f, "pipe:{n}"),
        }
    }
}

impl DeviceSpec {
    /// Parse a device spec string per the grammar in the device spec grammar.
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(path) = spec.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(BridgeError::DeviceMisconfigured {
                    spec: spec.to_string(),
                    reason: "unix: spec needs a path".to_string(),
                });
            }
            return Ok(DeviceSpec::UnixSocket(path.to_string()));
        }

        if let Some(rest) = spec.strip_prefix("tcp:") {
            let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
                BridgeError::DeviceMisconfigured {
                    spec: spec.to_string(),
                    reason: "tcp: spec needs host:port".to_string(),
                }
            })?;
            let port: u16 = port.parse().map_err(|_| BridgeError::DeviceMisconfigured {
                spec: spec.to_string(),
                reason: format!("invalid port {port:?}"),
            })?;
            if host.is_empty() {
                return Err(BridgeError::DeviceMisconfigured {
                    spec: spec.to_string(),
                    reason: "tcp: spec needs a host".to_string(),
                });
            }
            return Ok(DeviceSpec::TcpSocket(host.to_string(), port));
        }

        if let Some(name) = spec.strip_prefix(r"\\.\pipe\") {
            return Ok(DeviceSpec::Pipe(name.to_string()));
        }
        if let Some(name) = spec.strip_prefix("pipe:") {
            return Ok(DeviceSpec::Pipe(name.to_string()));
        }

        if spec.starts_with("COM") && spec[3..].chars().all(|c| c.is_ascii_digit()) && spec.len() > 3
        {
            return Ok(DeviceSpec::Serial(spec.to_string()));
        }

        if spec.starts_with('/') {
            if spec.starts_with("/dev/pts/") || spec.starts_with("/dev/ptmx") {
                return Ok(DeviceSpec::Pty(spec.to_string()));
            }
            return Ok(DeviceSpec::Serial(spec.to_string()));
        }

        Err(BridgeError::DeviceMisconfigured {
            spec: spec.to_string(),
            reason: "unrecognised device spec, expected unix:/tcp:/pipe:/COMn/absolute path"
                .to_string(),
        })
    }
}

/// Outcome of a non-blocking read attempt.
pub enum ReadOutcome {
    /// `n` bytes were read into the caller's buffer.
    Data(usize),
    /// The peer closed its end; no more data will ever arrive.
    Eof,
}

/// An opened device endpoint, one variant per kind in §4.1's table.
///
/// All variants present identical semantics to the pump: reads that yield
/// partial chunks and block the calling task only until data (or EOF)
/// arrives, writes that may be short, and best-effort DTR/RTS control that
/// is a silent no-op on endpoints with no line-signal concept.
pub enum Device {
    Serial(serial::SerialDevice),
    Pty(pty::PtyDevice),
    UnixSocket(socket::UnixSocketDevice),
    TcpSocket(socket::TcpSocketDevice),
    #[cfg(windows)]
    Pipe(pipe::PipeDevice),
}

impl Device {
    /// Wait until the device is readable, then read into `buf`.
    ///
    /// Takes `&self`, not `&mut self`: every backend's read/write path only
    /// needs shared access to its fd or socket handle, so the pump can hold a
    /// read and a write in flight on the same `Device` at once without a
    /// borrow conflict — the same reason `tokio::net::TcpStream::split`
    /// works by reference instead of splitting ownership.
    pub async fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        match self {
            Device::Serial(d) => d.read(buf).await,
            Device::Pty(d) => d.read(buf).await,
            Device::UnixSocket(d) => d.read(buf).await,
            Device::TcpSocket(d) => d.read(buf).await,
            #[cfg(windows)]
            Device::Pipe(d) => d.read(buf).await,
        }
    }

    /// Wait until the device is writable, then write `buf`. May write short.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        match self {
            Device::Serial(d) => d.write(buf).await,
            Device::Pty(d) => d.write(buf).await,
            Device::UnixSocket(d) => d.write(buf).await,
            Device::TcpSocket(d) => d.write(buf).await,
            #[cfg(windows)]
            Device::Pipe(d) => d.write(buf).await,
        }
    }

    /// Raise or lower DTR. A no-op for endpoints with no line-signal concept.
    pub fn set_dtr(&self, on: bool) -> Result<()> {
        match self {
            Device::Serial(d) => d.set_dtr(on),
            _ => Ok(()),
        }
    }

    /// Raise or lower RTS. A no-op for endpoints with no line-signal concept.
    pub fn set_rts(&self, on: bool) -> Result<()> {
        match self {
            Device::Serial(d) => d.set_rts(on),
            _ => Ok(()),
        }
    }

    /// Block until any buffered output has been transmitted.
    pub async fn drain(&self) -> Result<()> {
        match self {
            Device::Serial(d) => d.drain().await,
            Device::Pty(d) => d.drain().await,
            _ => Ok(()),
        }
    }
}

/// Open a device by spec string, dispatching to the right backend.
pub async fn open(spec: &DeviceSpec, baud_rate: u32) -> Result<Device> {
    match spec {
        DeviceSpec::Serial(path) => Ok(Device::Serial(serial::SerialDevice::open(path, baud_rate)?)),
        DeviceSpec::Pty(path) => Ok(Device::Pty(pty::PtyDevice::open(path)?)),
        DeviceSpec::UnixSocket(path) => {
            Ok(Device::UnixSocket(socket::UnixSocketDevice::open(path).await?))
        }
        DeviceSpec::TcpSocket(host, port) => {
            Ok(Device::TcpSocket(socket::TcpSocketDevice::open(host, *port).await?))
        }
        DeviceSpec::Pipe(name) => {
            #[cfg(windows)]
            {
                Ok(Device::Pipe(pipe::PipeDevice::open(name).await?))
            }
            #[cfg(not(windows))]
            {
                Err(BridgeError::DeviceUnavailable {
                    spec: format!("pipe:{name}"),
                    reason: "named pipes are only available on Windows".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_socket_spec() {
        assert_eq!(
            DeviceSpec::parse("unix:/tmp/bridge.sock").unwrap(),
            DeviceSpec::UnixSocket("/tmp/bridge.sock".to_string())
        );
    }

    #[test]
    fn parses_tcp_spec() {
        assert_eq!(
            DeviceSpec::parse("tcp:127.0.0.1:9000").unwrap(),
            DeviceSpec::TcpSocket("127.0.0.1".to_string(), 9000)
        );
    }

    #[test]
    fn rejects_tcp_spec_with_bad_port() {
        assert!(DeviceSpec::parse("tcp:127.0.0.1:notaport").is_err());
    }

    #[test]
    fn parses_windows_pipe_spec() {
        assert_eq!(
            DeviceSpec::parse(r"\\.\pipe\vesper0").unwrap(),
            DeviceSpec::Pipe("vesper0".to_string())
        );
        assert_eq!(
            DeviceSpec::parse("pipe:vesper0").unwrap(),
            DeviceSpec::Pipe("vesper0".to_string())
        );
    }

    #[test]
    fn parses_com_port_spec() {
        assert_eq!(
            DeviceSpec::parse("COM3").unwrap(),
            DeviceSpec::Serial("COM3".to_string())
        );
    }

    #[test]
    fn parses_absolute_path_as_serial() {
        assert_eq!(
            DeviceSpec::parse("/dev/ttyUSB0").unwrap(),
            DeviceSpec::Serial("/dev/ttyUSB0".to_string())
        );
    }

    #[test]
    fn parses_pts_path_as_pty() {
        assert_eq!(
            DeviceSpec::parse("/dev/pts/4").unwrap(),
            DeviceSpec::Pty("/dev/pts/4".to_string())
        );
    }

    #[test]
    fn rejects_relative_path() {
        assert!(DeviceSpec::parse("ttyUSB0").is_err());
    }
}
