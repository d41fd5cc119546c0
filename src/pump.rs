//! Bidirectional byte pump between the local device and the remote socket
//! (§4.4), run as two cooperating branches of one `tokio::select!` loop —
//! no per-direction OS thread, per the single-task model in §5.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::device::{Device, ReadOutcome};
use crate::error::{BridgeError, Result};
use crate::modem::Interpreter;

/// Working buffer size for each direction (≥4 KiB per §4.4).
const BUF_SIZE: usize = 8192;

/// How often the escape-sequence and inactivity timers are polled.
const TICK: Duration = Duration::from_millis(100);

/// Bounded drain time on graceful shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Why the pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    SocketEof,
    DeviceEof,
    /// `+++` escape sequence detected; caller should hand control to the
    /// AT interpreter's `OnlineCommand` mode.
    Escape,
    InactivityTimeout,
    Cancelled,
}

/// Run the pump until a termination condition is reached.
///
/// When `interpreter` is `Some`, device-sourced bytes are also fed to it for
/// escape-sequence detection (observation only — it never alters the bytes
/// actually forwarded to the socket).
pub async fn run(
    device: &Device,
    socket: &mut TcpStream,
    inactivity_timeout: Option<Duration>,
    mut interpreter: Option<&mut Interpreter>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<PumpExit> {
    let (mut sock_rd, mut sock_wr) = socket.split();

    let mut dev_buf = [0u8; BUF_SIZE];
    let mut sock_buf = [0u8; BUF_SIZE];

    // Bytes read but not yet fully written to the other side.
    let mut dev_to_sock: Vec<u8> = Vec::new();
    let mut sock_to_dev: Vec<u8> = Vec::new();

    let mut last_activity = Instant::now();
    let mut ticker = interval(TICK);

    loop {
        let read_device = dev_to_sock.is_empty();
        let read_socket = sock_to_dev.is_empty();

        tokio::select! {
            biased;

            _ = cancel.changed() => {
                if *cancel.borrow() {
                    drain(device, &mut sock_wr, DRAIN_TIMEOUT).await;
                    return Ok(PumpExit::Cancelled);
                }
            }

            _ = ticker.tick() => {
                let now = Instant::now();
                if let Some(timeout) = inactivity_timeout {
                    if now.saturating_duration_since(last_activity) > timeout {
                        return Ok(PumpExit::InactivityTimeout);
                    }
                }
                if let Some(interp) = interpreter.as_deref_mut() {
                    if interp.poll_escape(now).is_some() {
                        return Ok(PumpExit::Escape);
                    }
                }
            }

            result = device.read(&mut dev_buf), if read_device => {
                match result? {
                    ReadOutcome::Eof => return Ok(PumpExit::DeviceEof),
                    ReadOutcome::Data(n) => {
                        last_activity = Instant::now();
                        if let Some(interp) = interpreter.as_deref_mut() {
                            interp.observe_online_bytes(&dev_buf[..n], last_activity);
                        }
                        dev_to_sock.extend_from_slice(&dev_buf[..n]);
                    }
                }
            }

            n = sock_rd.read(&mut sock_buf), if read_socket => {
                let n = n.map_err(BridgeError::DeviceIoError)?;
                if n == 0 {
                    return Ok(PumpExit::SocketEof);
                }
                last_activity = Instant::now();
                sock_to_dev.extend_from_slice(&sock_buf[..n]);
            }

            n = sock_wr.write(&dev_to_sock), if !dev_to_sock.is_empty() => {
                let n = n.map_err(BridgeError::DeviceIoError)?;
                dev_to_sock.drain(..n);
                last_activity = Instant::now();
            }

            n = device.write(&sock_to_dev), if !sock_to_dev.is_empty() => {
                let n = n?;
                sock_to_dev.drain(..n);
                last_activity = Instant::now();
            }
        }
    }
}

/// Best-effort bounded-time drain of any in-flight bytes on graceful shutdown.
async fn drain(device: &Device, sock_wr: &mut (impl AsyncWriteExt + Unpin), timeout: Duration) {
    let deadline = Instant::now() + timeout;
    if tokio::time::timeout_at(deadline.into(), device.drain())
        .await
        .is_err()
    {
        warn!("pump: device drain did not complete within {timeout:?}");
    }
    if tokio::time::timeout_at(deadline.into(), sock_wr.flush())
        .await
        .is_err()
    {
        debug!("pump: socket flush did not complete within {timeout:?}");
    }
}
