//! Native serial port backend: raw termios configuration plus `AsyncFd` so
//! the fd participates directly in tokio's reactor instead of a dedicated
//! blocking I/O thread.

use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, BaudRate, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tokio::io::unix::AsyncFd;

use crate::error::{BridgeError, Result};

use super::ReadOutcome;

/// SAFETY: `fd` must be a currently-open descriptor for the duration the
/// returned `BorrowedFd` is used.
unsafe fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    BorrowedFd::borrow_raw(fd)
}

/// A native serial port, configured raw at the given baud rate.
pub struct SerialDevice {
    inner: AsyncFd<OwnedFd>,
    path: String,
}

impl SerialDevice {
    /// Open `path`, set non-blocking mode, and configure termios for raw
    /// 8N1 I/O at `baud_rate` with no hardware flow control.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let fd = fcntl::open(
            path,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(|e| device_open_err(path, e))?;

        configure_termios(fd, baud_rate).map_err(|reason| BridgeError::DeviceMisconfigured {
            spec: path.to_string(),
            reason,
        })?;

        // SAFETY: fd was just opened above and is owned by this function.
        unsafe {
            termios::tcflush(borrow(fd), termios::FlushArg::TCIOFLUSH).map_err(|e| {
                BridgeError::DeviceMisconfigured {
                    spec: path.to_string(),
                    reason: format!("tcflush: {e}"),
                }
            })?;
        }

        // SAFETY: fd is a valid, freshly opened descriptor not owned elsewhere.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        let inner = AsyncFd::new(owned).map_err(BridgeError::DeviceIoError)?;

        Ok(Self {
            inner,
            path: path.to_string(),
        })
    }

    // `readable`/`writable` (not the `_mut` variants) take `&self`, so the
    // pump can hold a read future and a write future on the same `Device` at
    // once — mirroring how `tokio::net::TcpStream` implements `AsyncRead`/
    // `AsyncWrite` for `&TcpStream` to support `split()`.
    pub async fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        loop {
            let mut guard = self.inner.readable().await.map_err(BridgeError::DeviceIoError)?;
            let fd = self.inner.get_ref().as_raw_fd();
            // SAFETY: fd is owned by `self.inner` and open for this call's duration.
            match unistd::read(fd, buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(Errno::EAGAIN) => {
                    guard.clear_ready();
                    continue;
                }
                Err(e) => return Err(BridgeError::DeviceIoError(std::io::Error::from(e))),
            }
        }
    }

    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.inner.writable().await.map_err(BridgeError::DeviceIoError)?;
            let fd = self.inner.get_ref().as_raw_fd();
            // SAFETY: fd is owned by `self.inner` and open for this call's duration.
            let bfd = unsafe { borrow(fd) };
            match unistd::write(bfd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EAGAIN) => {
                    guard.clear_ready();
                    continue;
                }
                Err(e) => return Err(BridgeError::DeviceIoError(std::io::Error::from(e))),
            }
        }
    }

    pub fn set_dtr(&self, on: bool) -> Result<()> {
        set_modem_bit(self.inner.get_ref().as_raw_fd(), libc::TIOCM_DTR, on)
            .map_err(|e| BridgeError::DeviceIoError(std::io::Error::from(e)))
    }

    pub fn set_rts(&self, on: bool) -> Result<()> {
        set_modem_bit(self.inner.get_ref().as_raw_fd(), libc::TIOCM_RTS, on)
            .map_err(|e| BridgeError::DeviceIoError(std::io::Error::from(e)))
    }

    pub async fn drain(&self) -> Result<()> {
        let fd = self.inner.get_ref().as_raw_fd();
        // SAFETY: fd is owned by `self.inner` and open for this call's duration.
        unsafe {
            termios::tcdrain(borrow(fd)).map_err(|e| {
                BridgeError::DeviceIoError(std::io::Error::from(e))
            })?;
        }
        Ok(())
    }
}

fn device_open_err(path: &str, e: Errno) -> BridgeError {
    match e {
        Errno::ENOENT | Errno::EBUSY | Errno::EACCES | Errno::EPERM => {
            BridgeError::DeviceUnavailable {
                spec: path.to_string(),
                reason: e.to_string(),
            }
        }
        _ => BridgeError::DeviceMisconfigured {
            spec: path.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Configure termios: raw mode, given baud, 8N1, CLOCAL|CREAD, no flow control.
/// VMIN=0, VTIME=0 — reads return immediately, `AsyncFd` handles waiting.
fn configure_termios(fd: RawFd, baud_rate: u32) -> std::result::Result<(), String> {
    // SAFETY: fd is valid — caller just opened it.
    let borrowed = unsafe { borrow(fd) };

    let mut tio = termios::tcgetattr(borrowed).map_err(|e| format!("tcgetattr: {e}"))?;

    termios::cfmakeraw(&mut tio);

    let rate = baud_rate_for(baud_rate)?;
    termios::cfsetispeed(&mut tio, rate).map_err(|e| format!("cfsetispeed: {e}"))?;
    termios::cfsetospeed(&mut tio, rate).map_err(|e| format!("cfsetospeed: {e}"))?;

    tio.control_flags |= termios::ControlFlags::CLOCAL | termios::ControlFlags::CREAD;
    tio.control_flags &= !termios::ControlFlags::CRTSCTS;

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio).map_err(|e| format!("tcsetattr: {e}"))?;

    Ok(())
}

fn baud_rate_for(baud: u32) -> std::result::Result<BaudRate, String> {
    match baud {
        1_200 => Ok(BaudRate::B1200),
        2_400 => Ok(BaudRate::B2400),
        4_800 => Ok(BaudRate::B4800),
        9_600 => Ok(BaudRate::B9600),
        19_200 => Ok(BaudRate::B19200),
        38_400 => Ok(BaudRate::B38400),
        57_600 => Ok(BaudRate::B57600),
        115_200 => Ok(BaudRate::B115200),
        230_400 => Ok(BaudRate::B230400),
        other => Err(format!("unsupported baud rate {other}")),
    }
}

/// Raise or lower a modem control line via `TIOCMBIS`/`TIOCMBIC`, the same
/// raw-ioctl pattern used for `TIOCSWINSZ` terminal resize elsewhere in this
/// codebase.
fn set_modem_bit(fd: RawFd, bit: libc::c_int, on: bool) -> std::result::Result<(), Errno> {
    let op = if on { libc::TIOCMBIS } else { libc::TIOCMBIC };
    let bits: libc::c_int = bit;
    // SAFETY: fd is a valid open serial fd; `bits` is a well-formed TIOCM_* mask.
    let ret = unsafe { libc::ioctl(fd, op as _, std::ptr::addr_of!(bits)) };
    if ret == -1 {
        Err(Errno::last())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_rate_for_known_values() {
        assert!(baud_rate_for(115_200).is_ok());
        assert!(baud_rate_for(9_600).is_ok());
    }

    #[test]
    fn baud_rate_for_unknown_value_errs() {
        assert!(baud_rate_for(12_345).is_err());
    }
}
