//! Character-device backend for already-allocated PTY slaves and similar
//! paths (e.g. `/dev/pts/4`) with no baud-rate concept. DTR/RTS are
//! best-effort no-ops per §4.1's table.

use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tokio::io::unix::AsyncFd;

use crate::error::{BridgeError, Result};

use super::ReadOutcome;

/// SAFETY: `fd` must be open for the duration the returned `BorrowedFd` is used.
unsafe fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    BorrowedFd::borrow_raw(fd)
}

/// A character device opened in raw mode with no baud rate configuration.
pub struct PtyDevice {
    inner: AsyncFd<OwnedFd>,
}

impl PtyDevice {
    /// Open `path` and put it in raw mode without touching the baud rate.
    pub fn open(path: &str) -> Result<Self> {
        let fd = fcntl::open(path, OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK, Mode::empty())
            .map_err(|e| match e {
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
            })?;

        // SAFETY: fd was just opened above.
        let borrowed = unsafe { borrow(fd) };
        let mut tio = termios::tcgetattr(borrowed).map_err(|e| BridgeError::DeviceMisconfigured {
            spec: path.to_string(),
            reason: format!("tcgetattr: {e}"),
        })?;
        termios::cfmakeraw(&mut tio);
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(borrowed, SetArg::TCSANOW, &tio).map_err(|e| {
            BridgeError::DeviceMisconfigured {
                spec: path.to_string(),
                reason: format!("tcsetattr: {e}"),
            }
        })?;

        // SAFETY: fd is a valid, freshly opened descriptor not owned elsewhere.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        let inner = AsyncFd::new(owned).map_err(BridgeError::DeviceIoError)?;

        Ok(Self { inner })
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        loop {
            let mut guard = self.inner.readable().await.map_err(BridgeError::DeviceIoError)?;
            let fd = self.inner.get_ref().as_raw_fd();
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

    pub async fn drain(&self) -> Result<()> {
        let fd = self.inner.get_ref().as_raw_fd();
        // SAFETY: fd is owned by `self.inner` and open for this call's duration.
        unsafe {
            termios::tcdrain(borrow(fd)).map_err(|e| BridgeError::DeviceIoError(std::io::Error::from(e)))?;
        }
        Ok(())
    }
}
