//! # Pseudo-Terminal Attachment
//!
//! File: cli/src/common/process/pty.rs
//! Author: Christi Mahu
//!
//! Allocates a PTY pair and wires a command to it. The child gets the slave
//! side as stdin/stdout/stderr, runs in a new session and adopts the slave as
//! its controlling terminal. The parent keeps the master, returned here as a
//! `PtyMaster`.
//!
//! The master is switched to non-blocking mode and driven by the reactor
//! (`AsyncFd`), so a pending read is just a suspended future. Dropping the
//! reading task drops the read, even while a grandchild still holds the
//! slave open.
//!
//! When the last holder of the slave closes it, reads on the master fail with
//! `EIO`. That is how a PTY signals end-of-stream, see `is_closed_terminal`.
//!
use crate::core::error::{JobrunError, Result};
use anyhow::anyhow;
use std::io;

#[cfg(unix)]
pub use self::unix::{attach, PtyMaster};

/// True for the `EIO` a PTY master reports once the terminal has closed.
pub fn is_closed_terminal(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::libc::EIO)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use nix::pty::{openpty, Winsize};
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::pin::Pin;
    use std::process::Stdio;
    use std::task::{ready, Context, Poll};
    use tokio::io::unix::AsyncFd;
    use tokio::io::{AsyncRead, ReadBuf};
    use tokio::process::Command;
    use tracing::debug;

    const DEFAULT_COLUMNS: u16 = 80;
    const DEFAULT_ROWS: u16 = 24;

    /// Parent side of a PTY, readable without tying up a blocking-pool thread.
    #[derive(Debug)]
    pub struct PtyMaster {
        fd: AsyncFd<OwnedFd>,
    }

    impl PtyMaster {
        fn new(master: OwnedFd) -> Result<Self> {
            set_nonblocking(&master)?;
            let fd = AsyncFd::new(master).map_err(|e| anyhow!(JobrunError::Pty(e.to_string())))?;
            Ok(Self { fd })
        }
    }

    impl AsyncRead for PtyMaster {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            loop {
                let mut guard = ready!(this.fd.poll_read_ready(cx))?;
                let unfilled = buf.initialize_unfilled();
                let read = guard.try_io(|fd| {
                    nix::unistd::read(fd.as_raw_fd(), unfilled).map_err(io::Error::from)
                });
                match read {
                    Ok(Ok(n)) => {
                        buf.advance(n);
                        return Poll::Ready(Ok(()));
                    }
                    Ok(Err(e)) => return Poll::Ready(Err(e)),
                    // Spurious readiness; the guard has cleared it.
                    Err(_would_block) => continue,
                }
            }
        }
    }

    fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
        let raw = fd.as_raw_fd();
        let flags = fcntl(raw, FcntlArg::F_GETFL)
            .map_err(|errno| anyhow!(JobrunError::Pty(errno.desc().to_string())))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(raw, FcntlArg::F_SETFL(flags))
            .map_err(|errno| anyhow!(JobrunError::Pty(errno.desc().to_string())))?;
        Ok(())
    }

    /// Points `command`'s stdio at a fresh PTY and returns the master side.
    ///
    /// The slave descriptors are owned by `command` until it is dropped.
    /// Must be called inside a tokio runtime.
    pub fn attach(command: &mut Command) -> Result<PtyMaster> {
        let winsize = Winsize {
            ws_row: DEFAULT_ROWS,
            ws_col: DEFAULT_COLUMNS,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(Some(&winsize), None)
            .map_err(|errno| anyhow!(JobrunError::Pty(errno.desc().to_string())))?;

        let stdin = pty
            .slave
            .try_clone()
            .map_err(|e| anyhow!(JobrunError::Pty(e.to_string())))?;
        let stdout = pty
            .slave
            .try_clone()
            .map_err(|e| anyhow!(JobrunError::Pty(e.to_string())))?;
        command
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(pty.slave));

        // SAFETY: only async-signal-safe calls (setsid, ioctl) run between fork and exec.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid().map_err(io::Error::from)?;
                if nix::libc::ioctl(0, nix::libc::TIOCSCTTY as _, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("[Process] Allocated PTY ({}x{})", DEFAULT_COLUMNS, DEFAULT_ROWS);
        PtyMaster::new(pty.master)
    }
}

/// PTY mode is only available on unix.
#[cfg(not(unix))]
pub type PtyMaster = tokio::io::Empty;

#[cfg(not(unix))]
pub fn attach(_command: &mut tokio::process::Command) -> Result<PtyMaster> {
    Err(anyhow!(JobrunError::Pty(
        "PTY mode is not supported on this platform".to_string()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_errors_are_not_terminal_close() {
        let err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(!is_closed_terminal(&err));
    }

    #[test]
    #[cfg(unix)]
    fn test_eio_is_terminal_close() {
        let err = io::Error::from_raw_os_error(nix::libc::EIO);
        assert!(is_closed_terminal(&err));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_attached_child_output_reaches_master() {
        use tokio::io::AsyncReadExt;

        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", "printf 'from-tty\\n'; test -t 1 && echo is-a-tty"]);
        let mut master = attach(&mut command).unwrap();
        let mut child = command.spawn().unwrap();
        child.wait().await.unwrap();
        drop(command);

        let mut collected = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match master.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => collected.extend_from_slice(&chunk[..n]),
                Err(e) if is_closed_terminal(&e) => break,
                Err(e) => panic!("unexpected read error: {}", e),
            }
        }
        let text = String::from_utf8_lossy(&collected);
        assert!(text.contains("from-tty"));
        assert!(text.contains("is-a-tty"));
    }

    #[test]
    #[cfg(unix)]
    fn test_abandoned_read_does_not_hold_the_runtime() {
        use std::time::{Duration, Instant};
        use tokio::io::AsyncReadExt;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut command = tokio::process::Command::new("true");
        let reader = runtime.block_on(async {
            let mut master = attach(&mut command).unwrap();
            let mut child = command.spawn().unwrap();
            child.wait().await.unwrap();

            // `command` still holds the slave, so this read stays pending.
            let reader = tokio::spawn(async move {
                let mut chunk = [0u8; 64];
                let _ = master.read(&mut chunk).await;
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!reader.is_finished());
            reader
        });

        reader.abort();
        let started = Instant::now();
        drop(runtime);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "runtime shutdown waited {:?} on the PTY read",
            started.elapsed()
        );
        drop(command);
    }
}
