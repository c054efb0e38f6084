//! Process-level interception of a file descriptor.
//!
//! The target descriptor is re-pointed at a pipe. A worker thread drains the
//! pipe and writes every chunk to a saved copy of the original descriptor
//! through a [`StreamInterceptor`], so writes made by any code in the
//! process (including code that never sees our writers) are observed.

use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use crate::error::CaptureError;
use crate::error::Result;
use crate::interceptor::InterceptedWriter;
use crate::interceptor::StreamInterceptor;

const READ_CHUNK_SIZE: usize = 8192;

/// How long `restore` waits for the worker to drain the pipe. Descendant
/// processes that inherited the tapped descriptor keep the pipe open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFD/F_SETFD only touch the descriptor flags of `fd`.
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    // SAFETY: as above.
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) })?;
    Ok(())
}

fn dup_cloexec(fd: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: F_DUPFD_CLOEXEC creates a new descriptor and leaves `fd` as is.
    let duplicate = cvt(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) })?;
    // SAFETY: `duplicate` is a fresh descriptor owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(duplicate) })
}

/// Pipe whose ends are never inheritable by a forked child.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn pipe_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` has room for the two descriptors `pipe2` writes.
    cvt(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    // SAFETY: `pipe2` succeeded, both descriptors are new and unowned.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Pipe with CLOEXEC set right after creation. Platforms without `pipe2`
/// leave a short window where a concurrent fork inherits the ends.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn pipe_cloexec() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` has room for the two descriptors `pipe` writes.
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    // SAFETY: `pipe` succeeded, both descriptors are new and unowned.
    let (read_end, write_end) =
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read_end.as_raw_fd())?;
    set_cloexec(write_end.as_raw_fd())?;
    Ok((read_end, write_end))
}

#[derive(Debug)]
pub struct FdTap {
    target: RawFd,
    saved: Option<OwnedFd>,
    pipe_write: Option<OwnedFd>,
    worker: Option<JoinHandle<()>>,
    drained: Option<mpsc::Receiver<()>>,
}

impl FdTap {
    /// Redirects `target` into a pipe observed by `interceptor`.
    pub fn install(target: RawFd, interceptor: StreamInterceptor) -> Result<Self> {
        let tap_err = |source| CaptureError::tap(target, source);

        let saved = dup_cloexec(target).map_err(tap_err)?;
        let forward_to = File::from(saved.try_clone().map_err(tap_err)?);
        let (read_end, write_end) = pipe_cloexec().map_err(tap_err)?;

        let writer = interceptor.attach(forward_to);
        let reader = File::from(read_end);
        let (drained_tx, drained_rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name(format!("crashlog-tap-{target}"))
            .spawn(move || pump(reader, writer, drained_tx))
            .map_err(tap_err)?;

        // Dropping `write_end` on failure hands the worker its EOF.
        // SAFETY: both descriptors are open; dup2 only re-points `target`.
        cvt(unsafe { libc::dup2(write_end.as_raw_fd(), target) }).map_err(tap_err)?;
        debug!(fd = target, "installed output tap");

        Ok(Self {
            target,
            saved: Some(saved),
            pipe_write: Some(write_end),
            worker: Some(worker),
            drained: Some(drained_rx),
        })
    }

    pub fn target(&self) -> RawFd {
        self.target
    }

    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }

    /// Points the descriptor back at its original file and waits for the
    /// worker to forward what is still in the pipe. Idempotent. A failed
    /// restore leaves the tap active so it can be retried.
    pub fn restore(&mut self) -> Result<()> {
        let Some(saved) = self.saved.as_ref() else {
            return Ok(());
        };
        if self.target == libc::STDOUT_FILENO {
            let _ = io::stdout().flush();
        }

        // SAFETY: `saved` is open; dup2 only re-points `target`.
        cvt(unsafe { libc::dup2(saved.as_raw_fd(), self.target) })
            .map_err(|source| CaptureError::tap(self.target, source))?;
        self.saved = None;
        drop(self.pipe_write.take());

        let Some(drained) = self.drained.take() else {
            return Ok(());
        };
        match drained.recv_timeout(DRAIN_TIMEOUT) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    fd = self.target,
                    "output tap still held open by another process; leaving worker detached"
                );
                self.worker = None;
            }
        }
        debug!(fd = self.target, "restored output tap");
        Ok(())
    }
}

impl Drop for FdTap {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!("failed to restore output tap: {err}");
        }
    }
}

fn pump(mut reader: File, mut writer: InterceptedWriter<File>, drained: mpsc::Sender<()>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut forwarding = true;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!("output tap read failed: {err}");
                break;
            }
        };
        // Keep draining after a forwarding failure so writers never block.
        if forwarding && let Err(err) = writer.write_all(&buf[..n]) {
            warn!("output tap could not forward to the original descriptor: {err}");
            forwarding = false;
        }
    }
    let _ = writer.flush();
    let _ = drained.send(());
}
