//! PTY-backed child processes
//!
//! [`PtyProcess`] is the only type that touches process and terminal
//! primitives. The master side is split into a read half and a write half so
//! a pending write never stalls the output pump.

use crate::error::{Error, Result};
use crate::ssh::SpawnSpec;
use futures::FutureExt;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use pty_process::{OwnedReadPty, OwnedWritePty};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a non-blocking read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyRead {
    /// Bytes that were immediately available
    Data(Vec<u8>),
    /// Nothing available right now
    Empty,
}

/// A child process attached to a pseudo-terminal
pub struct PtyProcess {
    reader: Mutex<Option<OwnedReadPty>>,
    writer: Mutex<Option<OwnedWritePty>>,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    terminated: AtomicBool,
    /// cols << 16 | rows
    size: AtomicU32,
}

fn pack_size(cols: u16, rows: u16) -> u32 {
    (u32::from(cols) << 16) | u32::from(rows)
}

impl PtyProcess {
    /// Allocate a PTY and start `spec` on it with the given (cols, rows).
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(spec: &SpawnSpec, (cols, rows): (u16, u16)) -> Result<Self> {
        let (pty, pts) = pty_process::open()
            .map_err(|e| Error::SpawnFailed(format!("failed to open PTY: {}", e)))?;
        pty.resize(pty_process::Size::new(rows, cols))
            .map_err(|e| Error::SpawnFailed(format!("failed to size PTY: {}", e)))?;

        let mut cmd = pty_process::Command::new(&spec.program).args(&spec.args);
        for (key, value) in &spec.env {
            cmd = cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            cmd = cmd.current_dir(dir);
        }

        // `pts` moves into the child; the parent keeps only the master side
        let child = cmd
            .spawn(pts)
            .map_err(|e| Error::SpawnFailed(format!("failed to spawn {}: {}", spec.program, e)))?;
        let pid = child.id();
        let (reader, writer) = pty.into_split();

        debug!(program = %spec.program, pid = ?pid, "PTY child spawned");

        Ok(Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(Some(child)),
            pid,
            terminated: AtomicBool::new(false),
            size: AtomicU32::new(pack_size(cols, rows)),
        })
    }

    /// OS process id of the child
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Return whatever output is immediately available, never waiting.
    pub async fn read_nonblocking(&self, max_bytes: usize) -> Result<PtyRead> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(Error::Closed)?;

        let mut buf = vec![0u8; max_bytes.max(1)];
        match reader.read(&mut buf).now_or_never() {
            None => Ok(PtyRead::Empty),
            Some(Ok(0)) => Err(Error::Closed),
            Some(Ok(n)) => {
                buf.truncate(n);
                Ok(PtyRead::Data(buf))
            }
            Some(Err(e)) => match e.kind() {
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => {
                    Ok(PtyRead::Empty)
                }
                // Linux reports EIO once every slave handle is closed
                _ if e.raw_os_error() == Some(nix::libc::EIO) => Err(Error::Closed),
                _ => Err(Error::TransientIo(e.to_string())),
            },
        }
    }

    /// Write all of `bytes` to the terminal.
    pub async fn write(&self, bytes: &[u8]) -> Result<usize> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::Closed)?;

        match tokio::time::timeout(WRITE_TIMEOUT, async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
        {
            Ok(Ok(())) => Ok(bytes.len()),
            Ok(Err(e)) if e.raw_os_error() == Some(nix::libc::EIO) => Err(Error::Closed),
            Ok(Err(e)) => Err(Error::TransientIo(e.to_string())),
            Err(_) => Err(Error::TransientIo("PTY write timed out".into())),
        }
    }

    /// Apply new terminal dimensions and notify the child.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let guard = self.writer.lock().await;
        let writer = guard.as_ref().ok_or(Error::Closed)?;
        writer
            .resize(pty_process::Size::new(rows, cols))
            .map_err(|e| Error::TransientIo(format!("resize failed: {}", e)))?;
        drop(guard);

        self.size.store(pack_size(cols, rows), Ordering::SeqCst);
        if let Some(pid) = self.pid {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGWINCH) {
                debug!(pid, error = %e, "SIGWINCH not delivered");
            }
        }
        Ok(())
    }

    /// Current (cols, rows)
    pub fn dimensions(&self) -> (u16, u16) {
        let packed = self.size.load(Ordering::SeqCst);
        ((packed >> 16) as u16, (packed & 0xffff) as u16)
    }

    /// Whether the child is still running
    pub async fn is_alive(&self) -> bool {
        if self.terminated.load(Ordering::SeqCst) {
            return false;
        }
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Whether [`terminate`](Self::terminate) has been called
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL; then close the master side.
    ///
    /// Calling it again is a no-op.
    pub async fn terminate(&self, grace: Duration) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut child) = self.child.lock().await.take() {
            if matches!(child.try_wait(), Ok(None)) {
                if let Some(pid) = self.pid {
                    let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                }
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => debug!(pid = ?self.pid, %status, "PTY child exited"),
                    Ok(Err(e)) => warn!(pid = ?self.pid, error = %e, "Failed to wait for PTY child"),
                    Err(_) => {
                        warn!(pid = ?self.pid, "PTY child ignored SIGTERM, killing");
                        if let Err(e) = child.kill().await {
                            warn!(pid = ?self.pid, error = %e, "Failed to kill PTY child");
                        }
                    }
                }
            }
        }

        self.reader.lock().await.take();
        self.writer.lock().await.take();
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.get_mut().as_mut() {
            let _ = child.start_kill();
        }
    }
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("terminated", &self.is_terminated())
            .field("dimensions", &self.dimensions())
            .finish()
    }
}
