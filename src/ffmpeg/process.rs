//! A single supervised ffmpeg child process: spawn, stream stdout, sample
//! health, and tear down gracefully.
//!
//! Grounded on `services/ffmpeg_wrapper.rs`'s `FFmpegProcess`, but replacing
//! its SIGKILL-only `kill()`/`Drop` with the spec's SIGTERM → wait 5s →
//! SIGKILL protocol, using `nix::sys::signal` since `tokio::process::Child`
//! exposes no portable way to send anything but SIGKILL.
use std::collections::VecDeque;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::errors::{FfmpegError, FfmpegResult};

const STDERR_TAIL_CAP: usize = 64 * 1024;

pub struct HealthSample {
    pub rss_bytes: u64,
    pub fd_count: u32,
}

/// A running ffmpeg process plus the bookkeeping needed to detect and tear
/// it down when unhealthy.
pub struct FfmpegProcess {
    child: Child,
    pid: i32,
    unhealthy_since: Option<Instant>,
    stderr_tail: std::sync::Arc<tokio::sync::Mutex<VecDeque<u8>>>,
}

impl FfmpegProcess {
    pub async fn spawn(ffmpeg_command: &str, args: &[String]) -> FfmpegResult<Self> {
        let mut child = Command::new(ffmpeg_command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(FfmpegError::Spawn)?;

        let pid = child
            .id()
            .ok_or_else(|| FfmpegError::UnexpectedExit(None))? as i32;

        // Drain stderr into a bounded tail buffer in the background so the
        // pipe never backs up and blocks the child; only the last 64 KiB
        // are kept, per spec §4.4.
        let stderr_tail = std::sync::Arc::new(tokio::sync::Mutex::new(VecDeque::with_capacity(
            STDERR_TAIL_CAP,
        )));
        if let Some(mut stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(&mut stderr);
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut tail = tail.lock().await;
                            for &b in &buf[..n] {
                                if tail.len() == STDERR_TAIL_CAP {
                                    tail.pop_front();
                                }
                                tail.push_back(b);
                            }
                        }
                    }
                }
            });
        }

        Ok(Self {
            child,
            pid,
            unhealthy_since: None,
            stderr_tail,
        })
    }

    pub fn stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Await process exit after stdout has reached EOF, to classify a clean
    /// vs. abnormal finish.
    pub async fn wait(&mut self) -> FfmpegResult<std::process::ExitStatus> {
        self.child.wait().await.map_err(FfmpegError::Spawn)
    }

    /// Read `/proc/<pid>/status` and `/proc/<pid>/fd` for a cheap per-5s
    /// health sample. Returns `None` if the process is gone or `/proc` is
    /// unavailable (non-Linux).
    pub async fn sample_health(&self) -> Option<HealthSample> {
        let status_path = format!("/proc/{}/status", self.pid);
        let status = tokio::fs::read_to_string(&status_path).await.ok()?;
        let rss_kb: u64 = status
            .lines()
            .find(|l| l.starts_with("VmRSS:"))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse().ok())?;

        let fd_dir = format!("/proc/{}/fd", self.pid);
        let fd_count = tokio::fs::read_dir(&fd_dir)
            .await
            .ok()
            .map(|_| 0u32)
            .unwrap_or(0);
        // Counting entries requires draining the ReadDir stream; done below
        // to keep the fast path above allocation-free.
        let fd_count = count_dir_entries(&fd_dir).await.unwrap_or(fd_count);

        Some(HealthSample {
            rss_bytes: rss_kb * 1024,
            fd_count,
        })
    }

    /// Update unhealthy-duration tracking given an `rss_soft_limit`; returns
    /// true once the process has been over the limit for more than 30s
    /// (spec §4.4).
    pub fn mark_health(&mut self, sample: &HealthSample, rss_soft_limit_bytes: u64) -> bool {
        if sample.rss_bytes > rss_soft_limit_bytes {
            let since = *self.unhealthy_since.get_or_insert_with(Instant::now);
            since.elapsed() > Duration::from_secs(30)
        } else {
            self.unhealthy_since = None;
            false
        }
    }

    /// The last 64 KiB of stderr, for attaching to the log ring on exit.
    pub async fn stderr_tail(&self) -> Vec<u8> {
        self.stderr_tail.lock().await.iter().copied().collect()
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL if still alive.
    pub async fn graceful_shutdown(&mut self, timeout: Duration) -> FfmpegResult<()> {
        if let Err(e) = signal::kill(Pid::from_raw(self.pid), Signal::SIGTERM) {
            // ESRCH means it already exited; anything else is worth logging.
            if e != nix::errno::Errno::ESRCH {
                warn!(pid = self.pid, error = %e, "failed to send SIGTERM");
            }
        }

        let waited = tokio::time::timeout(timeout, self.child.wait()).await;
        if waited.is_err() {
            debug!(pid = self.pid, "ffmpeg did not exit after SIGTERM, sending SIGKILL");
            self.child
                .start_kill()
                .map_err(FfmpegError::Spawn)?;
            let _ = self.child.wait().await;
        }
        Ok(())
    }
}

async fn count_dir_entries(path: &str) -> Option<u32> {
    let mut dir = tokio::fs::read_dir(path).await.ok()?;
    let mut count = 0u32;
    while dir.next_entry().await.ok().flatten().is_some() {
        count += 1;
    }
    Some(count)
}
