// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker process adapter (design document §4.B).
//!
//! Owns one worker's lifetime: spawning it, writing protocol messages to its
//! stdin, and surfacing the lines it writes to stdout as decoded
//! [`Message`]s (with stdout noise — e.g. from assembly module initializers
//! — folded in as [`WorkerLine::Noise`] rather than terminating the
//! session). A background task pumps lines off stdout/stderr while the
//! handle's owner drains them, and the child is placed in its own process
//! group on spawn so a grace-period kill reaches the whole worker tree.

use crate::errors::{DiscoveryError, WorkerSpawnError};
use crate::protocol::{self, DiscoveredTest, Message};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// The result of tearing down a worker via [`WorkerHandle::terminate`].
#[derive(Debug, Clone, Copy)]
pub struct Termination {
    /// Whether the grace period expired and the process had to be
    /// force-killed rather than exiting on its own.
    pub forced: bool,
    /// The process's exit code, if one could be determined.
    pub exit_code: Option<i32>,
}

/// One line observed from a worker's stdout or stderr.
#[derive(Debug)]
pub enum WorkerLine {
    /// A structurally valid protocol message.
    Message(Message),
    /// A line that didn't parse as a [`Message`] — ignorable noise, but
    /// still "activity" for idle-guard purposes.
    Noise(String),
}

/// Owns one worker's process and its stdio streams.
///
/// Exclusive ownership: a `WorkerHandle` is never shared, matching the
/// design document's data model for the "Worker Handle" type. Dropping one
/// without calling [`WorkerHandle::terminate`] leaves the child process
/// behind (no `Drop`-time kill), so callers must always route through
/// `terminate` on every exit path — success, failure, or cancellation —
/// exactly as scoped resource cleanup requires.
pub struct WorkerHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    lines_rx: UnboundedReceiver<WorkerLine>,
    #[allow(dead_code)]
    reader_task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns `program` with the given arguments, redirecting stdio and
    /// detaching from any controlling terminal. On Unix the child is placed
    /// in its own process group so a later force-kill can reach any
    /// grandchildren it spawned.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, WorkerSpawnError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                command.pre_exec(|| {
                    // Start a new process group so the whole worker tree
                    // can be signaled together on termination.
                    libc::setpgid(0, 0);
                    Ok(())
                });
            }
        }

        let mut child = command
            .spawn()
            .map_err(|e| WorkerSpawnError::new(program, e))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(pump_lines(stdout, stderr, tx));

        Ok(Self {
            child,
            stdin,
            lines_rx: rx,
            reader_task,
        })
    }

    /// Sends one protocol message to the worker's stdin.
    pub async fn send(&mut self, msg: &Message) -> std::io::Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker stdin already closed",
            ));
        };
        let mut line = protocol::encode(msg);
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    /// Receives the next line observed from the worker, or `None` if the
    /// worker has exited and every buffered line has been drained.
    pub async fn recv(&mut self) -> Option<WorkerLine> {
        self.lines_rx.recv().await
    }

    /// Runs a `discover` request to completion: sends it, then accumulates
    /// lines until a `discovered` or `error` message arrives (or the worker
    /// exits with neither).
    pub async fn discover(&mut self, assembly: impl Into<String>) -> Result<Vec<DiscoveredTest>, DiscoveryError> {
        let assembly = assembly.into();
        if self
            .send(&Message::Discover {
                assembly: assembly.clone(),
            })
            .await
            .is_err()
        {
            return Err(DiscoveryError::WorkerExited { assembly });
        }
        loop {
            match self.recv().await {
                Some(WorkerLine::Message(Message::Discovered { tests })) => return Ok(tests),
                Some(WorkerLine::Message(Message::Error { message, details })) => {
                    // By convention a worker tags "no adapter claims this
                    // assembly" with `details: "no-framework"`, distinguishing
                    // it from a generic discovery failure (design document
                    // §4.B: "Errors surfaced: NoFrameworkDetected,
                    // DiscoveryFailed").
                    return Err(if details.as_deref() == Some("no-framework") {
                        DiscoveryError::NoFrameworkDetected { assembly }
                    } else {
                        DiscoveryError::DiscoveryFailed { assembly, message }
                    });
                }
                Some(_) => continue,
                None => return Err(DiscoveryError::WorkerExited { assembly }),
            }
        }
    }

    /// Sends a `run` request. The caller drives the resulting event stream
    /// itself via [`WorkerHandle::recv`], applying its own guard timeouts
    /// (the batch executor does this; see [`crate::executor`]).
    pub async fn start_run(
        &mut self,
        assembly: impl Into<String>,
        tests: Option<Vec<String>>,
        timeout_seconds: Option<u64>,
    ) -> std::io::Result<()> {
        self.send(&Message::Run {
            assembly: assembly.into(),
            tests,
            timeout_seconds,
        })
        .await
    }

    /// Requests graceful termination by closing stdin (the worker is
    /// required by protocol to exit when its stdin closes) and sending an
    /// explicit `cancel` for workers that need the nudge. Waits up to
    /// `grace_period` for the process to exit on its own, then force-kills
    /// the whole process group.
    pub async fn terminate(mut self, grace_period: Duration) -> Termination {
        let _ = self.send(&Message::Cancel).await;
        self.stdin.take(); // closing stdin signals the worker to exit

        match tokio::time::timeout(grace_period, self.child.wait()).await {
            Ok(Ok(status)) => Termination {
                forced: false,
                exit_code: status.code(),
            },
            Ok(Err(_)) | Err(_) => {
                self.force_kill();
                let exit_code = self.child.wait().await.ok().and_then(|s| s.code());
                Termination {
                    forced: true,
                    exit_code,
                }
            }
        }
    }

    /// Non-blockingly checks whether the worker has already exited, without
    /// tearing down the handle. Used by the executor to learn an exit code
    /// when the worker closed its own stdout (so `recv` returned `None`)
    /// before the caller gets around to calling [`WorkerHandle::terminate`].
    pub fn try_exit_code(&mut self) -> Option<i32> {
        self.child.try_wait().ok().flatten().and_then(|s| s.code())
    }

    fn force_kill(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                unsafe {
                    // Negative pid targets the whole process group created
                    // in `spawn` via `setpgid(0, 0)`.
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }
}

async fn pump_lines(
    stdout: tokio::process::ChildStdout,
    stderr: tokio::process::ChildStderr,
    tx: UnboundedSender<WorkerLine>,
) {
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    // Once stderr hits EOF (or errors) it stays ready forever, so a worker
    // that closes stderr early while stdout stays open must stop being
    // polled — otherwise `select!` spins on it at 100% CPU for the rest of
    // the batch.
    let mut stderr_open = true;
    loop {
        tokio::select! {
            line = out_lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let forwarded = match protocol::decode(&line) {
                            Some(msg) => WorkerLine::Message(msg),
                            None => WorkerLine::Noise(line),
                        };
                        if tx.send(forwarded).is_err() {
                            return;
                        }
                    }
                    _ => break,
                }
            }
            line = err_lines.next_line(), if stderr_open => {
                match line {
                    Ok(Some(line)) => {
                        if tx.send(WorkerLine::Noise(line)).is_err() {
                            return;
                        }
                    }
                    _ => stderr_open = false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_missing_binary_is_spawn_error() {
        let result = WorkerHandle::spawn("/no/such/hangwarden-worker-binary", &[]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn discover_distinguishes_no_framework_from_generic_failure() {
        let script = concat!(
            r#"printf '%s\n' '{"type":"error","message":"nope","details":"no-framework"}'"#,
            "; exec cat > /dev/null"
        );
        let mut handle = WorkerHandle::spawn("sh", &["-c".to_string(), script.to_string()])
            .expect("sh should spawn");
        let err = handle.discover("tests.dll").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoFrameworkDetected { .. }));
        handle.terminate(Duration::from_millis(200)).await;

        let script2 = concat!(
            r#"printf '%s\n' '{"type":"error","message":"boom"}'"#,
            "; exec cat > /dev/null"
        );
        let mut handle2 = WorkerHandle::spawn("sh", &["-c".to_string(), script2.to_string()])
            .expect("sh should spawn");
        let err2 = handle2.discover("tests.dll").await.unwrap_err();
        assert!(matches!(err2, DiscoveryError::DiscoveryFailed { .. }));
        handle2.terminate(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn discover_and_run_against_a_real_shell_worker() {
        // Uses `cat` as a trivial stand-in worker: it echoes back whatever
        // we write to its stdin, verbatim, line for line. That's enough to
        // exercise the send/recv plumbing without a real test framework.
        let mut handle = WorkerHandle::spawn("cat", &[]).expect("cat should spawn");
        handle
            .send(&Message::Discover {
                assembly: "x".into(),
            })
            .await
            .unwrap();
        match handle.recv().await {
            Some(WorkerLine::Message(Message::Discover { assembly })) => {
                assert_eq!(assembly, "x");
            }
            other => panic!("unexpected line: {other:?}"),
        }
        handle.terminate(Duration::from_millis(200)).await;
    }
}
