// ABOUTME: Keeps one external agent process alive across crashes.
// ABOUTME: Watch task respawns after exits; optional periodic restart bounds process lifetime.

use crate::config::ProcessConfig;
use crate::error::{ErrorKind, PromptError};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand};
use tokio::sync::{watch, Mutex};

/// How often the watch task checks the child for an exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stdio handles of the current child, held apart from the lifecycle state so
/// a prompt reading the pipes does not block exit-watching.
pub struct ChildIo {
    pub stdin: ChildStdin,
    pub lines: Lines<BufReader<ChildStdout>>,
}

struct SupervisorState {
    child: Option<Child>,
    running: bool,
    generation: u64,
}

/// Supervises a single external command: spawn, watch, respawn.
///
/// At most one live child per supervisor; every restart kills and reaps the
/// previous child before spawning a replacement. `stop()` is idempotent.
pub struct ProcessSupervisor {
    config: ProcessConfig,
    state: Mutex<SupervisorState>,
    io: Arc<Mutex<Option<ChildIo>>>,
    stop: watch::Sender<bool>,
}

impl ProcessSupervisor {
    pub fn new(config: ProcessConfig) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            config,
            state: Mutex::new(SupervisorState {
                child: None,
                running: false,
                generation: 0,
            }),
            io: Arc::new(Mutex::new(None)),
            stop,
        })
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Stdio handles of the current child; `None` until the first spawn
    pub fn io(&self) -> Arc<Mutex<Option<ChildIo>>> {
        Arc::clone(&self.io)
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Spawn count, bumped on every (re)spawn
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Spawn the child and launch the watch task (and the periodic-restart
    /// task when configured). Fails if already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), PromptError> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(PromptError::new(
                ErrorKind::Spawn,
                format!("{} is already running", self.config.command),
            ));
        }
        self.spawn_child(&mut state).await?;
        state.running = true;
        drop(state);

        let supervisor = Arc::clone(self);
        tokio::spawn(async move { supervisor.watch_loop().await });

        if let Some(period) = self.config.periodic_restart() {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move { supervisor.periodic_restart_loop(period).await });
        }

        Ok(())
    }

    /// Kill and reap any existing child, then spawn a replacement
    pub async fn restart(&self) -> Result<(), PromptError> {
        let mut state = self.state.lock().await;
        if !state.running {
            return Err(PromptError::new(
                ErrorKind::Spawn,
                format!("{} is not running", self.config.command),
            ));
        }
        if let Some(mut child) = state.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(command = %self.config.command, error = %e, "Failed to kill child during restart");
            }
        }
        self.spawn_child(&mut state).await
    }

    /// Signal the background tasks to exit and kill the child if present.
    /// Safe to call any number of times.
    pub async fn stop(&self) {
        let was_stopped = self.stop.send_replace(true);
        if was_stopped {
            tracing::debug!(command = %self.config.command, "Supervisor already stopped");
        }
        let mut state = self.state.lock().await;
        state.running = false;
        if let Some(mut child) = state.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(command = %self.config.command, error = %e, "Failed to kill child during stop");
            }
        }
        drop(state);
        *self.io.lock().await = None;
    }

    async fn spawn_child(&self, state: &mut SupervisorState) -> Result<(), PromptError> {
        tracing::info!(
            command = %self.config.command,
            args = ?self.config.args,
            "Spawning agent process"
        );

        let mut child = ProcessCommand::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PromptError::new(
                    ErrorKind::Spawn,
                    format!("failed to spawn {}: {}", self.config.command, e),
                )
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            PromptError::new(ErrorKind::Spawn, "failed to capture child stdin")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            PromptError::new(ErrorKind::Spawn, "failed to capture child stdout")
        })?;

        if let Some(stderr) = child.stderr.take() {
            let command = self.config.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        tracing::warn!(command = %command, stderr = %line, "Agent process stderr");
                    }
                }
            });
        }

        *self.io.lock().await = Some(ChildIo {
            stdin,
            lines: BufReader::new(stdout).lines(),
        });
        state.child = Some(child);
        state.generation += 1;
        Ok(())
    }

    /// Crash-recovery loop: wait for the child to exit, sleep the restart
    /// delay, respawn. Exits only when a stop was requested.
    async fn watch_loop(self: Arc<Self>) {
        let mut stop_rx = self.stop.subscribe();

        loop {
            // Wait for the current child to exit (or find it already gone).
            let status = loop {
                if *stop_rx.borrow() {
                    return;
                }
                let exited = {
                    let mut state = self.state.lock().await;
                    if !state.running {
                        return;
                    }
                    match state.child.as_mut() {
                        None => Some(None),
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => {
                                state.child = None;
                                Some(Some(status))
                            }
                            Ok(None) => None,
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to poll child status");
                                None
                            }
                        },
                    }
                };
                match exited {
                    Some(status) => break status,
                    None => {
                        tokio::select! {
                            _ = stop_rx.changed() => return,
                            _ = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
                        }
                    }
                }
            };

            match status {
                Some(status) => tracing::warn!(
                    command = %self.config.command,
                    status = ?status.code(),
                    "Agent process exited; restarting"
                ),
                None => tracing::warn!(
                    command = %self.config.command,
                    "Agent process missing; restarting"
                ),
            }

            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = tokio::time::sleep(self.config.restart_delay()) => {}
            }

            let mut state = self.state.lock().await;
            if !state.running || *stop_rx.borrow() {
                return;
            }
            if let Err(e) = self.spawn_child(&mut state).await {
                // Try again after another delay; failures repeat until stop()
                tracing::error!(
                    command = %self.config.command,
                    error = %e,
                    "Respawn failed; retrying after delay"
                );
            }
        }
    }

    /// Unconditional restarts on a fixed timer, bounding the lifetime of any
    /// single process instance.
    async fn periodic_restart_loop(self: Arc<Self>, period: Duration) {
        let mut stop_rx = self.stop.subscribe();
        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = tokio::time::sleep(period) => {}
            }
            tracing::info!(command = %self.config.command, "Periodic restart");
            if let Err(e) = self.restart().await {
                tracing::error!(command = %self.config.command, error = %e, "Periodic restart failed");
            }
        }
    }
}
