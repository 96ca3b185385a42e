//! External process ownership.
//!
//! `ProcessController` owns at most one simulation process. It forwards both output
//! channels as decoded text and publishes `Started`/`Finished` on the event channel.

use crate::decode::Utf8StreamDecoder;
use crate::model::{Channel, ExitOutcome, LaunchSpec, ProcessEvent, SimulationParameters};
use bytes::BytesMut;
use std::process::Stdio;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    Started { pid: Option<u32> },
    /// A process is already running; nothing was spawned.
    AlreadyRunning,
    /// The OS refused to start the program. `Finished` has already been emitted.
    LaunchFailed,
}

/// Handle for the running process.
struct RunCtx {
    kill_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<ExitOutcome>>,
    // Set by the supervisor right before it publishes Finished.
    done: Arc<AtomicBool>,
}

pub(crate) struct ProcessController {
    launch: LaunchSpec,
    event_tx: UnboundedSender<ProcessEvent>,
    run: Option<RunCtx>,
}

impl ProcessController {
    pub fn new(launch: LaunchSpec, event_tx: UnboundedSender<ProcessEvent>) -> Self {
        Self {
            launch,
            event_tx,
            run: None,
        }
    }

    /// True from a successful start until `Finished` has been published.
    pub fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|ctx| !ctx.done.load(Ordering::Acquire))
    }

    /// Launch the simulation with `params`. Must be called inside a Tokio runtime.
    pub fn start(&mut self, params: &SimulationParameters) -> StartOutcome {
        if self.is_running() {
            let _ = self.event_tx.send(ProcessEvent::Info(
                "A simulation is already running; stop it first.".into(),
            ));
            return StartOutcome::AlreadyRunning;
        }
        // Any previous run has completed; its supervisor already emitted Finished.
        self.run = None;

        let argv = self.launch.command_line(params);
        let mut cmd = Command::new(&self.launch.program);
        cmd.args(self.launch.args_for(params))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.launch.working_dir.as_ref() {
            cmd.current_dir(dir);
        }

        let started_at = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.launch.program, error = %e, "failed to launch simulation");
                let _ = self.event_tx.send(ProcessEvent::Finished {
                    outcome: ExitOutcome::LaunchFailed {
                        error: e.to_string(),
                    },
                    elapsed: started_at.elapsed(),
                });
                return StartOutcome::LaunchFailed;
            }
        };

        let pid = child.id();
        info!(?pid, argv = ?argv, "simulation started");
        // Started goes out before any reader exists so it always precedes output.
        let _ = self.event_tx.send(ProcessEvent::Started { pid, argv });

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(forward_channel(
                out,
                Channel::Stdout,
                self.event_tx.clone(),
            )));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(forward_channel(
                err,
                Channel::Stderr,
                self.event_tx.clone(),
            )));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let done = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(supervise(
            child,
            readers,
            kill_rx,
            self.launch.drain_timeout,
            started_at,
            done.clone(),
            self.event_tx.clone(),
        ));
        self.run = Some(RunCtx {
            kill_tx: Some(kill_tx),
            handle: Some(handle),
            done,
        });
        StartOutcome::Started { pid }
    }

    /// Forcibly terminate the running process. Returns false (and does nothing) if
    /// no process is running.
    pub fn kill(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.run.as_mut().and_then(|ctx| ctx.kill_tx.take()) {
            Some(tx) => {
                debug!("kill requested");
                tx.send(()).is_ok()
            }
            // Kill already requested for this run.
            None => true,
        }
    }

    /// Wait for the current run to finish and reap it. Pending forever when idle.
    ///
    /// Cancel-safe: the join handle is only taken after it resolved.
    pub async fn wait_finished(&mut self) -> ExitOutcome {
        if let Some(ctx) = &mut self.run {
            if let Some(h) = ctx.handle.as_mut() {
                let res = h.await;
                ctx.handle.take();
                self.run = None;
                return match res {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(error = %e, "process supervisor failed");
                        ExitOutcome::Exited { code: None }
                    }
                };
            }
        }
        futures::future::pending().await
    }
}

/// Wait for exit (or a kill request), drain the readers, then publish `Finished`.
async fn supervise(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    kill_rx: oneshot::Receiver<()>,
    drain_timeout: Duration,
    started_at: Instant,
    done: Arc<AtomicBool>,
    event_tx: UnboundedSender<ProcessEvent>,
) -> ExitOutcome {
    let mut killed = false;
    let status = tokio::select! {
        status = child.wait() => status,
        // A dropped sender also lands here: the controller is gone, so is the run.
        _ = kill_rx => {
            killed = true;
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "failed to kill simulation");
            }
            child.wait().await
        }
    };

    // Descendants may keep the pipes open after the child itself exited.
    let deadline = tokio::time::Instant::now() + drain_timeout;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            debug!("output still open after exit; abandoning reader");
            reader.abort();
            // Resolves once the task is gone, so nothing it reads lands after Finished.
            let _ = reader.await;
        }
    }

    let outcome = if killed {
        ExitOutcome::Killed
    } else {
        match status {
            Ok(status) => ExitOutcome::Exited {
                code: status.code(),
            },
            Err(e) => {
                warn!(error = %e, "failed to wait for simulation");
                ExitOutcome::Exited { code: None }
            }
        }
    };

    let elapsed = started_at.elapsed();
    info!(outcome = %outcome.to_message(), ?elapsed, "simulation finished");
    done.store(true, Ordering::Release);
    let _ = event_tx.send(ProcessEvent::Finished {
        outcome: outcome.clone(),
        elapsed,
    });
    outcome
}

/// Read one channel to EOF, emitting decoded chunks in order.
async fn forward_channel<R>(mut reader: R, channel: Channel, event_tx: UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8StreamDecoder::default();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.clear();
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = decoder.push(&buf);
                if !text.is_empty() && event_tx.send(channel.event(text)).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(?channel, error = %e, "error reading simulation output");
                break;
            }
        }
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = event_tx.send(channel.event(tail));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn shell(script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "sh".into(),
            // Trailing "sh" becomes $0; the simulation flags land in $1.. and are ignored.
            program_args: vec!["-c".into(), script.into(), "sh".into()],
            drain_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    async fn collect_run(rx: &mut UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for events")
                .expect("event channel closed");
            let done = matches!(ev, ProcessEvent::Finished { .. });
            events.push(ev);
            if done {
                return events;
            }
        }
    }

    fn channel_text(events: &[ProcessEvent], channel: Channel) -> String {
        events
            .iter()
            .filter_map(|ev| match (ev, channel) {
                (ProcessEvent::Stdout(t), Channel::Stdout) => Some(t.as_str()),
                (ProcessEvent::Stderr(t), Channel::Stderr) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn started_precedes_output_and_finished() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctrl = ProcessController::new(shell("echo out; echo err >&2; exit 3"), tx);
        let outcome = ctrl.start(&SimulationParameters::default());
        assert!(matches!(outcome, StartOutcome::Started { .. }));

        let events = collect_run(&mut rx).await;
        assert!(matches!(events[0], ProcessEvent::Started { .. }));
        let started = events
            .iter()
            .filter(|e| matches!(e, ProcessEvent::Started { .. }))
            .count();
        assert_eq!(started, 1);
        assert_eq!(channel_text(&events, Channel::Stdout), "out\n");
        assert_eq!(channel_text(&events, Channel::Stderr), "err\n");
        match events.last() {
            Some(ProcessEvent::Finished { outcome, .. }) => {
                assert_eq!(*outcome, ExitOutcome::Exited { code: Some(3) })
            }
            other => panic!("expected Finished, got {other:?}"),
        }
        assert_eq!(ctrl.wait_finished().await, ExitOutcome::Exited { code: Some(3) });
        assert!(!ctrl.is_running());
    }

    #[tokio::test]
    async fn started_event_carries_full_argv() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let launch = shell("exit 0");
        let params = SimulationParameters::default();
        let expected = launch.command_line(&params);
        let mut ctrl = ProcessController::new(launch, tx);
        ctrl.start(&params);
        let events = collect_run(&mut rx).await;
        match &events[0] {
            ProcessEvent::Started { argv, pid } => {
                assert_eq!(*argv, expected);
                assert!(pid.is_some());
            }
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn split_utf8_across_writes_matches_lossy_decoding() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // "€" split over two writes, then an invalid byte.
        let script = r"printf 'a\342\202'; sleep 0.1; printf '\254b\377c\n'";
        let mut ctrl = ProcessController::new(shell(script), tx);
        ctrl.start(&SimulationParameters::default());
        let events = collect_run(&mut rx).await;
        let expected = String::from_utf8_lossy(b"a\xe2\x82\xacb\xffc\n").into_owned();
        assert_eq!(channel_text(&events, Channel::Stdout), expected);
    }

    #[tokio::test]
    async fn kill_without_process_is_silent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctrl = ProcessController::new(shell("exit 0"), tx);
        assert!(!ctrl.kill());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn kill_terminates_running_process() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctrl = ProcessController::new(shell("echo ready; exec sleep 30"), tx);
        ctrl.start(&SimulationParameters::default());
        assert!(ctrl.is_running());
        assert!(ctrl.kill());

        let events = collect_run(&mut rx).await;
        match events.last() {
            Some(ProcessEvent::Finished { outcome, .. }) => assert_eq!(*outcome, ExitOutcome::Killed),
            other => panic!("expected Finished, got {other:?}"),
        }
        assert_eq!(ctrl.wait_finished().await, ExitOutcome::Killed);
        assert!(!ctrl.kill());
    }

    #[tokio::test]
    async fn start_while_running_is_rejected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctrl = ProcessController::new(shell("exec sleep 30"), tx);
        assert!(matches!(
            ctrl.start(&SimulationParameters::default()),
            StartOutcome::Started { .. }
        ));
        assert_eq!(
            ctrl.start(&SimulationParameters::default()),
            StartOutcome::AlreadyRunning
        );
        assert!(matches!(rx.recv().await, Some(ProcessEvent::Started { .. })));
        assert!(matches!(rx.recv().await, Some(ProcessEvent::Info(_))));
        ctrl.kill();
        let events = collect_run(&mut rx).await;
        let started = events
            .iter()
            .filter(|e| matches!(e, ProcessEvent::Started { .. }))
            .count();
        assert_eq!(started, 0);
    }

    #[tokio::test]
    async fn drain_timeout_cuts_off_lingering_descendants() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // The background subshell inherits stdout and keeps it open past the exit.
        let script = "echo hi; (sleep 2; echo late) & exit 0";
        let mut ctrl = ProcessController::new(shell(script), tx);
        ctrl.start(&SimulationParameters::default());

        let events = collect_run(&mut rx).await;
        assert_eq!(channel_text(&events, Channel::Stdout), "hi\n");
        match events.last() {
            Some(ProcessEvent::Finished { outcome, elapsed }) => {
                assert_eq!(*outcome, ExitOutcome::Exited { code: Some(0) });
                assert!(*elapsed < Duration::from_millis(1500), "{elapsed:?}");
            }
            other => panic!("expected Finished, got {other:?}"),
        }
        assert!(!ctrl.is_running());

        // Nothing from that run shows up after Finished.
        let late = tokio::time::timeout(Duration::from_millis(2500), rx.recv()).await;
        assert!(late.is_err(), "unexpected event after Finished: {late:?}");
    }

    #[tokio::test]
    async fn dropping_controller_kills_running_process() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctrl = ProcessController::new(shell("exec sleep 30"), tx);
        let pid = match ctrl.start(&SimulationParameters::default()) {
            StartOutcome::Started { pid: Some(pid) } => pid,
            other => panic!("expected a started process, got {other:?}"),
        };
        drop(ctrl);

        let events = collect_run(&mut rx).await;
        match events.last() {
            Some(ProcessEvent::Finished { outcome, .. }) => assert_eq!(*outcome, ExitOutcome::Killed),
            other => panic!("expected Finished, got {other:?}"),
        }
        // The supervisor reaped the child before Finished, so the pid is gone.
        let alive = std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(Stdio::null())
            .status()
            .expect("run kill -0");
        assert!(!alive.success(), "pid {pid} still alive");
    }

    #[tokio::test]
    async fn launch_failure_finishes_without_started_and_allows_retry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let missing = LaunchSpec {
            program: "/nonexistent/ricebph-simulation".into(),
            program_args: Vec::new(),
            ..Default::default()
        };
        let mut ctrl = ProcessController::new(missing, tx.clone());
        assert_eq!(
            ctrl.start(&SimulationParameters::default()),
            StartOutcome::LaunchFailed
        );
        match rx.try_recv() {
            Ok(ProcessEvent::Finished {
                outcome: ExitOutcome::LaunchFailed { .. },
                ..
            }) => {}
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
        assert!(!ctrl.is_running());

        ctrl.launch = shell("echo retried");
        assert!(matches!(
            ctrl.start(&SimulationParameters::default()),
            StartOutcome::Started { .. }
        ));
        let events = collect_run(&mut rx).await;
        assert_eq!(channel_text(&events, Channel::Stdout), "retried\n");
    }
}
