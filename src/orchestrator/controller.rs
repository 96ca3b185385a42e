//! Run lifecycle controller.
//!
//! Owns the process controller, applies start/stop commands from presentation layers
//! and reaps finished runs.

use super::process::{ProcessController, StartOutcome};
use crate::model::{LaunchSpec, ProcessEvent, SimulationParameters};
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

/// Commands emitted by UI layers to control the simulation.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Run(SimulationParameters),
    Stop,
    Quit,
}

/// Apply UI commands to the process controller until quit.
///
/// On `Quit` (or when every command sender is gone) a running simulation is killed and
/// the loop returns after its `Finished` has been published.
pub(crate) async fn run_controller(
    launch: LaunchSpec,
    event_tx: UnboundedSender<ProcessEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut process = ProcessController::new(launch, event_tx);
    let mut quit_pending = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Run(params)) => {
                        if let StartOutcome::Started { pid } = process.start(&params) {
                            debug!(?pid, "run accepted");
                        }
                    }
                    Some(UiCommand::Stop) => {
                        if !process.kill() {
                            debug!("stop requested with no simulation running");
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        quit_pending = true;
                        if !process.kill() {
                            break;
                        }
                        info!("waiting for simulation to terminate before exit");
                    }
                }
            }
            outcome = process.wait_finished() => {
                debug!(outcome = %outcome.to_message(), "run reaped");
                if quit_pending {
                    break;
                }
            }
        }
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::ExitOutcome;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn shell(script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "sh".into(),
            program_args: vec!["-c".into(), script.into(), "sh".into()],
            drain_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ProcessEvent>) -> ProcessEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn quit_kills_running_simulation_before_returning() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_controller(shell("exec sleep 30"), event_tx, cmd_rx));

        cmd_tx
            .send(UiCommand::Run(SimulationParameters::default()))
            .unwrap();
        assert!(matches!(
            next_event(&mut event_rx).await,
            ProcessEvent::Started { .. }
        ));
        cmd_tx.send(UiCommand::Quit).unwrap();

        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("controller did not exit")
            .unwrap()
            .unwrap();
        match next_event(&mut event_rx).await {
            ProcessEvent::Finished { outcome, .. } => assert_eq!(outcome, ExitOutcome::Killed),
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finished_run_can_be_started_again() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_controller(shell("exit 0"), event_tx, cmd_rx));

        for _ in 0..2 {
            cmd_tx
                .send(UiCommand::Run(SimulationParameters::default()))
                .unwrap();
            assert!(matches!(
                next_event(&mut event_rx).await,
                ProcessEvent::Started { .. }
            ));
            match next_event(&mut event_rx).await {
                ProcessEvent::Finished { outcome, .. } => assert!(outcome.is_success()),
                other => panic!("expected Finished, got {other:?}"),
            }
        }

        drop(cmd_tx);
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("controller did not exit")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn stop_when_idle_emits_nothing() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_controller(shell("exit 0"), event_tx, cmd_rx));
        cmd_tx.send(UiCommand::Stop).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();
        task.await.unwrap().unwrap();
        assert!(event_rx.recv().await.is_none());
    }
}
