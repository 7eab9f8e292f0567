//! Scan orchestrator: wires the tick, command-drain, and push loops to the
//! register bank and the two network servers, then watches all of them
//! until a signal or an unexpected task exit tells it to shut down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::intake::Command;
use crate::modbus;
use crate::process::{FaultTarget, SensorFault};
use crate::push::{self, PushSnapshot, PushState};
use crate::registers::{coil, PendingWrite, RegisterBank};

const TICK_PERIOD: Duration = Duration::from_millis(1_000);
const COMMAND_DRAIN_PERIOD: Duration = Duration::from_millis(500);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Addresses {
    pub modbus: SocketAddr,
    pub push: SocketAddr,
}

/// Run the simulator until SIGINT/SIGTERM or a critical task dies, then
/// drain in-flight work within a bounded grace window and return.
pub async fn run(engine: Engine, addrs: Addresses, seed: u64) -> anyhow::Result<()> {
    let bank = Arc::new(RegisterBank::new());
    let (writes_tx, writes_rx) = mpsc::channel::<PendingWrite>(256);
    let (intake_tx, intake_rx) = mpsc::unbounded_channel::<Command>();
    let (snapshots_tx, _) = broadcast::channel::<PushSnapshot>(64);

    tracing::info!(seed, modbus = %addrs.modbus, push = %addrs.push, "starting scan orchestrator");

    let mut modbus_handle: JoinHandle<anyhow::Result<()>> = tokio::spawn(modbus::serve(
        addrs.modbus,
        Arc::clone(&bank),
        writes_tx.clone(),
    ));

    let push_state = PushState {
        snapshots: snapshots_tx.clone(),
        intake_tx,
    };
    let mut push_handle: JoinHandle<anyhow::Result<()>> = tokio::spawn(push::serve(addrs.push, push_state));

    let mut drain_handle: JoinHandle<()> = {
        let bank = Arc::clone(&bank);
        tokio::spawn(command_drain_loop(bank, writes_rx))
    };

    let mut tick_handle: JoinHandle<()> = {
        let bank = Arc::clone(&bank);
        tokio::spawn(tick_loop(engine, bank, intake_rx, writes_tx, snapshots_tx))
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let exit_reason: &str;

    loop {
        tokio::select! {
            result = &mut tick_handle => {
                tracing::error!("CRITICAL: tick loop exited unexpectedly: {result:?}");
                exit_reason = "tick loop died";
                break;
            }

            result = &mut drain_handle => {
                tracing::error!("CRITICAL: command-drain loop exited unexpectedly: {result:?}");
                exit_reason = "command-drain loop died";
                break;
            }

            result = &mut modbus_handle => {
                tracing::error!("CRITICAL: modbus server exited unexpectedly: {result:?}");
                exit_reason = "modbus server died";
                break;
            }

            result = &mut push_handle => {
                tracing::error!("push server task exited unexpectedly: {result:?}");
                // Not safety-critical; the plant keeps running without a dashboard feed.
            }

            _ = &mut ctrl_c => {
                exit_reason = "SIGINT";
                break;
            }

            _ = sigterm.recv() => {
                exit_reason = "SIGTERM";
                break;
            }
        }
    }

    tracing::warn!(signal = exit_reason, "shutting down");

    tick_handle.abort();
    drain_handle.abort();
    push_handle.abort();
    modbus_handle.abort();
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Drains queued Modbus writes onto the bank every half second, the
/// boundary within which a coil or register write is guaranteed visible to
/// the next tick.
async fn command_drain_loop(bank: Arc<RegisterBank>, mut writes_rx: mpsc::Receiver<PendingWrite>) {
    let mut interval = tokio::time::interval(COMMAND_DRAIN_PERIOD);
    loop {
        interval.tick().await;
        let mut batch = Vec::new();
        while let Ok(write) = writes_rx.try_recv() {
            batch.push(write);
        }
        if !batch.is_empty() {
            bank.apply_writes(&batch);
        }
    }
}

/// Advances the simulation once a second. Owns the engine exclusively;
/// scenario commands queued by the intake channel are applied here,
/// immediately before the tick they are meant to affect. Broadcasts a push
/// snapshot from the tick result afterwards, outside the bank's lock.
async fn tick_loop(
    mut engine: Engine,
    bank: Arc<RegisterBank>,
    mut intake_rx: mpsc::UnboundedReceiver<Command>,
    writes_tx: mpsc::Sender<PendingWrite>,
    snapshots_tx: broadcast::Sender<PushSnapshot>,
) {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    loop {
        interval.tick().await;
        while let Ok(cmd) = intake_rx.try_recv() {
            apply_command(&mut engine, &writes_tx, cmd);
        }
        let result = engine.tick(&bank);
        // No subscribers is the common case between dashboard connections.
        let _ = snapshots_tx.send(PushSnapshot::from(&result));
    }
}

fn apply_command(engine: &mut Engine, writes_tx: &mpsc::Sender<PendingWrite>, cmd: Command) {
    match cmd {
        Command::Rain { peak_ntu } => engine.inject_rain(peak_ntu),
        Command::Dose { enabled } => {
            let _ = writes_tx.try_send(PendingWrite::Coil {
                index: coil::CHLORINE,
                value: enabled,
            });
        }
        Command::Fault { target } => engine.set_fault(target, fault_for(target)),
        Command::Clear { target } => engine.clear_fault(target),
        Command::Glitch => engine.glitch_all(),
        Command::Status => tracing::info!(sim_now = engine.sim_now(), "status requested"),
    }
}

fn fault_for(target: FaultTarget) -> SensorFault {
    match target {
        FaultTarget::Turbidity | FaultTarget::Chlorine | FaultTarget::Flow => SensorFault::HoldLast,
    }
}
