//! Live-push feed: a WebSocket endpoint that emits one JSON snapshot per
//! second to every connected subscriber, and accepts inbound `{cmd, args}`
//! control messages mirroring the command intake surface.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::engine::TickResult;
use crate::intake::{self, Command};

/// JSON snapshot shape emitted once per second on the push feed.
#[derive(Debug, Clone, Serialize)]
pub struct PushSnapshot {
    pub t_sim: f64,
    pub state: u16,
    pub turb_raw: f64,
    pub turb_filt: f64,
    pub ph: f64,
    pub chlorine: f64,
    pub flow_raw: f64,
    pub flow_treated: f64,
    pub level_pct: f64,
    pub temperature: f64,
    pub filter_dp: f64,
    pub alarm_word: u16,
    pub coils: Vec<bool>,
    pub dinputs: Vec<bool>,
}

impl From<&TickResult> for PushSnapshot {
    fn from(tick: &TickResult) -> Self {
        Self {
            t_sim: tick.sim_now,
            state: tick.state.code(),
            turb_raw: tick.snapshot.turb_raw,
            turb_filt: tick.snapshot.turb_filtered,
            ph: tick.snapshot.ph,
            chlorine: tick.snapshot.chlorine,
            flow_raw: tick.snapshot.flow_raw,
            flow_treated: tick.snapshot.flow_treated,
            level_pct: tick.snapshot.level_pct,
            temperature: tick.snapshot.temperature,
            filter_dp: tick.snapshot.filter_dp,
            alarm_word: tick.alarm_word,
            coils: tick.coils.to_vec(),
            dinputs: tick.discretes.to_vec(),
        }
    }
}

/// Inbound control message: `{"cmd": "rain", "args": {"ntu": 700}}`.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    cmd: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// Fold an inbound `{cmd, args}` envelope into the same textual form the
/// command intake parser accepts, so both transports share one parser.
fn inbound_to_line(msg: &InboundMessage) -> String {
    if let Some(ntu) = msg.args.get("ntu").and_then(|v| v.as_f64()) {
        return format!("{} {ntu}", msg.cmd);
    }
    if let Some(sensor) = msg.args.get("sensor").and_then(|v| v.as_str()) {
        return format!("{} {sensor}", msg.cmd);
    }
    if let Some(enabled) = msg.args.get("enabled").and_then(|v| v.as_bool()) {
        return format!("{} {}", msg.cmd, if enabled { "on" } else { "off" });
    }
    msg.cmd.clone()
}

#[derive(Clone)]
pub struct PushState {
    pub snapshots: broadcast::Sender<PushSnapshot>,
    pub intake_tx: mpsc::UnboundedSender<Command>,
}

pub fn router(state: PushState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<PushState>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: PushState) {
    let mut rx = state.snapshots.subscribe();

    loop {
        tokio::select! {
            snapshot = rx.recv() => {
                let Ok(snapshot) = snapshot else { break };
                let Ok(json) = serde_json::to_string(&snapshot) else { continue };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_inbound(&text, &state);
                        if socket.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "push socket read error");
                        break;
                    }
                }
            }
        }
    }
}

fn handle_inbound(text: &str, state: &PushState) -> String {
    let parsed: Result<InboundMessage, _> = serde_json::from_str(text);
    let inbound = match parsed {
        Ok(m) => m,
        Err(e) => return format!("error: malformed message: {e}"),
    };

    let line = inbound_to_line(&inbound);
    match intake::parse_command(&line) {
        Ok(cmd) => {
            let _ = state.intake_tx.send(cmd);
            "ok".to_string()
        }
        Err(reason) => format!("error: {reason}"),
    }
}

/// Bind and serve the push WebSocket listener until the process shuts down.
pub async fn serve(addr: SocketAddr, state: PushState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind push listener on {addr}: {e}"))?;

    tracing::info!(%addr, "live-push server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
