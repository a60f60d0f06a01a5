//! Fake arm server - simulates the robot side of the dashboard protocol.
//!
//! Drop-in stand-in for the robot's WebSocket endpoint that doesn't need
//! hardware. Acknowledges every reliable frame, answers the possess
//! handshake, pushes widget state as sequenced events and retransmits each
//! event until the client echoes it.
//!
//! Usage:
//!   fake-arm-server [options]
//!
//! Options:
//!   --port <port>        Listen port (default: 9000)
//!   --uuid <id>          Grid widget id of the arm (default: 0)
//!   --state-ms <ms>      Period of arm state pushes (default: 1000)
//!   --drop-rate <p>      Probability of dropping an inbound frame (default: 0)

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use gridarm::protocol::{self, commands, Inbound, Message};
use gridarm::ArmInfo;
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

const EVENT_RETRY: Duration = Duration::from_millis(100);

struct Args {
    port: u16,
    uuid: u32,
    state_ms: u64,
    drop_rate: f64,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args {
        port: 9000,
        uuid: 0,
        state_ms: 1000,
        drop_rate: 0.0,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                result.port = args[i + 1].parse().context("invalid --port")?;
                i += 2;
            }
            "--uuid" if i + 1 < args.len() => {
                result.uuid = args[i + 1].parse().context("invalid --uuid")?;
                i += 2;
            }
            "--state-ms" if i + 1 < args.len() => {
                result.state_ms = args[i + 1].parse().context("invalid --state-ms")?;
                i += 2;
            }
            "--drop-rate" if i + 1 < args.len() => {
                result.drop_rate = args[i + 1].parse().context("invalid --drop-rate")?;
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    result.drop_rate = result.drop_rate.clamp(0.0, 1.0);
    result.state_ms = result.state_ms.max(10);
    Ok(result)
}

fn print_usage() {
    println!("Fake Arm Server - simulates the robot's dashboard WebSocket endpoint");
    println!();
    println!("Usage: fake-arm-server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <port>        Listen port (default: 9000)");
    println!("  --uuid <id>          Grid widget id of the arm (default: 0)");
    println!("  --state-ms <ms>      Period of arm state pushes (default: 1000)");
    println!("  --drop-rate <p>      Probability of dropping an inbound frame (default: 0)");
    println!();
    println!("Examples:");
    println!("  fake-arm-server                          # listen on ws://0.0.0.0:9000/ws");
    println!("  fake-arm-server --drop-rate 0.3          # lossy link");
}

/// Robot-side protocol state for one client connection.
struct RobotSession {
    uuid: u32,
    possessed: bool,
    next_seq: u64,
    /// Sequenced events not yet echoed, by sequence number.
    unechoed: BTreeMap<u64, String>,
    arm_x: f64,
    arm_y: f64,
}

impl RobotSession {
    fn new(uuid: u32) -> Self {
        Self {
            uuid,
            possessed: false,
            next_seq: 0,
            unechoed: BTreeMap::new(),
            arm_x: 0.0,
            arm_y: 0.0,
        }
    }

    /// Handle one inbound frame and return the frames to send back.
    fn handle_frame(&mut self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let inbound = match protocol::parse_frame(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!("Bad frame from client: {}", e);
                return out;
            }
        };

        let message = match inbound {
            Inbound::Event { seq, .. } => {
                if self.unechoed.remove(&seq).is_some() {
                    tracing::debug!("Event {} echoed", seq);
                }
                return out;
            }
            Inbound::Ack { id, message } => {
                let mut ack = Message::new();
                if let Some(c) = message.get(protocol::COMMAND_FIELD) {
                    ack.insert(protocol::COMMAND_FIELD.to_string(), c.clone());
                }
                ack.insert(protocol::ACK_FIELD.to_string(), Value::from(id));
                out.push(protocol::encode(&ack));
                message
            }
            Inbound::Plain(message) => message,
        };

        match protocol::command_of(&message) {
            Some(commands::POSSESS) => {
                if !self.possessed {
                    self.possessed = true;
                    tracing::info!("Client possessed the robot");
                    let mut log = Message::new();
                    log.insert("msg".to_string(), Value::from("Robot possessed"));
                    out.push(self.push_event(commands::LOG, log));
                }
            }
            Some(commands::GRID_ALL) => {
                out.push(self.layout_event());
                let mut tab = Message::new();
                tab.insert("tab".to_string(), Value::from(0));
                out.push(self.push_event(commands::GRID_TAB, tab));
            }
            Some(commands::GRID_EVENT) => self.on_widget_event(&message),
            Some(other) => tracing::debug!("Ignoring command {}", other),
            None => {}
        }
        out
    }

    fn on_widget_event(&mut self, message: &Message) {
        match message.get("ev").and_then(Value::as_str) {
            Some("pos") => {
                let st = message.get("st");
                let x = st.and_then(|s| s.get("armX")).and_then(Value::as_f64);
                let y = st.and_then(|s| s.get("armY")).and_then(Value::as_f64);
                if let (Some(x), Some(y)) = (x, y) {
                    if (x - self.arm_x).abs() > 0.05 || (y - self.arm_y).abs() > 0.05 {
                        tracing::debug!("Arm target ({:.1}, {:.1})", x, y);
                    }
                    self.arm_x = x;
                    self.arm_y = y;
                }
            }
            Some("grab") => tracing::info!("Grab at ({:.1}, {:.1})", self.arm_x, self.arm_y),
            Some(other) => tracing::debug!("Widget event {}", other),
            None => {}
        }
    }

    fn layout_event(&mut self) -> String {
        let info = serde_json::to_value(ArmInfo::default()).unwrap_or(Value::Null);
        let mut state = Message::new();
        state.insert(self.uuid.to_string(), json!({ "info": info }));
        self.push_event(commands::GRID_STATE, state)
    }

    /// Current arm position as a `_gst` event, if possessed.
    fn state_event(&mut self) -> Option<String> {
        if !self.possessed {
            return None;
        }
        let mut state = Message::new();
        state.insert(
            self.uuid.to_string(),
            json!({ "armX": self.arm_x, "armY": self.arm_y }),
        );
        Some(self.push_event(commands::GRID_STATE, state))
    }

    fn push_event(&mut self, command: &str, payload: Message) -> String {
        self.next_seq += 1;
        let seq = self.next_seq;
        let mut message = protocol::build_command(command, payload, None);
        message.insert(protocol::SEQ_FIELD.to_string(), Value::from(seq));
        let frame = protocol::encode(&message);
        self.unechoed.insert(seq, frame.clone());
        frame
    }

    fn retransmit(&self) -> Vec<String> {
        self.unechoed.values().cloned().collect()
    }
}

async fn handle_connection(
    stream: TcpStream,
    args: &Args,
    cancel: CancellationToken,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let mut session = RobotSession::new(args.uuid);

    let mut retry = tokio::time::interval(EVENT_RETRY);
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut state = tokio::time::interval(Duration::from_millis(args.state_ms));
    state.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let outgoing = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if args.drop_rate > 0.0 && rand::rng().random_bool(args.drop_rate) {
                        tracing::debug!("Dropping inbound frame");
                        continue;
                    }
                    session.handle_frame(&text.to_string())
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            },
            _ = retry.tick() => session.retransmit(),
            _ = state.tick() => session.state_event().into_iter().collect(),
        };

        for frame in outgoing {
            write.send(WsMessage::Text(frame.into())).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fake_arm_server=info".parse()?)
                .add_directive("warn".parse()?),
        )
        .init();

    let args = std::sync::Arc::new(parse_args()?);

    println!();
    println!("========================================");
    println!("Fake Arm Server");
    println!("========================================");
    println!("Listen:    ws://0.0.0.0:{}/ws", args.port);
    println!("Widget:    {}", args.uuid);
    println!("State:     every {} ms", args.state_ms);
    println!("Drop rate: {:.2}", args.drop_rate);
    println!("========================================");
    println!();

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    tracing::info!("Waiting for WebSocket connections...");

    let mut current_conn: Option<(CancellationToken, tokio::task::JoinHandle<()>)> = None;

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!("Client connected: {}", peer);

        // Cancel previous connection
        if let Some((cancel, handle)) = current_conn.take() {
            tracing::info!("New client connected, closing previous connection");
            cancel.cancel();
            let _ = handle.await;
        }

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let args = std::sync::Arc::clone(&args);

        let handle = tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &args, cancel_clone).await {
                tracing::error!("Connection error: {}", e);
            }
            tracing::info!("Client disconnected");
        });

        current_conn = Some((cancel, handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[test]
    fn test_acks_and_greets_on_possess() {
        let mut session = RobotSession::new(2);
        let out = session.handle_frame(r#"{"c":"possess","f":1}"#);
        assert_eq!(out.len(), 2);
        assert_eq!(parse(&out[0]), json!({"c": "possess", "f": 1}));
        assert_eq!(parse(&out[1]), json!({"c": "log", "e": 1, "msg": "Robot possessed"}));

        // Duplicate possess is acked again without a second greeting.
        assert_eq!(session.handle_frame(r#"{"c":"possess","f":1}"#).len(), 1);
    }

    #[test]
    fn test_events_retransmit_until_echoed() {
        let mut session = RobotSession::new(2);
        session.handle_frame(r#"{"c":"possess","f":1}"#);
        let out = session.handle_frame(r#"{"c":"_gall","f":2}"#);
        assert_eq!(out.len(), 3);
        let layout = parse(&out[1]);
        assert_eq!(layout["c"], json!("_gst"));
        assert!(layout["2"]["info"]["bones"].is_array());

        assert_eq!(session.retransmit().len(), 3);
        session.handle_frame(r#"{"c":"log","e":1}"#);
        session.handle_frame(r#"{"c":"_gst","e":2}"#);
        assert_eq!(session.retransmit().len(), 1);
    }

    #[test]
    fn test_tracks_arm_position() {
        let mut session = RobotSession::new(2);
        assert!(session.state_event().is_none());
        session.handle_frame(r#"{"c":"possess","f":1}"#);
        session.handle_frame(r#"{"c":"_gev","id":2,"ev":"pos","st":{"armX":12.5,"armY":-3.0}}"#);
        let state = parse(&session.state_event().unwrap());
        assert_eq!(state["2"], json!({"armX": 12.5, "armY": -3.0}));
    }
}
