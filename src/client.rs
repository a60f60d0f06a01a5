//! Async driver for [`ArmController`].
//!
//! One task multiplexes transport events, the retry ticker, the frame ticker
//! and operator input, so the controller itself never needs locking.

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::chain::Point;
use crate::channel::FrameSink;
use crate::config::ClientConfig;
use crate::controller::{ArmButton, ArmController, ArmView};
use crate::transport::{ReconnectingSocket, TransportEvent};

/// Operator input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ArmInput {
    PointerDown(Point),
    PointerMove(Point),
    PointerUp(Point),
    Button(ArmButton),
}

impl FromStr for ArmInput {
    type Err = anyhow::Error;

    /// Parse `down X Y`, `move X Y`, `up X Y` or a button name.
    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            bail!("empty input");
        };

        let mut point = || -> Result<Point> {
            let x: f64 = parts
                .next()
                .context("missing x")?
                .parse()
                .context("bad x")?;
            let y: f64 = parts
                .next()
                .context("missing y")?
                .parse()
                .context("bad y")?;
            Ok(Point::new(x, y))
        };

        match verb {
            "down" => Ok(ArmInput::PointerDown(point()?)),
            "move" => Ok(ArmInput::PointerMove(point()?)),
            "up" => Ok(ArmInput::PointerUp(point()?)),
            other => Ok(ArmInput::Button(other.parse()?)),
        }
    }
}

fn apply_input<S: FrameSink, V: ArmView>(controller: &mut ArmController<S, V>, input: ArmInput) {
    match input {
        ArmInput::PointerDown(p) => {
            if controller.pointer_down(p).is_none() {
                tracing::debug!("Pointer ignored while animating");
            }
        }
        ArmInput::PointerMove(p) => {
            controller.pointer_move(p);
        }
        ArmInput::PointerUp(p) => {
            controller.pointer_up(p);
        }
        ArmInput::Button(button) => {
            if !controller.press(button) {
                tracing::debug!("{:?} ignored while animating", button);
            }
        }
    }
}

/// Connect to the robot and drive the arm until `cancel` fires or `inputs` closes.
pub async fn run_client<V: ArmView>(
    config: ClientConfig,
    view: V,
    mut inputs: mpsc::Receiver<ArmInput>,
    cancel: CancellationToken,
) -> Result<()> {
    config.validate()?;

    let (handle, mut events, transport) = ReconnectingSocket::new(config.url.clone())
        .backoff(config.reconnect_initial(), config.reconnect_max())
        .spawn(cancel.child_token());

    let mut controller = ArmController::new(&config, handle, view);

    let mut retry = interval(config.retry_interval());
    retry.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame = interval(config.frame_interval());
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_frame = Instant::now();

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            event = events.recv() => match event {
                Some(TransportEvent::Connecting) => controller.on_connecting(),
                Some(TransportEvent::Open) => controller.on_open(),
                Some(TransportEvent::Message(text)) => controller.on_text(&text),
                Some(TransportEvent::Error(reason)) => {
                    let _ = controller.on_transport_error(&reason);
                }
                None => break Err(anyhow::anyhow!("transport task exited")),
            },
            _ = retry.tick() => {
                controller.retry_tick();
            }
            _ = frame.tick() => {
                let now = Instant::now();
                controller.frame_tick(now - last_frame);
                last_frame = now;
            }
            input = inputs.recv() => match input {
                Some(input) => apply_input(&mut controller, input),
                None => {
                    tracing::info!("Input closed, shutting down");
                    break Ok(());
                }
            },
        }
    };

    cancel.cancel();
    if let Err(e) = transport.await {
        tracing::warn!("Transport task panicked: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    #[test]
    fn test_parse_input() {
        assert_eq!(
            "down 120 -30".parse::<ArmInput>().unwrap(),
            ArmInput::PointerDown(Point::new(120.0, -30.0))
        );
        assert_eq!(
            "move 1.5 2".parse::<ArmInput>().unwrap(),
            ArmInput::PointerMove(Point::new(1.5, 2.0))
        );
        assert_eq!(
            "extend".parse::<ArmInput>().unwrap(),
            ArmInput::Button(ArmButton::Extend)
        );
        assert!("up 1".parse::<ArmInput>().is_err());
        assert!("move x 2".parse::<ArmInput>().is_err());
        assert!("".parse::<ArmInput>().is_err());
        assert!("dance".parse::<ArmInput>().is_err());
    }

    struct ForwardingView(mpsc::UnboundedSender<String>);

    impl ArmView for ForwardingView {
        fn log(&mut self, line: &str) {
            let _ = self.0.send(line.to_string());
        }

        fn draw(&mut self, _chain: &Chain) {}
    }

    #[tokio::test]
    async fn test_possesses_robot_and_receives_log() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Minimal robot: ack every reliable frame, greet after possess.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            let mut commands = Vec::new();
            while let Some(Ok(msg)) = read.next().await {
                let Message::Text(text) = msg else { continue };
                let v: serde_json::Value = serde_json::from_str(&text.to_string()).unwrap();
                let c = v["c"].as_str().unwrap_or_default().to_string();
                if let Some(f) = v.get("f") {
                    let ack = serde_json::json!({"c": c, "f": f}).to_string();
                    write.send(Message::Text(ack.into())).await.unwrap();
                }
                commands.push(c.clone());
                if c == "possess" {
                    let log = r#"{"c":"log","msg":"robot says hi"}"#.to_string();
                    write.send(Message::Text(log.into())).await.unwrap();
                }
                if c == "_gall" {
                    break;
                }
            }
            commands
        });

        let config = ClientConfig {
            url: format!("ws://{}/ws", addr),
            ..ClientConfig::default()
        };
        let (log_tx, mut log_rx) = mpsc::unbounded_channel();
        let (_input_tx, input_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let client = tokio::spawn(run_client(
            config,
            ForwardingView(log_tx),
            input_rx,
            cancel.clone(),
        ));

        let greeting = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(line) = log_rx.recv().await {
                if line == "robot says hi" {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(greeting);

        let commands = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(commands.first().map(String::as_str), Some("possess"));
        assert!(commands.iter().any(|c| c == "_gall"));

        cancel.cancel();
        client.await.unwrap().unwrap();
    }
}
