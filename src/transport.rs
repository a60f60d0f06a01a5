//! Reconnecting WebSocket transport.
//!
//! A background task owns the socket, reconnects forever with exponential
//! backoff and reports lifecycle changes as [`TransportEvent`]s. Outbound frames
//! go through a [`SocketHandle`]. Frames queued while the socket is down are
//! discarded on the next connect; reliable commands are resent by the channel's
//! retry ticker instead.

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::channel::FrameSink;

/// Lifecycle and inbound traffic of the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection attempt is starting.
    Connecting,
    Open,
    Message(String),
    /// Connect failed or an open connection dropped.
    Error(String),
}

/// Cloneable sender for outbound text frames.
#[derive(Clone, Debug)]
pub struct SocketHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl FrameSink for SocketHandle {
    fn send_frame(&mut self, frame: String) {
        if self.tx.send(frame).is_err() {
            tracing::debug!("Transport task stopped, dropping frame");
        }
    }
}

/// Builder for the transport task.
#[derive(Clone, Debug)]
pub struct ReconnectingSocket {
    url: String,
    initial_delay: Duration,
    max_delay: Duration,
}

impl ReconnectingSocket {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Set the reconnect delay range.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max.max(initial);
        self
    }

    /// Spawn the transport task.
    ///
    /// The task exits when `cancel` fires or every [`SocketHandle`] is dropped.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (
        SocketHandle,
        mpsc::UnboundedReceiver<TransportEvent>,
        JoinHandle<()>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            if let Err(e) = self.run(out_rx, event_tx, cancel).await {
                tracing::error!("Transport task error: {}", e);
            }
        });

        (SocketHandle { tx: out_tx }, event_rx, task)
    }

    async fn run(
        self,
        mut out_rx: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut delay = self.initial_delay;

        loop {
            let _ = events.send(TransportEvent::Connecting);
            tracing::info!("Connecting to {}...", self.url);

            let connect = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = connect_async(self.url.as_str()) => result,
            };

            let ws_stream = match connect {
                Ok((ws_stream, _)) => ws_stream,
                Err(e) => {
                    tracing::warn!("WebSocket connect failed: {}, retrying in {:?}...", e, delay);
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    if !self.sleep(delay, &cancel).await {
                        return Ok(());
                    }
                    delay = (delay * 2).min(self.max_delay);
                    continue;
                }
            };

            delay = self.initial_delay;

            // Drain stale frames queued while disconnected
            while out_rx.try_recv().is_ok() {}

            tracing::info!("WebSocket connected to {}", self.url);
            let _ = events.send(TransportEvent::Open);

            let (mut write, mut read) = ws_stream.split();
            let reason = loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        };
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            break e.to_string();
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = events.send(TransportEvent::Message(text.to_string()));
                            }
                            Some(Ok(Message::Close(_))) | None => break "connection closed".to_string(),
                            Some(Ok(_)) => {}
                            Some(Err(e)) => break e.to_string(),
                        }
                    }
                }
            };

            tracing::warn!("WebSocket disconnected: {}, reconnecting in {:?}...", reason, delay);
            let _ = events.send(TransportEvent::Error(reason));
            if !self.sleep(delay, &cancel).await {
                return Ok(());
            }
        }
    }

    /// Sleep for `delay` plus up to 10% jitter. Returns false if cancelled.
    async fn sleep(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        let jitter_ms = (delay.as_millis() / 10) as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay + jitter) => true,
        }
    }
}
