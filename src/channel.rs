//! At-least-once command delivery over an unreliable frame transport.
//!
//! [`ReliableChannel`] tags reliable commands with an id (`f`), keeps them
//! until the robot echoes that id back, and retransmits every pending command
//! on each [`ReliableChannel::retry_tick`]. Inbound sequenced events (`e`) are
//! echoed and deduplicated against the last accepted sequence number.
//!
//! The channel never owns a socket. Frames go out through a [`FrameSink`], and
//! the owner feeds inbound text and lifecycle changes in. All methods run to
//! completion without blocking.

use std::collections::HashMap;

use crate::error::ChannelError;
use crate::protocol::{self, commands, Inbound, Message};

/// Destination for outbound text frames.
pub trait FrameSink {
    /// Queue one frame for transmission. Delivery is best effort.
    fn send_frame(&mut self, frame: String);
}

impl FrameSink for Vec<String> {
    fn send_frame(&mut self, frame: String) {
        self.push(frame);
    }
}

/// How many times a reliable command is retransmitted before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptBudget {
    Bounded(u32),
    Unlimited,
}

/// Connection phase as seen by the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// A reliable command awaiting acknowledgment.
#[derive(Debug)]
pub struct PendingCommand<K> {
    pub id: u64,
    pub command: String,
    /// Full message as first sent, including `c` and `f`.
    pub payload: Message,
    frame: String,
    attempts: u32,
    budget: AttemptBudget,
    on_ack: Option<K>,
}

impl<K> PendingCommand<K> {
    /// Retransmissions so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn budget(&self) -> AttemptBudget {
        self.budget
    }
}

/// A command whose acknowledgment arrived.
#[derive(Debug, PartialEq)]
pub struct Acked<K> {
    pub id: u64,
    pub command: String,
    /// Continuation supplied to [`ReliableChannel::send_reliable`].
    pub continuation: Option<K>,
}

/// Result of one retry tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryReport {
    /// Frames retransmitted.
    pub resent: usize,
    /// Ids dropped because their attempt budget ran out.
    pub expired: Vec<u64>,
}

/// What the owner should do with an inbound frame.
#[derive(Debug, PartialEq)]
pub enum Dispatch<K> {
    /// One of our commands was acknowledged.
    Acked(Acked<K>),
    /// Application message to act on.
    Message(Message),
    /// Sequenced event already seen; echoed but not forwarded.
    Duplicate(u64),
    /// Ack for an id that is no longer pending.
    Ignored,
}

/// Reliable command/event channel.
///
/// `K` is the continuation type handed back when a command is acknowledged.
pub struct ReliableChannel<S: FrameSink, K> {
    sink: S,
    next_id: u64,
    last_inbound_seq: u64,
    pending: HashMap<u64, PendingCommand<K>>,
    phase: ConnectionPhase,
    retrying: bool,
}

impl<S: FrameSink, K> ReliableChannel<S, K> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_id: 0,
            last_inbound_seq: 0,
            pending: HashMap::new(),
            phase: ConnectionPhase::Disconnected,
            retrying: false,
        }
    }

    /// Send `command` reliably and return its id.
    ///
    /// The command is recorded even if the transport is down; the retry ticker
    /// transmits it once a connection is open.
    pub fn send_reliable(
        &mut self,
        command: &str,
        payload: Message,
        budget: AttemptBudget,
        on_ack: Option<K>,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;

        let payload = protocol::build_command(command, payload, Some(id));
        let frame = protocol::encode(&payload);
        self.transmit(frame.clone());

        self.pending.insert(
            id,
            PendingCommand {
                id,
                command: command.to_string(),
                payload,
                frame,
                attempts: 0,
                budget,
                on_ack,
            },
        );
        id
    }

    /// Send `command` once, without tracking.
    pub fn send_unreliable(&mut self, command: &str, payload: Message) {
        let message = protocol::build_command(command, payload, None);
        self.transmit(protocol::encode(&message));
    }

    /// Retransmit every pending command and expire exhausted ones.
    ///
    /// Does nothing while the retry ticker is stopped.
    pub fn retry_tick(&mut self) -> RetryReport {
        let mut report = RetryReport::default();
        if !self.retrying {
            return report;
        }

        let mut ids: Vec<u64> = self.pending.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let Some(cmd) = self.pending.get_mut(&id) else {
                continue;
            };
            let frame = cmd.frame.clone();
            let expired = match cmd.budget {
                AttemptBudget::Unlimited => false,
                AttemptBudget::Bounded(max) => {
                    cmd.attempts += 1;
                    cmd.attempts >= max
                }
            };
            if expired {
                tracing::debug!(
                    "Command {} ({}) expired after {} attempts",
                    id,
                    cmd.command,
                    cmd.attempts
                );
                self.pending.remove(&id);
                report.expired.push(id);
            }
            self.transmit(frame);
            report.resent += 1;
        }

        if report.resent > 0 {
            tracing::debug!("Retransmitted {} pending commands", report.resent);
        }
        report
    }

    /// Remove a pending command on acknowledgment.
    ///
    /// Returns `None` for unknown or already acknowledged ids.
    pub fn on_ack_received(&mut self, id: u64) -> Option<Acked<K>> {
        let cmd = self.pending.remove(&id)?;
        Some(Acked {
            id,
            command: cmd.command,
            continuation: cmd.on_ack,
        })
    }

    /// Echo an inbound event and decide whether to accept it.
    ///
    /// Sequence `0` always passes and resets the cursor.
    pub fn on_event_received(&mut self, seq: u64, message: Message) -> Option<Message> {
        self.transmit(protocol::encode_event_echo(seq, &message));

        if seq != 0 && seq <= self.last_inbound_seq {
            tracing::debug!(
                "Dropping stale event {} (last accepted {})",
                seq,
                self.last_inbound_seq
            );
            return None;
        }
        self.last_inbound_seq = seq;
        Some(message)
    }

    /// Parse one inbound text frame and route it.
    pub fn handle_text(&mut self, text: &str) -> Result<Dispatch<K>, ChannelError> {
        match protocol::parse_frame(text)? {
            Inbound::Ack { id, .. } => Ok(match self.on_ack_received(id) {
                Some(acked) => Dispatch::Acked(acked),
                None => Dispatch::Ignored,
            }),
            Inbound::Event { seq, message } => Ok(match self.on_event_received(seq, message) {
                Some(message) => Dispatch::Message(message),
                None => Dispatch::Duplicate(seq),
            }),
            Inbound::Plain(message) => Ok(Dispatch::Message(message)),
        }
    }

    /// Transport opened: start retrying and issue the possess handshake.
    ///
    /// Returns the id of the `possess` command. A handshake left pending from
    /// an earlier connection is replaced, so only one is ever outstanding.
    pub fn on_open(&mut self, on_possessed: Option<K>) -> u64 {
        self.phase = ConnectionPhase::Connected;
        self.retrying = true;

        self.pending.retain(|_, cmd| cmd.command != commands::POSSESS);

        tracing::info!("Connected, attempting to possess the robot");
        self.send_reliable(
            commands::POSSESS,
            Message::new(),
            AttemptBudget::Unlimited,
            on_possessed,
        )
    }

    /// Transport failed: stop retrying, keep pending commands.
    pub fn on_transport_error(&mut self, reason: &str) -> ChannelError {
        self.phase = ConnectionPhase::Disconnected;
        self.retrying = false;
        tracing::warn!(
            "Connection FAILED: {} ({} commands pending)",
            reason,
            self.pending.len()
        );
        ChannelError::transport(reason)
    }

    /// Transport is attempting to (re)connect.
    pub fn set_connecting(&mut self) {
        self.phase = ConnectionPhase::Connecting;
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }

    /// Whether the retry ticker is running.
    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, id: u64) -> Option<&PendingCommand<K>> {
        self.pending.get(&id)
    }

    pub fn last_inbound_seq(&self) -> u64 {
        self.last_inbound_seq
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn transmit(&mut self, frame: String) {
        if self.phase != ConnectionPhase::Connected {
            tracing::debug!("Not connected, dropping outbound frame");
            return;
        }
        self.sink.send_frame(frame);
    }
}
