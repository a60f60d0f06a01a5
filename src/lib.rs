//! gridarm - dashboard control client for a modular robot arm.
//!
//! The robot exposes a JSON-over-WebSocket endpoint. This crate keeps a
//! constrained kinematic model of the arm, solves pointer targets with a CCD
//! IK solver, plays keyframe animations paced by hardware acknowledgments, and
//! delivers commands at least once over a reconnecting socket.
//!
//! # Layout
//!
//! - [`chain`] / [`solver`]: kinematic model and IK
//! - [`animation`]: keyframe playback
//! - [`protocol`] / [`channel`]: wire frames and reliable delivery
//! - [`transport`]: reconnecting WebSocket
//! - [`controller`] / [`client`]: composition root and its async driver
//!
//! # Example
//!
//! ```no_run
//! use gridarm::{run_client, ArmInput, ClientConfig, TracingView};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = ClientConfig::default();
//! let (tx, rx) = tokio::sync::mpsc::channel(16);
//! tx.send("extend".parse::<ArmInput>()?).await?;
//! run_client(config, TracingView, rx, CancellationToken::new()).await
//! # }
//! ```

pub mod animation;
pub mod chain;
pub mod channel;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod protocol;
pub mod solver;
pub mod transport;

pub use animation::{AnimationPlayer, AnimationPreset, Keyframe, MotionSink, PlayerState};
pub use chain::{wrap_angle, ArmInfo, Body, Bone, BoneInfo, Chain, Point};
pub use channel::{
    Acked, AttemptBudget, ConnectionPhase, Dispatch, FrameSink, PendingCommand, ReliableChannel,
    RetryReport,
};
pub use client::{run_client, ArmInput};
pub use config::ClientConfig;
pub use controller::{AckContinuation, ArmButton, ArmController, ArmView, TracingView};
pub use error::{ChannelError, ConfigError};
pub use protocol::{Inbound, Message};
pub use solver::{rotate_arm, IkSolver, SolveOutcome, SolveStatus, SolverConfig};
pub use transport::{ReconnectingSocket, SocketHandle, TransportEvent};
