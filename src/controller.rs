//! Arm controller: ties pointer input, the IK solver, keyframe playback and the
//! reliable channel together.
//!
//! The controller is synchronous. Whoever owns it (see [`crate::client`])
//! forwards transport events, inbound frames, pointer input and the two
//! periodic ticks, one call at a time.

use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;

use crate::animation::{AnimationPlayer, AnimationPreset, MotionSink};
use crate::chain::{Chain, Point};
use crate::channel::{AttemptBudget, Dispatch, FrameSink, ReliableChannel, RetryReport};
use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::protocol::{self, commands, Message};
use crate::solver::{IkSolver, SolveOutcome};

/// What to do when a reliable command is acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckContinuation {
    /// The possess handshake completed.
    Possessed,
    /// A keyframe position reached the arm.
    Keyframe,
}

/// Rendering and logging collaborator.
///
/// All methods default to no-ops so headless owners implement only what they need.
pub trait ArmView {
    /// Geometry changed (new layout).
    fn update_position(&mut self, _chain: &Chain) {}
    /// Pose changed.
    fn draw(&mut self, _chain: &Chain) {}
    /// Line for the operator log.
    fn log(&mut self, _line: &str) {}
    /// Robot switched the active tab.
    fn set_tab(&mut self, _tab: u64) {}
}

/// View that reports through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingView;

impl ArmView for TracingView {
    fn draw(&mut self, chain: &Chain) {
        let end = chain.end_effector();
        tracing::debug!("Arm end effector at ({:.1}, {:.1})", end.x, end.y);
    }

    fn log(&mut self, line: &str) {
        tracing::info!("{}", line);
    }

    fn set_tab(&mut self, tab: u64) {
        tracing::info!("Robot switched to tab {}", tab);
    }
}

/// On-screen arm buttons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmButton {
    Retract,
    Extend,
    Grab,
}

impl FromStr for ArmButton {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RETRACT" => Ok(ArmButton::Retract),
            "EXTEND" => Ok(ArmButton::Extend),
            "GRAB" => Ok(ArmButton::Grab),
            other => bail!("unknown button: {}", other),
        }
    }
}

/// Emits keyframe targets as reliable `pos` events.
struct ChannelMotion<'a, S: FrameSink> {
    channel: &'a mut ReliableChannel<S, AckContinuation>,
    widget_uuid: u32,
    budget: AttemptBudget,
}

impl<S: FrameSink> MotionSink for ChannelMotion<'_, S> {
    fn emit_target(&mut self, target: Point) -> u64 {
        let payload = protocol::grid_event(
            self.widget_uuid,
            "pos",
            protocol::position_state(target.x, target.y),
        );
        self.channel.send_reliable(
            commands::GRID_EVENT,
            payload,
            self.budget,
            Some(AckContinuation::Keyframe),
        )
    }
}

pub struct ArmController<S: FrameSink, V: ArmView> {
    chain: Chain,
    solver: IkSolver,
    animation: Option<AnimationPlayer>,
    channel: ReliableChannel<S, AckContinuation>,
    view: V,
    widget_uuid: u32,
    budget: AttemptBudget,
    possessed: bool,
    touched: bool,
    pointer: Point,
    frame_divider: u32,
    divider: u32,
}

impl<S: FrameSink, V: ArmView> ArmController<S, V> {
    pub fn new(config: &ClientConfig, sink: S, view: V) -> Self {
        let mut controller = Self {
            chain: Chain::from_info(&config.arm),
            solver: IkSolver::new(config.solver.clone()),
            animation: None,
            channel: ReliableChannel::new(sink),
            view,
            widget_uuid: config.widget_uuid,
            budget: AttemptBudget::Bounded(config.retry_attempts),
            possessed: false,
            touched: false,
            pointer: Point::origin(),
            frame_divider: config.frame_divider.max(1),
            divider: 0,
        };
        controller.pointer = controller.chain.end_effector();
        controller.view.update_position(&controller.chain);
        controller.view.draw(&controller.chain);
        controller
    }

    // Transport lifecycle

    pub fn on_connecting(&mut self) {
        self.channel.set_connecting();
    }

    pub fn on_open(&mut self) {
        self.possessed = false;
        self.view.log("connected!");
        self.view.log("Attempting to possess the robot...");
        self.channel.on_open(Some(AckContinuation::Possessed));
    }

    pub fn on_transport_error(&mut self, reason: &str) -> ChannelError {
        self.view.log("Connection FAILED!");
        self.channel.on_transport_error(reason)
    }

    /// Handle one inbound text frame.
    pub fn on_text(&mut self, text: &str) {
        match self.channel.handle_text(text) {
            Ok(Dispatch::Acked(acked)) => match acked.continuation {
                Some(AckContinuation::Possessed) => self.on_possessed(),
                Some(AckContinuation::Keyframe) => {
                    if let Some(player) = self.animation.as_mut() {
                        player.acknowledge(acked.id);
                    }
                }
                None => {}
            },
            Ok(Dispatch::Message(message)) => self.on_message(message),
            Ok(Dispatch::Duplicate(_)) | Ok(Dispatch::Ignored) => {}
            Err(e) => tracing::warn!("Ignoring inbound frame: {}", e),
        }
    }

    fn on_possessed(&mut self) {
        if self.possessed {
            return;
        }
        self.possessed = true;
        tracing::info!("Possessed the robot");
        self.channel
            .send_reliable(commands::GRID_ALL, Message::new(), self.budget, None);
    }

    fn on_message(&mut self, message: Message) {
        match protocol::command_of(&message) {
            Some(commands::PONG) => {}
            Some(commands::LOG) => {
                if let Some(msg) = message.get("msg").and_then(|v| v.as_str()) {
                    self.view.log(msg);
                }
            }
            Some(commands::GRID_STATE) if self.possessed => self.apply_state(&message),
            Some(commands::GRID_TAB) if self.possessed => {
                if let Some(tab) = protocol::tab_index(&message) {
                    self.view.set_tab(tab);
                }
            }
            Some(other) => tracing::debug!("Unhandled command {}", other),
            None => tracing::debug!("Inbound frame without command"),
        }
    }

    fn apply_state(&mut self, message: &Message) {
        let Some(state) = protocol::widget_state(message, self.widget_uuid) else {
            return;
        };
        match protocol::arm_info(state) {
            Ok(Some(info)) => {
                if let Err(e) = info.validate() {
                    tracing::warn!("Rejecting arm layout: {}", e);
                    return;
                }
                self.chain = Chain::from_info(&info);
                tracing::info!("Arm layout updated: {} bones", self.chain.len());
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Bad arm layout: {}", e);
                return;
            }
        }
        self.view.update_position(&self.chain);
        self.view.draw(&self.chain);
    }

    // Periodic ticks

    /// Retransmit pending commands. An animation whose awaited keyframe
    /// command expired is abandoned so pointer control comes back.
    pub fn retry_tick(&mut self) -> RetryReport {
        let report = self.channel.retry_tick();
        let stalled = self
            .animation
            .as_ref()
            .and_then(AnimationPlayer::awaiting_ack)
            .is_some_and(|id| report.expired.contains(&id));
        if stalled {
            if let Some(mut player) = self.animation.take() {
                player.abort();
            }
            self.view.draw(&self.chain);
        }
        report
    }

    /// Per-frame tick: advance playback and push the position every few frames.
    pub fn frame_tick(&mut self, dt: Duration) {
        if let Some(player) = self.animation.as_mut() {
            let mut sink = ChannelMotion {
                channel: &mut self.channel,
                widget_uuid: self.widget_uuid,
                budget: self.budget,
            };
            player.tick(dt, &mut self.chain, &self.solver, &mut sink);
            if player.is_done() {
                self.animation = None;
            }
            self.view.draw(&self.chain);
        }

        self.divider += 1;
        if self.divider < self.frame_divider {
            return;
        }
        self.divider = 0;

        if self.channel.is_connected() && self.animation.is_none() && !self.chain.is_empty() {
            let end = self.chain.end_effector();
            let payload =
                protocol::grid_event(self.widget_uuid, "pos", protocol::position_state(end.x, end.y));
            self.channel.send_unreliable(commands::GRID_EVENT, payload);
        }
    }

    // Operator input

    /// Start dragging. Ignored while an animation plays.
    pub fn pointer_down(&mut self, target: Point) -> Option<SolveOutcome> {
        if self.animation.is_some() {
            return None;
        }
        self.pointer = target;
        let outcome = self.run();
        self.touched = true;
        Some(outcome)
    }

    pub fn pointer_move(&mut self, target: Point) -> Option<SolveOutcome> {
        self.pointer = target;
        if !self.touched {
            return None;
        }
        Some(self.run())
    }

    pub fn pointer_up(&mut self, target: Point) -> SolveOutcome {
        self.pointer = target;
        self.touched = false;
        self.run()
    }

    /// Returns whether the press had an effect.
    pub fn press(&mut self, button: ArmButton) -> bool {
        match button {
            ArmButton::Retract => self.play(AnimationPreset::Retract),
            ArmButton::Extend => self.play(AnimationPreset::Extend),
            ArmButton::Grab => {
                let payload = protocol::grid_event(self.widget_uuid, "grab", Message::new());
                self.channel
                    .send_reliable(commands::GRID_EVENT, payload, self.budget, None);
                true
            }
        }
    }

    fn play(&mut self, preset: AnimationPreset) -> bool {
        if self.animation.is_some() {
            return false;
        }
        tracing::info!("Starting {:?} animation", preset);
        let mut player = AnimationPlayer::from_preset(preset);
        let mut sink = ChannelMotion {
            channel: &mut self.channel,
            widget_uuid: self.widget_uuid,
            budget: self.budget,
        };
        player.start(&mut self.chain, &self.solver, &mut sink);
        if !player.is_done() {
            self.animation = Some(player);
        }
        self.view.draw(&self.chain);
        true
    }

    fn run(&mut self) -> SolveOutcome {
        let outcome = self.solver.solve_bounded(&mut self.chain, self.pointer);
        self.view.draw(&self.chain);
        outcome
    }

    // Accessors

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn channel(&self) -> &ReliableChannel<S, AckContinuation> {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut ReliableChannel<S, AckContinuation> {
        &mut self.channel
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn is_possessed(&self) -> bool {
        self.possessed
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    pub fn is_touched(&self) -> bool {
        self.touched
    }

    pub fn animation(&self) -> Option<&AnimationPlayer> {
        self.animation.as_ref()
    }
}
