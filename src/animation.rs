//! Keyframe playback paced by hardware acknowledgment.
//!
//! Each keyframe's target is solved and emitted as a command. The player then
//! waits for that command's acknowledgment before letting time accrue, so the
//! arm is never sent targets faster than it confirms them.

use std::time::Duration;

use crate::chain::{Chain, Point};
use crate::solver::IkSolver;

/// A timed waypoint.
#[derive(Clone, Debug, PartialEq)]
pub struct Keyframe {
    pub target: Point,
    pub duration: Duration,
    pub elapsed: Duration,
}

impl Keyframe {
    pub fn new(x: f64, y: f64, duration_ms: u64) -> Self {
        Self {
            target: Point::new(x, y),
            duration: Duration::from_millis(duration_ms),
            elapsed: Duration::ZERO,
        }
    }
}

/// Player lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing { keyframe_index: usize },
    Done,
}

/// Where the player sends keyframe targets.
pub trait MotionSink {
    /// Emit a position command for `target` and return its command id.
    fn emit_target(&mut self, target: Point) -> u64;
}

/// Built-in motion sequences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimationPreset {
    Retract,
    Extend,
}

impl AnimationPreset {
    pub fn keyframes(self) -> Vec<Keyframe> {
        match self {
            AnimationPreset::Retract => vec![
                Keyframe::new(145.0, -35.0, 600),
                Keyframe::new(35.0, 19.0, 300),
            ],
            AnimationPreset::Extend => vec![
                Keyframe::new(145.0, -35.0, 500),
                Keyframe::new(200.0, 18.0, 200),
                Keyframe::new(140.0, 79.0, 300),
            ],
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnimationPlayer {
    keyframes: Vec<Keyframe>,
    state: PlayerState,
    /// Id of the emitted command still waiting for its ack.
    awaiting: Option<u64>,
}

impl AnimationPlayer {
    pub fn new(keyframes: Vec<Keyframe>) -> Self {
        Self {
            keyframes,
            state: PlayerState::Idle,
            awaiting: None,
        }
    }

    pub fn from_preset(preset: AnimationPreset) -> Self {
        Self::new(preset.keyframes())
    }

    pub fn add_frame(&mut self, x: f64, y: f64, duration_ms: u64) {
        self.keyframes.push(Keyframe::new(x, y, duration_ms));
    }

    /// Begin playback with the first keyframe. No-op unless idle.
    pub fn start<M: MotionSink>(&mut self, chain: &mut Chain, solver: &IkSolver, sink: &mut M) {
        if self.state != PlayerState::Idle {
            return;
        }
        self.enter(0, chain, solver, sink);
    }

    /// Advance playback by `dt`.
    ///
    /// Time spent waiting for an ack is discarded, not banked.
    pub fn tick<M: MotionSink>(
        &mut self,
        dt: Duration,
        chain: &mut Chain,
        solver: &IkSolver,
        sink: &mut M,
    ) -> PlayerState {
        let PlayerState::Playing { keyframe_index } = self.state else {
            return self.state;
        };
        if self.awaiting.is_some() {
            return self.state;
        }

        let frame = &mut self.keyframes[keyframe_index];
        frame.elapsed += dt;
        if frame.elapsed >= frame.duration {
            self.enter(keyframe_index + 1, chain, solver, sink);
        }
        self.state
    }

    /// Record an acknowledgment. Returns whether it matched the awaited command.
    pub fn acknowledge(&mut self, id: u64) -> bool {
        if self.awaiting == Some(id) {
            self.awaiting = None;
            true
        } else {
            false
        }
    }

    /// Stop playback early, for instance when the awaited command will never
    /// be acknowledged.
    pub fn abort(&mut self) {
        if self.state == PlayerState::Done {
            return;
        }
        if let PlayerState::Playing { keyframe_index } = self.state {
            tracing::warn!(
                "Animation aborted at keyframe {} of {}",
                keyframe_index,
                self.keyframes.len()
            );
        }
        self.state = PlayerState::Done;
        self.awaiting = None;
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlayerState::Playing { .. })
    }

    pub fn is_done(&self) -> bool {
        self.state == PlayerState::Done
    }

    pub fn awaiting_ack(&self) -> Option<u64> {
        self.awaiting
    }

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    fn enter<M: MotionSink>(
        &mut self,
        index: usize,
        chain: &mut Chain,
        solver: &IkSolver,
        sink: &mut M,
    ) {
        let Some(frame) = self.keyframes.get(index) else {
            self.state = PlayerState::Done;
            self.awaiting = None;
            tracing::info!("Animation finished after {} keyframes", self.keyframes.len());
            return;
        };

        let target = frame.target;
        let outcome = solver.solve_bounded(chain, target);
        tracing::debug!(
            "Keyframe {} -> ({:.1}, {:.1}): {:?}",
            index,
            target.x,
            target.y,
            outcome.status
        );

        self.state = PlayerState::Playing {
            keyframe_index: index,
        };
        self.awaiting = Some(sink.emit_target(target));
    }
}
