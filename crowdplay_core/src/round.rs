//! One round of emulation: simulate, capture, and build the artifact.

use crate::config::RoundConfig;
use crate::session::ActionPair;
use crowdplay_env::{Artifact, Emulator, EnvError, Frame};

/// Shape of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPlan {
    /// Steps to advance (`S`)
    pub ticks: u32,

    /// Steps after which the release input is sent (`M`, clamped to `S`)
    pub midpoint: u32,

    /// Frame capture cadence (`K`)
    pub capture_every: u32,
}

impl RoundPlan {
    pub fn new(ticks: u32, config: &RoundConfig) -> Self {
        Self {
            ticks,
            midpoint: config.midpoint_ticks.min(ticks),
            capture_every: config.capture_every.max(1),
        }
    }

    /// Number of frames a round yields: one per cadence step plus the
    /// trailing frame.
    pub fn frame_count(&self) -> usize {
        let k = self.capture_every.max(1);
        (self.ticks.div_ceil(k) + 1) as usize
    }
}

/// Output of a completed round.
#[derive(Debug, Clone)]
pub struct RoundCapture {
    /// Frames in simulation order; never empty
    pub frames: Vec<Frame>,

    /// Full engine state after the last step
    pub state: Vec<u8>,
}

/// Runs one round on `engine`.
///
/// Sends `pending.pre`, advances `plan.ticks` steps, sends `pending.post`
/// once `plan.midpoint` steps have run, captures a frame after every step
/// whose 0-based index is a multiple of the cadence, and always captures a
/// trailing frame after the last step. Any engine failure aborts the round;
/// the engine state is then not known-good and must not be checkpointed.
pub fn simulate_round(
    engine: &mut dyn Emulator,
    pending: ActionPair,
    plan: &RoundPlan,
) -> Result<RoundCapture, EnvError> {
    let mut frames = Vec::with_capacity(plan.frame_count());

    if let Some(event) = pending.pre {
        engine.send_input(event)?;
    }

    for step in 0..plan.ticks {
        if step == plan.midpoint {
            if let Some(event) = pending.post {
                engine.send_input(event)?;
            }
        }

        engine.advance()?;

        if step % plan.capture_every == 0 {
            frames.push(engine.capture_frame()?);
        }
    }

    // Midpoint clamped onto the end of the round
    if plan.midpoint >= plan.ticks {
        if let Some(event) = pending.post {
            engine.send_input(event)?;
        }
    }

    frames.push(engine.capture_frame()?);
    let state = engine.serialize_state()?;

    Ok(RoundCapture { frames, state })
}

/// Builds the published artifact from a round's frames.
///
/// The last frame is duplicated at position 0 so the static preview shows
/// the newest state; playback then runs through every frame in order. Each
/// frame plays for `round_duration_ms / artifact_frame_count`.
pub fn assemble_artifact(frames: Vec<Frame>, round_duration_ms: u32) -> Artifact {
    let mut ordered = Vec::with_capacity(frames.len() + 1);
    if let Some(last) = frames.last() {
        ordered.push(last.clone());
    }
    ordered.extend(frames);

    let frame_duration_ms = match ordered.len() as u32 {
        0 => round_duration_ms,
        n => round_duration_ms / n,
    };

    Artifact {
        frames: ordered,
        frame_duration_ms,
    }
}
