//! JSON exporter for scenario runs.
//!
//! Captures every ballot and notice the scripted transport saw, per
//! session, together with the run's verdict and metrics.

use crate::engine::frame_tick;
use crate::runner::{ScenarioMetrics, ScenarioResult};
use crate::world::SimWorld;
use crowdplay_env::SessionId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

/// One published ballot.
#[derive(Debug, Clone, Serialize)]
pub struct BallotRecord {
    pub ballot: String,

    /// Frames in the artifact, preview included
    pub frames: usize,

    pub frame_duration_ms: u32,

    /// Engine tick shown in the preview frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_tick: Option<u64>,
}

/// Everything one session produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionRecord {
    pub session: u64,
    pub ballots: Vec<BallotRecord>,
    pub notices: Vec<String>,
}

/// Complete run export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Virtual time at the end of the run
    pub duration_sec: f64,

    /// Per-session records in identity order
    pub sessions: Vec<SessionRecord>,

    /// Active-session counts as announced through presence updates
    pub presence: Vec<usize>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            sessions: Vec::new(),
            presence: Vec::new(),
            passed: false,
            failure_reason: None,
            metrics: ScenarioMetrics::default(),
        }
    }

    /// Records what the world's transport saw.
    pub fn capture(&mut self, world: &SimWorld) {
        let mut sessions: BTreeMap<SessionId, SessionRecord> = BTreeMap::new();

        for published in world.transport.published() {
            let record = sessions.entry(published.session).or_default();
            record.ballots.push(BallotRecord {
                ballot: published.ballot.to_string(),
                frames: published.artifact.len(),
                frame_duration_ms: published.artifact.frame_duration_ms,
                preview_tick: published.artifact.preview().and_then(frame_tick),
            });
        }

        for (id, record) in sessions.iter_mut() {
            record.session = id.0;
            record.notices = world.transport.notices_for(*id);
        }

        self.sessions = sessions.into_values().collect();
        self.presence = world.transport.presence();
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, result: &ScenarioResult) {
        self.passed = result.passed;
        self.failure_reason = result.failure_reason.clone();
        self.duration_sec = result.final_time_secs;
        self.metrics = result.metrics.clone();
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
