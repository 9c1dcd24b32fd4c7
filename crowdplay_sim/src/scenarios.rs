//! Session lifecycle scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// CP-001: Sessions play voted rounds, then stop cleanly
    VoteCycle,

    /// CP-002: Equal tallies resolve to the first declared action
    TieBreak,

    /// CP-003: A silent crowd ends the session after the idle threshold
    IdleExpiry,

    /// CP-004: One engine faults, its neighbours keep playing
    CrashIsolation,

    /// CP-005: Stop, then load resumes from the flushed checkpoint
    StopResume,

    /// CP-006: Force-stop releases the engine without a flush
    ForceStop,

    /// CP-007: Publishing survives transient failures, crashes on exhaustion
    PublishRetry,

    /// CP-008: Many sessions under a random crowd
    VoteStorm,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::VoteCycle,
            ScenarioId::TieBreak,
            ScenarioId::IdleExpiry,
            ScenarioId::CrashIsolation,
            ScenarioId::StopResume,
            ScenarioId::ForceStop,
            ScenarioId::PublishRetry,
            ScenarioId::VoteStorm,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::VoteCycle => "vote_cycle",
            ScenarioId::TieBreak => "tie_break",
            ScenarioId::IdleExpiry => "idle_expiry",
            ScenarioId::CrashIsolation => "crash_isolation",
            ScenarioId::StopResume => "stop_resume",
            ScenarioId::ForceStop => "force_stop",
            ScenarioId::PublishRetry => "publish_retry",
            ScenarioId::VoteStorm => "vote_storm",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::VoteCycle => "voted rounds, checkpoint after every round, clean stop",
            ScenarioId::TieBreak => "{no-op:1, up:3, down:3} must apply up",
            ScenarioId::IdleExpiry => "no votes for the idle threshold, session saves and exits",
            ScenarioId::CrashIsolation => "engine fault in one session, others unaffected",
            ScenarioId::StopResume => "stop flushes, load continues from the same state",
            ScenarioId::ForceStop => "immediate exit, engine released, no terminal flush",
            ScenarioId::PublishRetry => "transient publish failures retried, exhaustion crashes",
            ScenarioId::VoteStorm => "many sessions, seeded Poisson crowd, clean shutdown",
        }
    }

    /// Returns true if the scenario runs several sessions at once.
    pub fn is_multi_session(&self) -> bool {
        matches!(
            self,
            ScenarioId::VoteCycle | ScenarioId::CrashIsolation | ScenarioId::VoteStorm
        )
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vote_cycle" | "votecycle" | "cp-001" => Ok(ScenarioId::VoteCycle),
            "tie_break" | "tiebreak" | "cp-002" => Ok(ScenarioId::TieBreak),
            "idle_expiry" | "idle" | "cp-003" => Ok(ScenarioId::IdleExpiry),
            "crash_isolation" | "crash" | "cp-004" => Ok(ScenarioId::CrashIsolation),
            "stop_resume" | "resume" | "cp-005" => Ok(ScenarioId::StopResume),
            "force_stop" | "forcestop" | "cp-006" => Ok(ScenarioId::ForceStop),
            "publish_retry" | "retry" | "cp-007" => Ok(ScenarioId::PublishRetry),
            "vote_storm" | "storm" | "cp-008" => Ok(ScenarioId::VoteStorm),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("CP-003".parse::<ScenarioId>(), Ok(ScenarioId::IdleExpiry));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
