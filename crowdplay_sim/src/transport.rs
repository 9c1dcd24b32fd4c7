//! Scripted chat transport with fault injection.

use crate::world::SimError;
use async_trait::async_trait;
use crowdplay_core::BASELINE_TALLY;
use crowdplay_env::{
    Action, Artifact, AuthLevel, BallotId, BallotTransport, CallerId, EnvError, SessionId, Tallies,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// A ballot as the transport saw it.
#[derive(Debug, Clone)]
pub struct PublishedBallot {
    pub session: SessionId,
    pub ballot: BallotId,
    pub artifact: Artifact,
    pub menu: Vec<Action>,
}

/// Seeded crowd: every poll each action gets `Poisson(mean)` extra votes.
struct RandomVoter {
    rng: ChaCha8Rng,
    votes: Poisson<f64>,
}

impl RandomVoter {
    fn tallies(&mut self, menu: &[Action]) -> Tallies {
        menu.iter()
            .map(|a| (*a, BASELINE_TALLY + self.votes.sample(&mut self.rng) as u32))
            .collect()
    }
}

#[derive(Default)]
struct TransportState {
    published: Vec<PublishedBallot>,
    open: HashMap<BallotId, SessionId>,
    retracted: Vec<BallotId>,
    notices: Vec<(SessionId, String)>,
    presence: Vec<usize>,
    polls: HashMap<SessionId, u64>,

    scripts: HashMap<SessionId, VecDeque<Tallies>>,
    voter: Option<RandomVoter>,
    publish_failures: HashMap<SessionId, u32>,
    failed_publishes: u64,
    poll_failures: HashSet<SessionId>,
    retract_failures: HashSet<SessionId>,
    auth: HashMap<CallerId, AuthLevel>,
}

/// In-memory chat service.
///
/// Polls return the next scripted tally for the session, then fall back
/// to the random voter if one is configured, then to baseline-only
/// tallies (nobody voted).
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<TransportState>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a seeded random crowd with `mean` extra votes per action.
    pub fn with_voter(self, seed: u64, mean: f64) -> Result<Self, SimError> {
        let votes = Poisson::new(mean).map_err(|_| SimError::VoteRate(mean))?;
        self.state().voter = Some(RandomVoter {
            rng: ChaCha8Rng::seed_from_u64(seed),
            votes,
        });
        Ok(self)
    }

    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queues tallies for the session's next polls.
    pub fn script<I>(&self, session: SessionId, polls: I)
    where
        I: IntoIterator<Item = Tallies>,
    {
        self.state()
            .scripts
            .entry(session)
            .or_default()
            .extend(polls);
    }

    /// Queues one poll where `action` gets `votes` and everything else the
    /// baseline.
    pub fn vote(&self, session: SessionId, action: Action, votes: u32) {
        let tallies = Action::MENU
            .iter()
            .map(|a| (*a, if *a == action { votes } else { BASELINE_TALLY }))
            .collect();
        self.script(session, [tallies]);
    }

    /// The next `count` publishes for `session` fail.
    pub fn fail_publishes(&self, session: SessionId, count: u32) {
        self.state().publish_failures.insert(session, count);
    }

    /// Every poll for `session` fails from now on.
    pub fn fail_polls(&self, session: SessionId) {
        self.state().poll_failures.insert(session);
    }

    /// Every retract for `session` fails from now on.
    pub fn fail_retracts(&self, session: SessionId) {
        self.state().retract_failures.insert(session);
    }

    pub fn grant(&self, caller: CallerId, level: AuthLevel) {
        self.state().auth.insert(caller, level);
    }

    pub fn published(&self) -> Vec<PublishedBallot> {
        self.state().published.clone()
    }

    pub fn ballots_for(&self, session: SessionId) -> Vec<PublishedBallot> {
        self.state()
            .published
            .iter()
            .filter(|b| b.session == session)
            .cloned()
            .collect()
    }

    pub fn ballot_count(&self, session: SessionId) -> usize {
        self.state()
            .published
            .iter()
            .filter(|b| b.session == session)
            .count()
    }

    pub fn open_ballots(&self) -> usize {
        self.state().open.len()
    }

    pub fn retracted(&self) -> Vec<BallotId> {
        self.state().retracted.clone()
    }

    pub fn failed_publishes(&self) -> u64 {
        self.state().failed_publishes
    }

    pub fn polls(&self, session: SessionId) -> u64 {
        self.state().polls.get(&session).copied().unwrap_or(0)
    }

    pub fn total_polls(&self) -> u64 {
        self.state().polls.values().sum()
    }

    pub fn notices_for(&self, session: SessionId) -> Vec<String> {
        self.state()
            .notices
            .iter()
            .filter(|(s, _)| *s == session)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn notice_count(&self) -> usize {
        self.state().notices.len()
    }

    pub fn presence(&self) -> Vec<usize> {
        self.state().presence.clone()
    }
}

#[async_trait]
impl BallotTransport for ScriptedTransport {
    async fn publish_ballot(
        &self,
        session: SessionId,
        artifact: &Artifact,
        menu: &[Action],
    ) -> Result<BallotId, EnvError> {
        let mut state = self.state();

        if let Some(remaining) = state.publish_failures.get_mut(&session) {
            if *remaining > 0 {
                *remaining -= 1;
                state.failed_publishes += 1;
                return Err(EnvError::transport("upload rejected"));
            }
        }

        let ballot = BallotId::new();
        state.open.insert(ballot, session);
        state.published.push(PublishedBallot {
            session,
            ballot,
            artifact: artifact.clone(),
            menu: menu.to_vec(),
        });
        Ok(ballot)
    }

    async fn poll_tallies(&self, session: SessionId, ballot: BallotId) -> Result<Tallies, EnvError> {
        let mut state = self.state();
        *state.polls.entry(session).or_default() += 1;

        if state.poll_failures.contains(&session) {
            return Err(EnvError::transport("message fetch failed"));
        }
        if state.open.get(&ballot) != Some(&session) {
            return Err(EnvError::ballot_not_found(ballot.to_string()));
        }

        if let Some(tallies) = state.scripts.get_mut(&session).and_then(|q| q.pop_front()) {
            return Ok(tallies);
        }
        if let Some(voter) = state.voter.as_mut() {
            return Ok(voter.tallies(&Action::MENU));
        }
        Ok(Action::MENU.iter().map(|a| (*a, BASELINE_TALLY)).collect())
    }

    async fn retract_ballot(&self, session: SessionId, ballot: BallotId) -> Result<(), EnvError> {
        let mut state = self.state();
        if state.retract_failures.contains(&session) {
            return Err(EnvError::transport("delete failed"));
        }
        state
            .open
            .remove(&ballot)
            .ok_or_else(|| EnvError::ballot_not_found(ballot.to_string()))?;
        state.retracted.push(ballot);
        Ok(())
    }

    async fn notify(&self, session: SessionId, text: &str) -> Result<(), EnvError> {
        self.state().notices.push((session, text.to_string()));
        Ok(())
    }

    async fn authorization_level(
        &self,
        _session: SessionId,
        caller: CallerId,
    ) -> Result<AuthLevel, EnvError> {
        Ok(self.state().auth.get(&caller).copied().unwrap_or(AuthLevel::None))
    }

    async fn update_presence(&self, active_sessions: usize) -> Result<(), EnvError> {
        self.state().presence.push(active_sessions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdplay_core::tally_winner;
    use crowdplay_env::Frame;

    fn artifact() -> Artifact {
        Artifact {
            frames: vec![Frame::new(1, 1, vec![0]); 2],
            frame_duration_ms: 500,
        }
    }

    #[tokio::test]
    async fn test_unscripted_poll_is_baseline() {
        let transport = ScriptedTransport::new();
        let s = SessionId(1);
        let ballot = transport.publish_ballot(s, &artifact(), &Action::MENU).await.unwrap();

        let tallies = transport.poll_tallies(s, ballot).await.unwrap();
        assert_eq!(tally_winner(&Action::MENU, &tallies), None);
        assert_eq!(transport.polls(s), 1);
    }

    #[tokio::test]
    async fn test_scripted_votes_then_baseline() {
        let transport = ScriptedTransport::new();
        let s = SessionId(1);
        transport.vote(s, Action::Start, 4);
        let ballot = transport.publish_ballot(s, &artifact(), &Action::MENU).await.unwrap();

        let first = transport.poll_tallies(s, ballot).await.unwrap();
        assert_eq!(tally_winner(&Action::MENU, &first), Some(Action::Start));
        let second = transport.poll_tallies(s, ballot).await.unwrap();
        assert_eq!(tally_winner(&Action::MENU, &second), None);
    }

    #[tokio::test]
    async fn test_publish_faults_are_consumed() {
        let transport = ScriptedTransport::new();
        let s = SessionId(3);
        transport.fail_publishes(s, 2);

        assert!(transport.publish_ballot(s, &artifact(), &Action::MENU).await.is_err());
        assert!(transport.publish_ballot(s, &artifact(), &Action::MENU).await.is_err());
        assert!(transport.publish_ballot(s, &artifact(), &Action::MENU).await.is_ok());
        assert_eq!(transport.failed_publishes(), 2);
        assert_eq!(transport.ballot_count(s), 1);
    }

    #[tokio::test]
    async fn test_retracted_ballot_cannot_be_polled() {
        let transport = ScriptedTransport::new();
        let s = SessionId(1);
        let ballot = transport.publish_ballot(s, &artifact(), &Action::MENU).await.unwrap();
        transport.retract_ballot(s, ballot).await.unwrap();

        assert!(matches!(
            transport.poll_tallies(s, ballot).await,
            Err(EnvError::BallotNotFound(_))
        ));
        assert_eq!(transport.open_ballots(), 0);
    }

    #[tokio::test]
    async fn test_random_voter_is_seeded() {
        async fn run(seed: u64) -> Vec<Option<Action>> {
            let transport = ScriptedTransport::new().with_voter(seed, 0.5).unwrap();
            let s = SessionId(1);
            let ballot = transport.publish_ballot(s, &artifact(), &Action::MENU).await.unwrap();
            let mut winners = Vec::new();
            for _ in 0..20 {
                let t = transport.poll_tallies(s, ballot).await.unwrap();
                winners.push(tally_winner(&Action::MENU, &t));
            }
            winners
        }

        assert_eq!(run(7).await, run(7).await);
    }

    #[test]
    fn test_invalid_vote_rate_is_a_setup_error() {
        assert!(matches!(
            ScriptedTransport::new().with_voter(1, -1.0),
            Err(SimError::VoteRate(rate)) if rate == -1.0
        ));
    }

    #[tokio::test]
    async fn test_unknown_callers_have_no_rights() {
        let transport = ScriptedTransport::new();
        transport.grant(CallerId(1), AuthLevel::Admin);
        let s = SessionId(1);
        assert_eq!(
            transport.authorization_level(s, CallerId(1)).await.unwrap(),
            AuthLevel::Admin
        );
        assert_eq!(
            transport.authorization_level(s, CallerId(2)).await.unwrap(),
            AuthLevel::None
        );
    }
}
