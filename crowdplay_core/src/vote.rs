//! Vote aggregation.

use crowdplay_env::{Action, Tallies};

/// Every menu entry starts at this count: the ballot's own default marker.
pub const BASELINE_TALLY: u32 = 1;

/// Picks the winning action of a ballot, if anyone voted.
///
/// Walks `menu` in declaration order and keeps the first action whose
/// tally is strictly greater than the best seen so far, starting from the
/// baseline. Later equal tallies never displace an earlier one, so menu
/// order is the tie-break key. Actions missing from `tallies` count as the
/// baseline; tallies for actions outside `menu` are ignored.
pub fn tally_winner(menu: &[Action], tallies: &Tallies) -> Option<Action> {
    let mut best: Option<Action> = None;
    let mut best_count = BASELINE_TALLY;

    for action in menu {
        let count = tallies.get(action).copied().unwrap_or(BASELINE_TALLY);
        if count > best_count {
            best = Some(*action);
            best_count = count;
        }
    }

    best
}
