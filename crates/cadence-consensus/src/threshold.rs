//! Quorum threshold for block votes.
//!
//! A hash wins a height when it holds strictly more than 3/4 of the
//! voting-verifier set:
//! - 4 voters → more than 3 required (all 4)
//! - 5 voters → more than 3 required (4 of 5 wins, 3 of 5 does not)
//! - 8 voters → more than 6 required

/// Vote count a hash must exceed to win, for a voting set of `voters`.
///
/// Formula: floor(n × 3/4)
///
/// # Examples
///
/// ```
/// use cadence_consensus::quorum_threshold;
///
/// assert_eq!(quorum_threshold(4), 3);
/// assert_eq!(quorum_threshold(5), 3);
/// assert_eq!(quorum_threshold(100), 75);
/// ```
pub const fn quorum_threshold(voters: usize) -> usize {
    voters * 3 / 4
}

/// Whether `votes` clears the quorum for a voting set of `voters`.
pub const fn meets_quorum(votes: usize, voters: usize) -> bool {
    votes > quorum_threshold(voters)
}

/// How many more votes are needed to clear the quorum.
pub const fn votes_needed(current: usize, voters: usize) -> usize {
    let required = quorum_threshold(voters) + 1;
    if current >= required {
        0
    } else {
        required - current
    }
}
