//! Chain scoring for fork choice.
//!
//! A candidate is scored relative to a reference height by walking back to
//! it. The reference block scores zero and each block above it adjusts the
//! score:
//!
//! - the top pending new verifier subtracts 2; any other new verifier adds 10,000
//! - an existing verifier adds 4 × (previous cycle length − this cycle length)
//! - an existing verifier flagged for removal adds 5 when nothing else applied
//! - every balance-list spam transaction adds 5
//!
//! Lower is better. Missing data makes the score [`ChainScore::Indeterminate`];
//! a protocol violation makes it [`ChainScore::Invalid`].

use std::time::{SystemTime, UNIX_EPOCH};

use cadence_chain::{
    hash_long, Block, ContinuityState, Identifier, MAXIMUM_BLOCKCHAIN_VERSION,
    MINIMUM_VERIFICATION_INTERVAL_MS,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::chain::{BlockRef, ChainView};
use crate::collaborators::Collaborators;
use crate::continuity::continuity_state;
use crate::cycle::cycle_information;

/// How far ahead of the local clock a verification timestamp may be.
pub const MAXIMUM_FUTURE_DRIFT_MS: u64 = 5_000;

/// Scores below this earn a vote; the wait grows with the score.
const VOTABLE_SCORE_LIMIT: i64 = 100_000;

/// A fork-choice score.
///
/// The derived order is the comparison order: any definite score beats
/// `Indeterminate`, which beats `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ChainScore {
    Definite(i64),
    /// Not enough chain information; may improve later.
    Indeterminate,
    /// Provably invalid.
    Invalid,
}

impl ChainScore {
    /// The score as a single integer, with `i64::MAX - 1` for indeterminate
    /// and `i64::MAX` for invalid.
    pub fn as_sentinel(self) -> i64 {
        match self {
            ChainScore::Definite(score) => score.min(i64::MAX - 2),
            ChainScore::Indeterminate => i64::MAX - 1,
            ChainScore::Invalid => i64::MAX,
        }
    }

    pub fn from_sentinel(value: i64) -> Self {
        match value {
            i64::MAX => ChainScore::Invalid,
            v if v == i64::MAX - 1 => ChainScore::Indeterminate,
            v => ChainScore::Definite(v),
        }
    }

    pub fn definite(self) -> Option<i64> {
        match self {
            ChainScore::Definite(score) => Some(score),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChainScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainScore::Definite(score) => write!(f, "{}", score),
            ChainScore::Indeterminate => write!(f, "indeterminate"),
            ChainScore::Invalid => write!(f, "invalid"),
        }
    }
}

/// Deterministic offset for a new verifier in the Genesis cycle, in
/// `[-9999, -1000]`. Any fixed order will do there, as long as every node
/// computes the same one.
pub fn genesis_cycle_offset(identifier: &Identifier) -> i64 {
    -((hash_long(identifier.as_bytes()).unsigned_abs() % 9_000) as i64) - 1_000
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Scores candidate blocks from one verifier's point of view.
pub struct ChainScorer {
    view: ChainView,
    collaborators: Collaborators,
    local_identifier: Identifier,
    now_millis: u64,
}

impl ChainScorer {
    /// A scorer using the current wall-clock time for the future-drift check.
    pub fn new(
        view: ChainView,
        collaborators: Collaborators,
        local_identifier: Identifier,
    ) -> Self {
        Self {
            view,
            collaborators,
            local_identifier,
            now_millis: now_millis(),
        }
    }

    /// Use `now_millis` as the current time.
    pub fn with_now(mut self, now_millis: u64) -> Self {
        self.now_millis = now_millis;
        self
    }

    /// Score `block` relative to `reference_height`.
    pub fn score(&self, block: &Block, reference_height: u64) -> ChainScore {
        let membership = &self.collaborators.membership;
        let policy = &self.collaborators.policy;
        let top_new_verifier = policy.top_pending_new_verifier();

        let mut score: i64 = 0;
        let mut verdict: Option<ChainScore> = None;
        let mut current = Some(BlockRef::Borrowed(block));

        loop {
            let Some(b) = current else {
                // Ran off the known chain.
                return verdict
                    .max(Some(ChainScore::Indeterminate))
                    .unwrap_or(ChainScore::Indeterminate);
            };
            if b.height() <= reference_height || verdict.is_some() {
                break;
            }

            let previous = self.view.previous_block(&b);
            let identifier = b.verifier_identifier();
            let info = cycle_information(&self.view, &b);
            let continuity = continuity_state(&self.view, &b);

            let mut step: Option<ChainScore> = None;

            if *identifier == self.local_identifier
                && !membership.is_verifier_in_cycle(&self.local_identifier)
                && top_new_verifier == Some(self.local_identifier)
            {
                // Our own candidate while out of cycle. May be wrong if another
                // verifier joined recently; we have no voting power yet.
                score = -2;
            } else if info.is_none() || continuity == ContinuityState::Undetermined {
                step = Some(ChainScore::Indeterminate);
            } else if continuity == ContinuityState::Discontinuous {
                step = Some(ChainScore::Invalid);
            } else if let Some(info) = info.filter(|i| i.new_verifier) {
                if info.in_genesis_cycle {
                    score = genesis_cycle_offset(identifier);
                } else {
                    let adjustment = if top_new_verifier == Some(*identifier) {
                        -2
                    } else {
                        10_000
                    };
                    score = score.saturating_add(adjustment);
                    score = score.saturating_add(self.spam_penalty(&b));
                }
            } else if let Some(info) = info {
                let previous_info = previous
                    .as_ref()
                    .and_then(|p| cycle_information(&self.view, p).map(|pi| (p, pi)));
                match previous_info {
                    None => step = Some(ChainScore::Indeterminate),
                    Some((previous, previous_info)) => {
                        let delta = previous_info.current_cycle_length() as i64
                            - info.current_cycle_length() as i64;
                        score = score.saturating_add(delta.saturating_mul(4));

                        if score == 0 && policy.should_penalize_verifier_for_removal(identifier) {
                            score += 5;
                        }

                        score = score.saturating_add(self.spam_penalty(&b));

                        let version = b.blockchain_version();
                        let prior_version = previous.blockchain_version();
                        if version < prior_version
                            || version > prior_version + 1
                            || version > MAXIMUM_BLOCKCHAIN_VERSION
                        {
                            step = Some(ChainScore::Invalid);
                        } else if policy.is_missed_upgrade_opportunity(&b, prior_version) {
                            score = score.saturating_add(1);
                            info!(
                                height = b.height(),
                                score,
                                verifier = %identifier,
                                "applying missed-upgrade penalty"
                            );
                        } else if policy.is_improperly_timed_upgrade(&b, prior_version) {
                            score = score.saturating_add(10_000);
                        }
                    }
                }
            }

            if let Some(p) = &previous {
                if p.verification_timestamp().saturating_add(MINIMUM_VERIFICATION_INTERVAL_MS)
                    > b.verification_timestamp()
                {
                    debug!(height = b.height(), "verification interval too short");
                    step = Some(ChainScore::Invalid);
                }
            }

            let latest_allowed = self.now_millis.saturating_add(MAXIMUM_FUTURE_DRIFT_MS);
            if b.verification_timestamp() > latest_allowed {
                debug!(height = b.height(), "verification timestamp too far in the future");
                step = Some(ChainScore::Invalid);
            }

            verdict = verdict.max(step);
            current = previous.map(BlockRef::Shared);
        }

        verdict.unwrap_or(ChainScore::Definite(score))
    }

    fn spam_penalty(&self, block: &Block) -> i64 {
        (self.collaborators.spam.spam_transaction_count(block) as i64).saturating_mul(5)
    }

    /// Earliest time this verifier should vote for `block`, given when the
    /// last block froze.
    ///
    /// New verifiers (negative scores) get an immediate vote. Other votable
    /// scores wait 2 s plus 20 s per point. While a new verifier is likely
    /// being admitted, heights 25 and 49 of each 50-block window wait longer
    /// so the new verifier's block has time to arrive.
    pub fn minimum_vote_timestamp(&self, block: &Block, last_freeze_timestamp: u64) -> u64 {
        match self.score(block, self.view.frozen_edge_height()) {
            ChainScore::Definite(score) if score < 0 => last_freeze_timestamp,
            ChainScore::Definite(score) if score < VOTABLE_SCORE_LIMIT => {
                let mut timestamp = last_freeze_timestamp + 2_000 + score as u64 * 20_000;
                if self.collaborators.policy.likely_accepting_new_verifiers() {
                    match block.height() % 50 {
                        25 => {
                            info!(height = block.height(), "10-second wait for new verifier");
                            timestamp += 10_000;
                        }
                        49 => {
                            info!(height = block.height(), "40-second wait for new verifier");
                            timestamp += 40_000;
                        }
                        _ => {}
                    }
                }
                timestamp
            }
            _ => u64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use cadence_chain::identifier_for_seed;

    use crate::collaborators::{FixedSpam, StaticMembership, StaticPolicy};
    use crate::testing::{
        block_after, block_after_with, chain_of, identifiers, view_of, RecordingMessenger, LATE_NOW,
        NEW_VERIFIER_SEED, VERIFIER_SEEDS,
    };

    fn collaborators(policy: StaticPolicy, spam: u32) -> Collaborators {
        Collaborators {
            membership: Arc::new(StaticMembership::new(identifiers(&VERIFIER_SEEDS), Vec::new())),
            policy: Arc::new(policy),
            spam: Arc::new(FixedSpam(spam)),
            messenger: Arc::new(RecordingMessenger::default()),
        }
    }

    fn scorer(view: ChainView, policy: StaticPolicy) -> ChainScorer {
        ChainScorer::new(view, collaborators(policy, 0), Identifier([0xee; 32])).with_now(LATE_NOW)
    }

    #[test]
    fn order_is_definite_then_indeterminate_then_invalid() {
        assert!(ChainScore::Definite(i64::MAX - 2) < ChainScore::Indeterminate);
        assert!(ChainScore::Indeterminate < ChainScore::Invalid);
        assert!(ChainScore::Definite(-5) < ChainScore::Definite(3));
    }

    #[test]
    fn sentinels_roundtrip() {
        for score in [ChainScore::Definite(-2), ChainScore::Indeterminate, ChainScore::Invalid] {
            assert_eq!(ChainScore::from_sentinel(score.as_sentinel()), score);
        }
        assert_eq!(ChainScore::Invalid.as_sentinel(), i64::MAX);
    }

    #[test]
    fn stable_rotation_scores_zero() {
        let blocks = chain_of(&VERIFIER_SEEDS, 16);
        let (view, _) = view_of(&blocks, 0);
        let scorer = scorer(view, StaticPolicy::default());
        assert_eq!(scorer.score(&blocks[15], 14), ChainScore::Definite(0));
        assert_eq!(scorer.score(&blocks[15], 10), ChainScore::Definite(0));
    }

    #[test]
    fn reference_at_or_above_block_scores_zero() {
        let blocks = chain_of(&VERIFIER_SEEDS, 6);
        let (view, _) = view_of(&blocks, 0);
        assert_eq!(
            scorer(view, StaticPolicy::default()).score(&blocks[5], 5),
            ChainScore::Definite(0)
        );
    }

    #[test]
    fn unknown_new_verifier_penalized() {
        let blocks = chain_of(&VERIFIER_SEEDS, 14);
        let (view, _) = view_of(&blocks, 0);
        let joiner = block_after(&blocks[13], &NEW_VERIFIER_SEED);
        let honest = block_after(&blocks[13], &VERIFIER_SEEDS[2]);

        let scorer = scorer(view, StaticPolicy::default());
        assert_eq!(scorer.score(&joiner, 13), ChainScore::Definite(10_000));
        assert_eq!(scorer.score(&honest, 13), ChainScore::Definite(0));
    }

    #[test]
    fn top_new_verifier_preferred() {
        let blocks = chain_of(&VERIFIER_SEEDS, 14);
        let (view, _) = view_of(&blocks, 0);
        let joiner = block_after(&blocks[13], &NEW_VERIFIER_SEED);
        let policy = StaticPolicy {
            top_pending_new_verifier: Some(identifier_for_seed(&NEW_VERIFIER_SEED)),
            ..Default::default()
        };
        assert_eq!(scorer(view, policy).score(&joiner, 13), ChainScore::Definite(-2));
    }

    #[test]
    fn own_out_of_cycle_candidate_forced_preferred() {
        let blocks = chain_of(&VERIFIER_SEEDS, 11);
        let (view, _) = view_of(&blocks, 0);
        // Discontinuous by rule 1, yet scored optimistically for ourselves.
        let own = block_after(&blocks[10], &NEW_VERIFIER_SEED);
        let local = identifier_for_seed(&NEW_VERIFIER_SEED);
        let policy = StaticPolicy {
            top_pending_new_verifier: Some(local),
            ..Default::default()
        };
        let scorer = ChainScorer::new(view, collaborators(policy, 0), local).with_now(LATE_NOW);
        assert_eq!(scorer.score(&own, 10), ChainScore::Definite(-2));
    }

    #[test]
    fn discontinuous_block_is_invalid() {
        let blocks = chain_of(&VERIFIER_SEEDS, 11);
        let (view, _) = view_of(&blocks, 0);
        let joiner = block_after(&blocks[10], &NEW_VERIFIER_SEED);
        assert_eq!(scorer(view, StaticPolicy::default()).score(&joiner, 10), ChainScore::Invalid);
    }

    #[test]
    fn genesis_cycle_new_verifier_gets_hash_offset() {
        let blocks = chain_of(&VERIFIER_SEEDS, 3);
        let (view, _) = view_of(&blocks, 0);
        let score = scorer(view, StaticPolicy::default()).score(&blocks[2], 1);
        let expected = genesis_cycle_offset(blocks[2].verifier_identifier());
        assert_eq!(score, ChainScore::Definite(expected));
        assert!((-9_999..=-1_000).contains(&expected));
    }

    #[test]
    fn spam_and_removal_penalties() {
        let blocks = chain_of(&VERIFIER_SEEDS, 14);
        let (view, _) = view_of(&blocks, 0);
        let honest = block_after(&blocks[13], &VERIFIER_SEEDS[2]);

        let spammy = ChainScorer::new(
            view.clone(),
            collaborators(StaticPolicy::default(), 3),
            Identifier::default(),
        )
        .with_now(LATE_NOW);
        assert_eq!(spammy.score(&honest, 13), ChainScore::Definite(15));

        let policy = StaticPolicy {
            penalized: HashSet::from([identifier_for_seed(&VERIFIER_SEEDS[2])]),
            ..Default::default()
        };
        assert_eq!(scorer(view, policy).score(&honest, 13), ChainScore::Definite(5));
    }

    #[test]
    fn version_transitions() {
        let blocks = chain_of(&VERIFIER_SEEDS, 14);
        let (view, _) = view_of(&blocks, 0);
        let tip = &blocks[13];
        let vts = tip.verification_timestamp() + 7_000;

        let upgrade = block_after_with(tip, &VERIFIER_SEEDS[2], 1, vts);
        assert_eq!(
            scorer(view.clone(), StaticPolicy::default()).score(&upgrade, 13),
            ChainScore::Definite(0)
        );

        let improper = StaticPolicy {
            improperly_timed_upgrade: true,
            ..Default::default()
        };
        assert_eq!(
            scorer(view.clone(), improper).score(&upgrade, 13),
            ChainScore::Definite(10_000)
        );

        let missed = StaticPolicy {
            missed_upgrade: true,
            ..Default::default()
        };
        let stay = block_after_with(tip, &VERIFIER_SEEDS[2], 0, vts);
        assert_eq!(scorer(view.clone(), missed).score(&stay, 13), ChainScore::Definite(1));

        // Downgrade from an upgraded parent.
        let upgraded = Arc::new(upgrade);
        view.unfrozen().insert(upgraded.clone());
        let downgrade = block_after_with(&upgraded, &VERIFIER_SEEDS[3], 0, vts + 7_000);
        assert_eq!(
            scorer(view, StaticPolicy::default()).score(&downgrade, 14),
            ChainScore::Invalid
        );
    }

    #[test]
    fn timing_violations_are_invalid() {
        let blocks = chain_of(&VERIFIER_SEEDS, 14);
        let (view, _) = view_of(&blocks, 0);
        let tip = &blocks[13];

        let hasty =
            block_after_with(tip, &VERIFIER_SEEDS[2], 0, tip.verification_timestamp() + 1_499);
        assert_eq!(
            scorer(view.clone(), StaticPolicy::default()).score(&hasty, 13),
            ChainScore::Invalid
        );

        let on_time =
            block_after_with(tip, &VERIFIER_SEEDS[2], 0, tip.verification_timestamp() + 1_500);
        let future = ChainScorer::new(
            view,
            collaborators(StaticPolicy::default(), 0),
            Identifier::default(),
        )
        .with_now(on_time.verification_timestamp() - 5_001);
        assert_eq!(future.score(&on_time, 13), ChainScore::Invalid);
    }

    #[test]
    fn unknown_ancestry_is_indeterminate() {
        let blocks = chain_of(&VERIFIER_SEEDS, 12);
        let (view, _) = view_of(&blocks[7..], 7);
        assert_eq!(
            scorer(view, StaticPolicy::default()).score(&blocks[11], 2),
            ChainScore::Indeterminate
        );
    }

    #[test]
    fn running_off_chain_is_indeterminate() {
        let blocks = chain_of(&VERIFIER_SEEDS, 16);
        let (view, _) = view_of(&blocks, 0);
        let orphan = block_after(&chain_of(&[[42u8; 32]], 15)[14], &VERIFIER_SEEDS[3]);
        assert_eq!(
            scorer(view, StaticPolicy::default()).score(&orphan, 10),
            ChainScore::Indeterminate
        );
    }

    #[test]
    fn minimum_vote_timestamps() {
        let blocks = chain_of(&VERIFIER_SEEDS, 14);
        let (view, _) = view_of(&blocks, 13);
        let honest = block_after(&blocks[13], &VERIFIER_SEEDS[2]);
        let joiner = block_after(&blocks[13], &NEW_VERIFIER_SEED);

        let plain = scorer(view.clone(), StaticPolicy::default());
        assert_eq!(plain.minimum_vote_timestamp(&honest, 1_000), 3_000);
        assert_eq!(plain.minimum_vote_timestamp(&joiner, 1_000), 3_000 + 10_000 * 20_000);

        let top = StaticPolicy {
            top_pending_new_verifier: Some(identifier_for_seed(&NEW_VERIFIER_SEED)),
            ..Default::default()
        };
        assert_eq!(scorer(view.clone(), top).minimum_vote_timestamp(&joiner, 1_000), 1_000);

        let penalized = StaticPolicy {
            penalized: HashSet::from([identifier_for_seed(&VERIFIER_SEEDS[2])]),
            ..Default::default()
        };
        assert_eq!(
            scorer(view, penalized).minimum_vote_timestamp(&honest, 1_000),
            3_000 + 5 * 20_000
        );
    }

    #[test]
    fn new_verifier_window_delays_votes() {
        // Height 25 is the middle of a 50-block admission window.
        let blocks = chain_of(&VERIFIER_SEEDS, 25);
        let (view, _) = view_of(&blocks, 24);
        let honest = block_after(&blocks[24], &VERIFIER_SEEDS[1]);
        let policy = StaticPolicy {
            likely_accepting_new_verifiers: true,
            ..Default::default()
        };
        assert_eq!(scorer(view, policy).minimum_vote_timestamp(&honest, 0), 12_000);
    }
}
