// Copyright (c) 2024 The dep2p Authors

//! Voting sessions over disconnect reports.
//!
//! A session counts agree/disagree/abstain votes, one per witness, and
//! decides whether the target should be removed. Abstentions never count
//! toward the quorum. The decision is a pure function of the vote multiset,
//! so arrival order cannot change the outcome.

use crate::messages::{ConfirmationType, ReportId};
use dep2p_common::NodeId;
use std::{
    collections::HashSet,
    time::Instant,
};

/// Realms below this size use the fast decision rules.
pub const SMALL_REALM_THRESHOLD: usize = 10;

/// Where a session stands after a vote.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VoteOutcome {
    /// Quorum not yet reached; keep collecting.
    Pending,
    /// Decision reached.
    Completed {
        /// Whether the disconnect was confirmed.
        confirmed: bool,
    },
}

/// Vote state for one report.
#[derive(Debug)]
pub struct VotingSession {
    /// The report being decided.
    pub report_id: ReportId,
    /// The allegedly disconnected member.
    pub target_id: NodeId,
    /// Realm size when the session was created.
    pub member_count: usize,
    /// Agreeing witnesses.
    pub agree_count: usize,
    /// Disagreeing witnesses.
    pub disagree_count: usize,
    /// Abstaining witnesses.
    pub abstain_count: usize,
    voted: HashSet<NodeId>,
    completed: bool,
    /// Session creation time, for stale-session cleanup.
    pub created_at: Instant,
}

impl VotingSession {
    /// Open a session for a report.
    pub fn new(report_id: ReportId, target_id: NodeId, member_count: usize) -> Self {
        Self {
            report_id,
            target_id,
            member_count,
            agree_count: 0,
            disagree_count: 0,
            abstain_count: 0,
            voted: HashSet::new(),
            completed: false,
            created_at: Instant::now(),
        }
    }

    /// Whether the session has decided.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Witnesses that have voted.
    pub fn voted_count(&self) -> usize {
        self.voted.len()
    }

    /// Agree plus disagree; abstentions do not count.
    pub fn effective_votes(&self) -> usize {
        self.agree_count + self.disagree_count
    }

    /// Record a vote. Returns `false` when the witness already voted, the
    /// session has decided, or the vote count already covers the realm.
    pub fn add_vote(&mut self, witness: NodeId, vote: ConfirmationType) -> bool {
        if self.completed || self.voted.len() >= self.member_count {
            return false;
        }
        if !self.voted.insert(witness) {
            return false;
        }
        match vote {
            ConfirmationType::Agree => self.agree_count += 1,
            ConfirmationType::Disagree => self.disagree_count += 1,
            ConfirmationType::Abstain => self.abstain_count += 1,
        }
        true
    }

    fn quorum(&self) -> usize {
        core::cmp::max(1, self.member_count / 2)
    }

    /// Check whether the votes collected so far decide the session.
    ///
    /// Small realms finalize on the first agree with no dissent; once any
    /// disagree arrives they wait for the quorum like everyone else. At
    /// quorum, a strict agree majority confirms.
    pub fn evaluate(&mut self) -> VoteOutcome {
        if self.completed {
            return VoteOutcome::Completed {
                confirmed: self.agree_count > self.disagree_count,
            };
        }

        if self.member_count < SMALL_REALM_THRESHOLD
            && self.disagree_count == 0
            && self.agree_count >= 1
        {
            return self.complete();
        }

        if self.effective_votes() >= self.quorum() {
            return self.complete();
        }
        VoteOutcome::Pending
    }

    /// Decide with whatever votes are present. Used on timer fire; no votes
    /// at all means not confirmed (quorum never reached).
    pub fn finalize(&mut self) -> bool {
        match self.complete() {
            VoteOutcome::Completed { confirmed } => confirmed,
            VoteOutcome::Pending => false,
        }
    }

    fn complete(&mut self) -> VoteOutcome {
        self.completed = true;
        VoteOutcome::Completed {
            confirmed: self.agree_count > self.disagree_count,
        }
    }
}
