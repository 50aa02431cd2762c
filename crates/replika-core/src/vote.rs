//! Vote Replicated Data type
//!
//! Every replica holds one boolean vote. The local vote is only ever changed
//! locally; the votes of other replicas arrive as incoming deltas keyed by
//! replica id and are folded into the tally.

use crate::data::{mismatch, DataKind, ReplicatedData};
use crate::delta::{Delta, VoteDelta};
use crate::error::Result;
use crate::replica::{Origin, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// This replica's vote
    self_vote: bool,
    /// Votes of the other replicas
    others: BTreeMap<ReplicaId, bool>,
    #[serde(skip)]
    changed: bool,
}

impl Vote {
    pub fn new() -> Self {
        Self::default()
    }

    /// This replica's current vote
    pub fn vote(&self) -> bool {
        self.self_vote
    }

    /// Update this replica's vote
    pub fn set_vote(&mut self, vote: bool) -> &mut Self {
        if self.self_vote != vote {
            self.self_vote = vote;
            self.changed = !self.changed;
        }
        self
    }

    /// Number of replicas voting for the condition
    pub fn votes_for(&self) -> usize {
        self.others.values().filter(|v| **v).count() + usize::from(self.self_vote)
    }

    /// Number of replicas that have voted, including this one
    pub fn total_voters(&self) -> usize {
        self.others.len() + 1
    }

    pub fn at_least_one(&self) -> bool {
        self.votes_for() > 0
    }

    pub fn majority(&self) -> bool {
        self.votes_for() * 2 > self.total_voters()
    }

    pub fn all(&self) -> bool {
        self.votes_for() == self.total_voters()
    }

    fn own_votes(&self, origin: &Origin) -> VoteDelta {
        let mut votes = BTreeMap::new();
        votes.insert(origin.replica.clone(), self.self_vote);
        VoteDelta { votes }
    }
}

impl ReplicatedData for Vote {
    fn kind(&self) -> DataKind {
        DataKind::Vote
    }

    fn has_delta(&self) -> bool {
        self.changed
    }

    fn delta(&self, origin: &Origin) -> Option<Delta> {
        self.changed.then(|| Delta::Vote(self.own_votes(origin)))
    }

    fn full_state(&self, origin: &Origin) -> Delta {
        let mut state = self.own_votes(origin);
        for (replica, vote) in &self.others {
            state.votes.insert(replica.clone(), *vote);
        }
        Delta::Vote(state)
    }

    fn reset_delta(&mut self, _origin: &Origin) {
        self.changed = false;
    }

    fn apply_delta(&mut self, delta: &Delta, origin: &Origin) -> Result<()> {
        match delta {
            Delta::Vote(d) => {
                for (replica, vote) in &d.votes {
                    // Our own vote is local-only
                    if *replica != origin.replica {
                        self.others.insert(replica.clone(), *vote);
                    }
                }
                Ok(())
            }
            other => Err(mismatch(DataKind::Vote, other)),
        }
    }

    fn restore(&mut self, state: &Delta, origin: &Origin) -> Result<()> {
        match state {
            Delta::Vote(d) => {
                for (replica, vote) in &d.votes {
                    if *replica == origin.replica {
                        self.self_vote = *vote;
                    } else {
                        self.others.insert(replica.clone(), *vote);
                    }
                }
                Ok(())
            }
            other => Err(mismatch(DataKind::Vote, other)),
        }
    }
}
