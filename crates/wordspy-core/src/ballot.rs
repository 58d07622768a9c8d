use std::collections::HashMap;
use std::hash::Hash;

use rand::Rng;
use rand::seq::IndexedRandom;

use crate::player::UserId;

/// Collects at most one counted ballot per voter for an option set.
///
/// Used for both the pre-game category vote and the ejection vote: the
/// invariant is at-most-one-counted-per-voter, not first-write-wins, so
/// a resubmitted ballot replaces the voter's previous one.
#[derive(Debug, Clone, Default)]
pub struct BallotBox<O> {
    ballots: HashMap<UserId, O>,
}

impl<O: Clone + Eq + Hash + Ord> BallotBox<O> {
    pub fn new() -> Self {
        Self {
            ballots: HashMap::new(),
        }
    }

    /// Cast or replace a ballot. Returns the replaced option, if any.
    pub fn cast(&mut self, voter: UserId, option: O) -> Option<O> {
        self.ballots.insert(voter, option)
    }

    pub fn has_voted(&self, voter: &str) -> bool {
        self.ballots.contains_key(voter)
    }

    pub fn len(&self) -> usize {
        self.ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }

    pub fn ballots(&self) -> &HashMap<UserId, O> {
        &self.ballots
    }

    /// True when every voter in `voters` has a counted ballot.
    pub fn is_complete<'a>(&self, mut voters: impl Iterator<Item = &'a UserId>) -> bool {
        voters.all(|v| self.ballots.contains_key(v.as_str()))
    }

    pub fn clear(&mut self) {
        self.ballots.clear();
    }

    /// Resolve the winning option: strictly-greatest count wins, ties
    /// are broken by a uniform draw among the tied options. Tied options
    /// are sorted before the draw so a seeded rng gives reproducible
    /// results. Returns `None` when no ballots were cast.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<O> {
        let mut counts: HashMap<&O, usize> = HashMap::new();
        for option in self.ballots.values() {
            *counts.entry(option).or_insert(0) += 1;
        }
        let max = counts.values().copied().max()?;
        let mut tied: Vec<&O> = counts
            .iter()
            .filter(|&(_, &n)| n == max)
            .map(|(&o, _)| o)
            .collect();
        if tied.len() == 1 {
            return Some(tied[0].clone());
        }
        tied.sort();
        tied.choose(rng).map(|&o| o.clone())
    }
}
