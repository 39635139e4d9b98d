//! Per-key endpoint pools.
//!
//! Members are kept in one bucket per instance state. Balanced picks draw from
//! the `work` bucket, or `busy` when nothing is working; `hang` and `shut`
//! members are only reachable by fixed lookup.

use crate::strategy::BalanceStrategy;
use common::{Endpoint, Error, Result, State};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

const BALANCED_STATES: [State; 2] = [State::Work, State::Busy];

#[derive(Debug, Clone)]
struct Member {
    ins_id: String,
    endpoint: Endpoint,
    weight: i64,
}

/// Members of one state, append-ordered and dense.
#[derive(Debug, Default)]
struct Bucket {
    members: Vec<Member>,
    positions: HashMap<String, usize>,
    counter: AtomicUsize,
    /// Smooth WRR current weights, parallel to `members`.
    current_weights: Mutex<Vec<i64>>,
}

impl Bucket {
    fn push(&mut self, member: Member) {
        self.positions.insert(member.ins_id.clone(), self.members.len());
        self.members.push(member);
        self.current_weights
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(0);
    }

    fn remove(&mut self, ins_id: &str) -> bool {
        let Some(pos) = self.positions.remove(ins_id) else {
            return false;
        };
        self.members.remove(pos);
        self.current_weights
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(pos);
        for index in self.positions.values_mut() {
            if *index > pos {
                *index -= 1;
            }
        }
        true
    }

    fn get(&self, ins_id: &str) -> Option<&Member> {
        self.positions.get(ins_id).map(|&pos| &self.members[pos])
    }

    fn random(&self) -> Option<&Member> {
        if self.members.is_empty() {
            return None;
        }
        let pos = rand::thread_rng().gen_range(0..self.members.len());
        self.members.get(pos)
    }

    fn round_robin(&self) -> Option<&Member> {
        if self.members.is_empty() {
            return None;
        }
        let pos = self.counter.fetch_add(1, Ordering::Relaxed) % self.members.len();
        self.members.get(pos)
    }

    fn weighted_round_robin(&self) -> Option<&Member> {
        if self.members.is_empty() {
            return None;
        }

        let mut current = self
            .current_weights
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut total = 0;
        let mut best = 0;
        for (pos, member) in self.members.iter().enumerate() {
            current[pos] += member.weight;
            total += member.weight;
            // strict comparison keeps ties on the earliest member
            if current[pos] > current[best] {
                best = pos;
            }
        }
        current[best] -= total;

        self.members.get(best)
    }
}

/// Weighted endpoints serving one route or event.
#[derive(Debug)]
pub(crate) struct Pool {
    strategy: BalanceStrategy,
    buckets: HashMap<State, Bucket>,
    states: HashMap<String, State>,
}

impl Pool {
    pub(crate) fn new(strategy: BalanceStrategy) -> Self {
        Self {
            strategy,
            buckets: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Add a member; an instance already present under another state is moved.
    pub(crate) fn add_endpoint(&mut self, ins_id: &str, state: State, endpoint: Endpoint, weight: i32) {
        if self.states.contains_key(ins_id) {
            self.remove_endpoint(ins_id);
        }

        self.states.insert(ins_id.to_string(), state);
        self.buckets.entry(state).or_default().push(Member {
            ins_id: ins_id.to_string(),
            endpoint,
            weight: i64::from(weight.max(1)),
        });
    }

    pub(crate) fn remove_endpoint(&mut self, ins_id: &str) -> bool {
        let Some(state) = self.states.remove(ins_id) else {
            return false;
        };
        let removed = self
            .buckets
            .get_mut(&state)
            .map(|bucket| bucket.remove(ins_id))
            .unwrap_or(false);
        if self.buckets.get(&state).is_some_and(|b| b.members.is_empty()) {
            self.buckets.remove(&state);
        }
        removed
    }

    /// Fixed lookup when `ins_id` is given, otherwise a balanced pick.
    pub(crate) fn find_endpoint(&self, ins_id: Option<&str>) -> Result<Endpoint> {
        match ins_id.filter(|id| !id.is_empty()) {
            Some(id) => self.find_fixed(id),
            None => self.find_balanced(),
        }
    }

    fn find_fixed(&self, ins_id: &str) -> Result<Endpoint> {
        self.states
            .get(ins_id)
            .and_then(|state| self.buckets.get(state))
            .and_then(|bucket| bucket.get(ins_id))
            .map(|member| member.endpoint.clone())
            .ok_or(Error::NotFoundEndpoint)
    }

    fn find_balanced(&self) -> Result<Endpoint> {
        let bucket = BALANCED_STATES
            .iter()
            .filter_map(|state| self.buckets.get(state))
            .find(|bucket| !bucket.members.is_empty())
            .ok_or(Error::NotFoundEndpoint)?;

        let member = match self.strategy {
            BalanceStrategy::Random => bucket.random(),
            BalanceStrategy::RoundRobin => bucket.round_robin(),
            BalanceStrategy::WeightedRoundRobin => bucket.weighted_round_robin(),
        };

        member
            .map(|member| member.endpoint.clone())
            .ok_or(Error::NotFoundEndpoint)
    }

    /// Every member regardless of state, as `(instance id, endpoint)`.
    pub(crate) fn members(&self) -> Vec<(String, Endpoint)> {
        self.buckets
            .values()
            .flat_map(|bucket| bucket.members.iter())
            .map(|member| (member.ins_id.clone(), member.endpoint.clone()))
            .collect()
    }

    pub(crate) fn contains(&self, ins_id: &str) -> bool {
        self.states.contains_key(ins_id)
    }

    pub(crate) fn state_of(&self, ins_id: &str) -> Option<State> {
        self.states.get(ins_id).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }
}
