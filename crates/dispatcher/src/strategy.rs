//! Load balancing strategies.

use common::Error;
use std::fmt;
use std::str::FromStr;

/// How a pool picks an endpoint when no instance is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceStrategy {
    /// Uniformly random member.
    #[default]
    Random,
    /// Atomic counter over an append-ordered member list.
    RoundRobin,
    /// Smooth weighted round robin.
    WeightedRoundRobin,
}

impl fmt::Display for BalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceStrategy::Random => f.write_str("random"),
            BalanceStrategy::RoundRobin => f.write_str("rr"),
            BalanceStrategy::WeightedRoundRobin => f.write_str("wrr"),
        }
    }
}

impl FromStr for BalanceStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(BalanceStrategy::Random),
            "rr" | "round_robin" => Ok(BalanceStrategy::RoundRobin),
            "wrr" | "weighted_round_robin" => Ok(BalanceStrategy::WeightedRoundRobin),
            other => Err(Error::InvalidStrategy(other.to_string())),
        }
    }
}
