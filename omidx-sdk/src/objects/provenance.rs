use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an event came from: the coordinates that make it unique in the
/// indexed history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub chain_id: u64,
    pub block_number: u64,
    pub log_index: u64,
}

impl Provenance {
    pub fn new(chain_id: u64, block_number: u64, log_index: u64) -> Self {
        Self {
            chain_id,
            block_number,
            log_index,
        }
    }

    /// Position of this event within its own chain's stream.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chain {} block {} log {}",
            self.chain_id, self.block_number, self.log_index
        )
    }
}

/// A position in a single chain's event stream.
///
/// Ordering is lexicographic on `(block_number, log_index)`, which is the
/// delivery order guaranteed by the chain-log source.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Cursor {
    pub block_number: u64,
    pub log_index: u64,
}

impl Cursor {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}
