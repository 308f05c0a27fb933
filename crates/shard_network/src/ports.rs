//! Listen-port selection.
//!
//! Port choice is kept apart from identity generation: identities may be
//! reproducible across runs while ports stay random, so repeated runs on one
//! machine don't keep colliding on the same ports.

use std::collections::HashSet;
use std::ops::Range;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::NetworkError;

/// Default range bootstrap hosts listen in (end exclusive).
pub const DEFAULT_PORT_RANGE: Range<u16> = 3000..3500;

/// Picks the local port a new host binds to.
pub trait PortSelector: Send + Sync {
    fn next_port(&self) -> Result<u16, NetworkError>;
}

/// Draws ports uniformly from a range without handing the same port out
/// twice.
pub struct RandomPortSelector {
    range: Range<u16>,
    state: Mutex<SelectorState>,
}

struct SelectorState {
    rng: StdRng,
    issued: HashSet<u16>,
}

impl RandomPortSelector {
    /// A selector seeded once from the wall clock.
    pub fn new(range: Range<u16>) -> Self {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::with_seed(range, nanos as u64)
    }

    pub fn with_seed(range: Range<u16>, seed: u64) -> Self {
        Self {
            range,
            state: Mutex::new(SelectorState {
                rng: StdRng::seed_from_u64(seed),
                issued: HashSet::new(),
            }),
        }
    }

    pub fn range(&self) -> Range<u16> {
        self.range.clone()
    }
}

impl Default for RandomPortSelector {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}

impl PortSelector for RandomPortSelector {
    fn next_port(&self) -> Result<u16, NetworkError> {
        let mut state = self.state.lock();
        if state.issued.len() >= self.range.len() {
            return Err(NetworkError::PortsExhausted {
                start: self.range.start,
                end: self.range.end,
            });
        }
        loop {
            let port = state.rng.random_range(self.range.clone());
            if state.issued.insert(port) {
                return Ok(port);
            }
        }
    }
}

/// Always asks the OS for an ephemeral port.
#[derive(Debug, Default, Clone, Copy)]
pub struct EphemeralPortSelector;

impl PortSelector for EphemeralPortSelector {
    fn next_port(&self) -> Result<u16, NetworkError> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
