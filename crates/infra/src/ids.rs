//! Id generators for hierarchy nodes.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use trellis_core::IdGenerator;

use crate::config::MAX_WORKER_ID;

/// 2024-01-01T00:00:00Z in milliseconds.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_704_067_200_000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake-style generator: 41-bit millisecond timestamp, 10-bit worker
/// id, 12-bit sequence. Ids are strictly increasing within one generator.
#[derive(Debug)]
pub struct SnowflakeIdGenerator {
    worker_id: i64,
    state: Mutex<SnowflakeState>,
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: i64,
}

impl SnowflakeIdGenerator {
    /// Worker ids above 1023 are masked to their low 10 bits.
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: i64::from(worker_id & MAX_WORKER_ID),
            state: Mutex::new(SnowflakeState::default()),
        }
    }

    fn compose(&self, ms: i64, sequence: i64) -> i64 {
        ((ms - SNOWFLAKE_EPOCH_MS) << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | sequence
    }
}

impl IdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut now = Utc::now().timestamp_millis();
        // Clock moved backwards: keep issuing from the last seen millisecond.
        if now < state.last_ms {
            now = state.last_ms;
        }
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond.
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = Utc::now().timestamp_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;
        self.compose(now, state.sequence)
    }
}

/// Counter-based generator for tests and fixtures.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    next: AtomicI64,
}

impl SequenceIdGenerator {
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn snowflake_ids_increase_and_carry_worker() {
        let generator = SnowflakeIdGenerator::new(5);
        let ids: Vec<i64> = (0..10_000).map(|_| generator.next_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.iter().all(|id| (id >> SEQUENCE_BITS) & 0x3ff == 5));
        assert!(ids[0] > 0);
    }

    #[test]
    fn snowflake_is_unique_across_threads() {
        let generator = Arc::new(SnowflakeIdGenerator::new(1));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || (0..2_000).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
    }

    #[test]
    fn sequence_counts_up() {
        let generator = SequenceIdGenerator::starting_at(100);
        assert_eq!(generator.next_id(), 100);
        assert_eq!(generator.next_id(), 101);
    }
}
