//! Id generators for the range-partitioned backend.
//!
//! The relational backend takes ids from its own sequence; the partitioned
//! backend asks an [`IdGenerator`] for each new row.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;

const VERSION: u64 = 2;
const VERSION_BITS: u32 = 4;
const TIMESTAMP_BITS: u32 = 32;
const INSTANCE_BITS: u32 = 8;
const SEQUENCE_BITS: u32 = 20;

const INSTANCE_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + INSTANCE_BITS;
const VERSION_SHIFT: u32 = TIMESTAMP_SHIFT + TIMESTAMP_BITS;
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;
const INSTANCE_MASK: u64 = (1 << INSTANCE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Epoch for generated timestamps: 2022-04-01T00:00:00Z.
const EPOCH_SECS: i64 = 1_648_771_200;

/// Source of unique 64-bit ids.
pub trait IdGenerator: Send + Sync + 'static {
    /// Returns a new id, always below `2^63`.
    fn next_id(&self) -> u64;
}

/// Snowflake-style, time-ordered ids.
///
/// Layout, most significant first: 4 version bits (always `2`), 32 bits of
/// seconds since the 2022-04-01 epoch, 8 instance bits, 20 sequence bits.
///
/// The instance bits are drawn at random when the generator is built. Ids
/// from one generator are strictly increasing: the sequence restarts at zero
/// each second, and once it is exhausted the generator moves on to the next
/// second instead of wrapping.
#[derive(Debug)]
pub struct TimestampIdGenerator {
    instance: u64,
    last: AtomicU64,
}

impl TimestampIdGenerator {
    pub fn new() -> Self {
        Self::with_instance(rand::thread_rng().gen::<u8>())
    }

    /// Builds a generator with fixed instance bits.
    pub fn with_instance(instance: u8) -> Self {
        Self {
            instance: u64::from(instance),
            last: AtomicU64::new(0),
        }
    }

    /// Builds an id for the given instant, instance and sequence number.
    pub fn id_for(now: DateTime<Utc>, instance: u8, sequence: u32) -> u64 {
        let seconds = (now.timestamp() - EPOCH_SECS).max(0) as u64 & TIMESTAMP_MASK;
        compose(seconds, u64::from(instance), u64::from(sequence))
    }

    /// Extracts the creation time encoded in an id.
    pub fn timestamp_of(id: u64) -> Option<DateTime<Utc>> {
        let seconds = (id >> TIMESTAMP_SHIFT) & TIMESTAMP_MASK;
        Utc.timestamp_opt(EPOCH_SECS + seconds as i64, 0).single()
    }

    /// Extracts the version bits of an id.
    pub fn version_of(id: u64) -> u64 {
        (id >> VERSION_SHIFT) & ((1 << VERSION_BITS) - 1)
    }

    /// Extracts the instance bits of an id.
    pub fn instance_of(id: u64) -> u8 {
        ((id >> INSTANCE_SHIFT) & INSTANCE_MASK) as u8
    }

    /// Extracts the sequence number of an id.
    pub fn sequence_of(id: u64) -> u32 {
        (id & SEQUENCE_MASK) as u32
    }

    fn next_at(&self, now: DateTime<Utc>) -> u64 {
        let floor = Self::id_for(now, self.instance as u8, 0);
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(if last < floor { floor } else { successor(last) })
            })
            // The closure never returns None.
            .unwrap_or_else(|last| last);
        if previous < floor {
            floor
        } else {
            successor(previous)
        }
    }
}

impl Default for TimestampIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for TimestampIdGenerator {
    fn next_id(&self) -> u64 {
        self.next_at(Utc::now())
    }
}

fn compose(seconds: u64, instance: u64, sequence: u64) -> u64 {
    (VERSION << VERSION_SHIFT)
        | ((seconds & TIMESTAMP_MASK) << TIMESTAMP_SHIFT)
        | ((instance & INSTANCE_MASK) << INSTANCE_SHIFT)
        | (sequence & SEQUENCE_MASK)
}

/// Next id after `id` for the same instance, rolling into the following
/// second when the sequence is exhausted.
fn successor(id: u64) -> u64 {
    let sequence = id & SEQUENCE_MASK;
    if sequence < SEQUENCE_MASK {
        return id + 1;
    }
    let seconds = (id >> TIMESTAMP_SHIFT) & TIMESTAMP_MASK;
    let instance = (id >> INSTANCE_SHIFT) & INSTANCE_MASK;
    compose(seconds + 1, instance, 0)
}

/// Monotonic counter, for tests and deterministic runs.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
