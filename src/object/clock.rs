//! Access clock primitives for eviction.
//!
//! Each object carries one 24-bit field. Under LRU it holds the LRU clock at
//! last access; under LFU the top 16 bits hold the access time in minutes and
//! the low 8 bits a logarithmic access counter. The eviction policy itself
//! lives outside this crate; only the clock arithmetic is here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

pub const LRU_BITS: u32 = 24;
pub const LRU_CLOCK_MAX: u32 = (1 << LRU_BITS) - 1;
/// Milliseconds per LRU clock tick.
pub const LRU_CLOCK_RESOLUTION: u64 = 1000;

/// Counter value of a newly created object, so new keys are not evicted
/// before they had a chance to be accessed.
pub const LFU_INIT_VAL: u8 = 5;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Current LRU clock, wrapping at 2^24 ticks.
    fn lru_clock(&self) -> u32 {
        ((self.now_ms() / LRU_CLOCK_RESOLUTION) & LRU_CLOCK_MAX as u64) as u32
    }

    /// Current time in minutes, low 16 bits.
    fn lfu_minutes(&self) -> u16 {
        ((self.now_ms() / 1000 / 60) & 0xFFFF) as u16
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    pub fn new(ms: u64) -> Self {
        Self { ms: AtomicU64::new(ms) }
    }

    pub fn set(&self, ms: u64) {
        self.ms.store(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, by: Duration) {
        self.ms.fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::Relaxed)
    }
}

/// Milliseconds since an object with LRU field `lru` was accessed, given the
/// current LRU clock. Handles one wrap of the 24-bit clock.
pub fn estimate_idle_time(lru: u32, lru_clock: u32) -> u64 {
    if lru_clock >= lru {
        (lru_clock - lru) as u64 * LRU_CLOCK_RESOLUTION
    } else {
        (lru_clock as u64 + (LRU_CLOCK_MAX - lru) as u64) * LRU_CLOCK_RESOLUTION
    }
}

/// Initial LFU field: current minutes and [`LFU_INIT_VAL`].
pub fn lfu_init(minutes: u16) -> u32 {
    (minutes as u32) << 8 | LFU_INIT_VAL as u32
}

/// Minutes since `last`, handling one wrap of the 16-bit minute clock.
pub fn lfu_time_elapsed(last: u16, now: u16) -> u16 {
    if now >= last {
        now - last
    } else {
        u16::MAX - last + now
    }
}

/// Probabilistically increment a logarithmic counter. The higher the counter,
/// the less likely an increment; `log_factor` scales how quickly it saturates.
pub fn lfu_log_incr(counter: u8, log_factor: u32, rng: &mut impl Rng) -> u8 {
    if counter == u8::MAX {
        return counter;
    }
    let base = (counter as f64 - LFU_INIT_VAL as f64).max(0.0);
    let p = 1.0 / (base * log_factor as f64 + 1.0);
    if rng.gen::<f64>() < p {
        counter + 1
    } else {
        counter
    }
}

/// Counter of LFU field `lfu` after decaying one step per `decay_time`
/// minutes elapsed. Does not update the field.
pub fn lfu_decr_and_return(lfu: u32, now_minutes: u16, decay_time: u32) -> u8 {
    let last = (lfu >> 8) as u16;
    let counter = (lfu & 0xFF) as u8;
    let periods = if decay_time > 0 {
        lfu_time_elapsed(last, now_minutes) as u32 / decay_time
    } else {
        0
    };
    counter.saturating_sub(periods.min(u8::MAX as u32) as u8)
}
