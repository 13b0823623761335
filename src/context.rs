use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Supplies the current time to every timestamp-producing call in the
/// core. Nothing in this crate calls `Utc::now()` directly; all of it
/// flows through here so a plan's action sequence is a pure function
/// of `(plan_id, intent, event history, clock readings)`, so replaying
/// the same history through the same clock reproduces the same output
/// byte-for-byte.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
    fn now(&self) -> DateTime<Utc>;
}

/// Supplies identifiers the core itself must mint — currently only
/// the ledger's `run_id`/`exec_id` when a driver doesn't provide them
/// explicitly. `ChildOrderId` construction is deterministic from
/// `(intent_id, slice_index, retry_count)` and does not use this
/// trait.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

/// Bundles the two injectable capabilities a plan needs. Cloning is
/// cheap (both fields are `Arc`s), so a `Context` can be handed to
/// every plan in a registry without contention.
#[derive(Clone)]
pub struct Context {
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl Context {
    pub fn system() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIdGenerator),
        }
    }

    pub fn simulated(start_time_ms: i64) -> Self {
        Self {
            clock: Arc::new(SimulatedClock::new(start_time_ms)),
            ids: Arc::new(DeterministicIdGenerator::new()),
        }
    }
}

// --- Live implementations ---

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

// --- Deterministic implementations, for tests and replay ---

/// A clock whose value only moves when told to. Every TWAP/VWAP/
/// Iceberg scenario test and the replay-determinism tests drive this directly.
pub struct SimulatedClock {
    current_time_ms: AtomicI64,
}

impl SimulatedClock {
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            current_time_ms: AtomicI64::new(start_time_ms),
        }
    }

    pub fn set_time(&self, time_ms: i64) {
        self.current_time_ms.store(time_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, duration_ms: i64) {
        self.current_time_ms.fetch_add(duration_ms, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now_millis(&self) -> i64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    fn now(&self) -> DateTime<Utc> {
        let ms = self.now_millis();
        Utc.timestamp_millis_opt(ms).unwrap()
    }
}

/// Produces `00000000-0000-0000-0000-<counter>`-shaped ids in
/// ascending order so two replay runs mint identical sequences.
pub struct DeterministicIdGenerator {
    counter: Mutex<u64>,
}

impl DeterministicIdGenerator {
    pub fn new() -> Self {
        Self {
            counter: Mutex::new(0),
        }
    }
}

impl Default for DeterministicIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for DeterministicIdGenerator {
    fn new_id(&self) -> String {
        let mut num = self.counter.lock().unwrap();
        *num += 1;
        format!("00000000-0000-0000-0000-{:012x}", *num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_clock_advances() {
        let clock = SimulatedClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set_time(9_999);
        assert_eq!(clock.now_millis(), 9_999);
    }

    #[test]
    fn deterministic_ids_are_sequential_and_repeatable() {
        let gen_a = DeterministicIdGenerator::new();
        let gen_b = DeterministicIdGenerator::new();
        assert_eq!(gen_a.new_id(), gen_b.new_id());
        assert_eq!(gen_a.new_id(), gen_b.new_id());
    }
}
