use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::metrics;

/// Circuit-breaker state machine states. Transitions are
/// serialized under `CircuitBreaker`'s internal lock; `capacity()` is
/// a lock-free atomic read so a driver on the hot path never blocks
/// behind a transition in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    Normal,
    Triggered,
    Cooling,
    Recovery,
    ManualOverride,
}

const COOLING_MS: i64 = 15 * 60 * 1000;
const RECOVERY_STAGE_DURATIONS_MS: [i64; 4] = [30 * 60 * 1000, 60 * 60 * 1000, 120 * 60 * 1000, i64::MAX];
const RECOVERY_STAGE_CAPACITY: [f64; 4] = [0.25, 0.50, 0.75, 1.0];

/// Any one of these firing trips the breaker.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TriggerConditions {
    pub daily_loss_pct: f64,
    pub max_single_position_loss_pct: f64,
    pub margin_usage_pct: f64,
    pub consecutive_losses: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerLimits {
    pub daily_loss_pct_limit: f64,
    pub position_loss_pct_limit: f64,
    pub margin_usage_pct_limit: f64,
    pub consecutive_losses_limit: u32,
}

impl Default for TriggerLimits {
    fn default() -> Self {
        Self {
            daily_loss_pct_limit: 0.03,
            position_loss_pct_limit: 0.05,
            margin_usage_pct_limit: 0.85,
            consecutive_losses_limit: 5,
        }
    }
}

impl TriggerLimits {
    pub fn breached_by(&self, c: &TriggerConditions) -> bool {
        c.daily_loss_pct > self.daily_loss_pct_limit
            || c.max_single_position_loss_pct > self.position_loss_pct_limit
            || c.margin_usage_pct > self.margin_usage_pct_limit
            || c.consecutive_losses >= self.consecutive_losses_limit
    }
}

/// Returned from the mutating entry/exit calls so a driver can audit
/// a manual-override transition through its own event stream (the
/// breaker has no audit dependency of its own).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerTransition {
    pub from: CircuitBreakerState,
    pub to: CircuitBreakerState,
    pub ts: i64,
    pub reason: String,
}

struct Inner {
    state: CircuitBreakerState,
    state_entered_at: i64,
    recovery_stage: usize,
    manual_capacity: f64,
}

/// Process-global circuit breaker. All drivers across all plans query
/// the same instance before dispatching `PLACE_ORDER`.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    capacity_bits: AtomicU64,
    operator_secret: String,
}

impl CircuitBreaker {
    pub fn new(operator_secret: impl Into<String>, now: i64) -> Self {
        let breaker = Self {
            inner: Mutex::new(Inner {
                state: CircuitBreakerState::Normal,
                state_entered_at: now,
                recovery_stage: 0,
                manual_capacity: 0.0,
            }),
            capacity_bits: AtomicU64::new(1.0f64.to_bits()),
            operator_secret: operator_secret.into(),
        };
        metrics::set_circuit_breaker_state(state_code(CircuitBreakerState::Normal));
        metrics::set_circuit_breaker_capacity(1.0);
        breaker
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Lock-free capacity snapshot: the fraction of `base_limit` new
    /// open quantity is currently permitted for.
    pub fn capacity(&self) -> f64 {
        f64::from_bits(self.capacity_bits.load(Ordering::Acquire))
    }

    fn set_capacity(&self, value: f64) {
        self.capacity_bits.store(value.to_bits(), Ordering::Release);
        metrics::set_circuit_breaker_capacity(value);
    }

    /// Evaluates trigger conditions against configured limits and
    /// transitions NORMAL/RECOVERY -> TRIGGERED on breach; resets the
    /// RECOVERY stage counter per spec ("any new trigger during
    /// RECOVERY transitions back to TRIGGERED and resets the stage").
    /// No-op while in MANUAL_OVERRIDE (the operator owns capacity
    /// there) or already TRIGGERED/COOLING.
    pub fn evaluate(&self, limits: &TriggerLimits, conditions: &TriggerConditions, now: i64) {
        if !limits.breached_by(conditions) {
            return;
        }
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::ManualOverride | CircuitBreakerState::Triggered => {}
            CircuitBreakerState::Cooling | CircuitBreakerState::Recovery | CircuitBreakerState::Normal => {
                let from = inner.state;
                inner.state = CircuitBreakerState::Triggered;
                inner.state_entered_at = now;
                inner.recovery_stage = 0;
                drop(inner);
                self.set_capacity(0.0);
                metrics::set_circuit_breaker_state(state_code(CircuitBreakerState::Triggered));
                metrics::inc_risk_triggers();
                warn!(
                    ?from,
                    daily_loss_pct = conditions.daily_loss_pct,
                    max_single_position_loss_pct = conditions.max_single_position_loss_pct,
                    margin_usage_pct = conditions.margin_usage_pct,
                    consecutive_losses = conditions.consecutive_losses,
                    "circuit breaker tripped"
                );
            }
        }
    }

    /// Advances the state machine based on elapsed time since the last
    /// transition: TRIGGERED -> COOLING after no fixed delay (the
    /// breaker is authored as entering COOLING immediately; the 15
    /// minute window is COOLING's own minimum dwell time) -> RECOVERY
    /// once the cooling window elapses -> stage advances through
    /// 25/50/75/100% as each stage's duration elapses without a new
    /// trigger.
    pub fn tick(&self, now: i64) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Triggered => {
                inner.state = CircuitBreakerState::Cooling;
                inner.state_entered_at = now;
                drop(inner);
                self.set_capacity(0.0);
                metrics::set_circuit_breaker_state(state_code(CircuitBreakerState::Cooling));
            }
            CircuitBreakerState::Cooling => {
                if now - inner.state_entered_at >= COOLING_MS {
                    inner.state = CircuitBreakerState::Recovery;
                    inner.state_entered_at = now;
                    inner.recovery_stage = 0;
                    drop(inner);
                    self.set_capacity(RECOVERY_STAGE_CAPACITY[0]);
                    metrics::set_circuit_breaker_state(state_code(CircuitBreakerState::Recovery));
                }
            }
            CircuitBreakerState::Recovery => {
                let stage = inner.recovery_stage;
                let duration = RECOVERY_STAGE_DURATIONS_MS[stage];
                if duration != i64::MAX && now - inner.state_entered_at >= duration && stage + 1 < RECOVERY_STAGE_CAPACITY.len() {
                    inner.recovery_stage = stage + 1;
                    inner.state_entered_at = now;
                    let new_stage = inner.recovery_stage;
                    drop(inner);
                    self.set_capacity(RECOVERY_STAGE_CAPACITY[new_stage]);
                    // Remains in RECOVERY even at full capacity; no NORMAL re-entry
                    // is modeled as a separate stage.
                }
            }
            CircuitBreakerState::Normal | CircuitBreakerState::ManualOverride => {}
        }
    }

    fn verify_token(&self, operator_token: &str) -> bool {
        constant_time_eq(operator_token.as_bytes(), self.operator_secret.as_bytes())
    }

    pub fn enter_manual_override(&self, operator_token: &str, now: i64) -> Result<CircuitBreakerTransition, ()> {
        if !self.verify_token(operator_token) {
            return Err(());
        }
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = CircuitBreakerState::ManualOverride;
        inner.state_entered_at = now;
        inner.manual_capacity = 0.0;
        drop(inner);
        self.set_capacity(0.0);
        metrics::set_circuit_breaker_state(state_code(CircuitBreakerState::ManualOverride));
        warn!(?from, "operator entered manual override");
        Ok(CircuitBreakerTransition {
            from,
            to: CircuitBreakerState::ManualOverride,
            ts: now,
            reason: "operator entered manual override".to_string(),
        })
    }

    pub fn exit_manual_override(&self, operator_token: &str, now: i64) -> Result<CircuitBreakerTransition, ()> {
        if !self.verify_token(operator_token) {
            return Err(());
        }
        let mut inner = self.inner.lock();
        if inner.state != CircuitBreakerState::ManualOverride {
            return Err(());
        }
        inner.state = CircuitBreakerState::Normal;
        inner.state_entered_at = now;
        drop(inner);
        self.set_capacity(1.0);
        metrics::set_circuit_breaker_state(state_code(CircuitBreakerState::Normal));
        warn!("operator exited manual override");
        Ok(CircuitBreakerTransition {
            from: CircuitBreakerState::ManualOverride,
            to: CircuitBreakerState::Normal,
            ts: now,
            reason: "operator exited manual override".to_string(),
        })
    }

    pub fn set_manual_capacity(&self, operator_token: &str, capacity: f64) -> Result<(), ()> {
        if !self.verify_token(operator_token) {
            return Err(());
        }
        let mut inner = self.inner.lock();
        if inner.state != CircuitBreakerState::ManualOverride {
            return Err(());
        }
        let clamped = capacity.clamp(0.0, 1.0);
        inner.manual_capacity = clamped;
        drop(inner);
        self.set_capacity(clamped);
        Ok(())
    }

    /// Effective allowed new-open quantity for a given `base_limit`.
    pub fn allowed_qty(&self, base_limit: i64) -> i64 {
        ((base_limit as f64) * self.capacity()).floor() as i64
    }
}

fn state_code(state: CircuitBreakerState) -> i64 {
    match state {
        CircuitBreakerState::Normal => 0,
        CircuitBreakerState::Triggered => 1,
        CircuitBreakerState::Cooling => 2,
        CircuitBreakerState::Recovery => 3,
        CircuitBreakerState::ManualOverride => 4,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_then_recovery_staging() {
        let breaker = CircuitBreaker::new("secret", 0);
        let limits = TriggerLimits::default();
        let conditions = TriggerConditions {
            daily_loss_pct: 0.05,
            ..Default::default()
        };

        breaker.evaluate(&limits, &conditions, 0);
        assert_eq!(breaker.state(), CircuitBreakerState::Triggered);
        assert_eq!(breaker.capacity(), 0.0);

        breaker.tick(1);
        assert_eq!(breaker.state(), CircuitBreakerState::Cooling);

        breaker.tick(1 + COOLING_MS - 1);
        assert_eq!(breaker.state(), CircuitBreakerState::Cooling);

        let t = 1 + COOLING_MS;
        breaker.tick(t);
        assert_eq!(breaker.state(), CircuitBreakerState::Recovery);
        assert_eq!(breaker.capacity(), 0.25);

        breaker.tick(t + RECOVERY_STAGE_DURATIONS_MS[0]);
        assert_eq!(breaker.capacity(), 0.50);
        breaker.tick(t + RECOVERY_STAGE_DURATIONS_MS[0] + RECOVERY_STAGE_DURATIONS_MS[1]);
        assert_eq!(breaker.capacity(), 0.75);
        breaker.tick(
            t + RECOVERY_STAGE_DURATIONS_MS[0] + RECOVERY_STAGE_DURATIONS_MS[1] + RECOVERY_STAGE_DURATIONS_MS[2],
        );
        assert_eq!(breaker.capacity(), 1.0);
    }

    #[test]
    fn new_trigger_during_recovery_resets_to_triggered() {
        let breaker = CircuitBreaker::new("secret", 0);
        let limits = TriggerLimits::default();
        let conditions = TriggerConditions {
            daily_loss_pct: 0.05,
            ..Default::default()
        };
        breaker.evaluate(&limits, &conditions, 0);
        breaker.tick(1);
        breaker.tick(1 + COOLING_MS);
        assert_eq!(breaker.state(), CircuitBreakerState::Recovery);

        breaker.evaluate(&limits, &conditions, 1 + COOLING_MS + 10);
        assert_eq!(breaker.state(), CircuitBreakerState::Triggered);
        assert_eq!(breaker.capacity(), 0.0);
    }

    #[test]
    fn manual_override_requires_correct_token() {
        let breaker = CircuitBreaker::new("secret", 0);
        assert!(breaker.enter_manual_override("wrong", 0).is_err());
        let transition = breaker.enter_manual_override("secret", 0).unwrap();
        assert_eq!(transition.to, CircuitBreakerState::ManualOverride);

        breaker.set_manual_capacity("secret", 0.4).unwrap();
        assert_eq!(breaker.capacity(), 0.4);

        assert!(breaker.exit_manual_override("wrong", 1).is_err());
        let transition = breaker.exit_manual_override("secret", 1).unwrap();
        assert_eq!(transition.to, CircuitBreakerState::Normal);
        assert_eq!(breaker.capacity(), 1.0);
    }
}
