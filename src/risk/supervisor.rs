use parking_lot::RwLock;

use crate::risk::circuit_breaker::{
    CircuitBreaker, CircuitBreakerState, TriggerConditions, TriggerLimits,
};
use crate::risk::var::{select_regime, RegimePolicy, VarEngine, VarMethod};

/// Per-account risk state as observed from the account feed. The
/// supervisor only stores what the VaR engine and circuit breaker
/// need; it does not reconstruct a full position book.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub daily_loss_pct: f64,
    pub max_single_position_loss_pct: f64,
    pub margin_usage_pct: f64,
    pub consecutive_losses: u32,
}

/// Rolling return series as observed from the market-data feed.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub returns_window: Vec<f64>,
}

struct State {
    account: AccountSnapshot,
    market: MarketSnapshot,
}

/// Process-global risk supervisor: ties the VaR engine and circuit
/// breaker together behind `observe_account`/`observe_market` setters.
/// The core makes no network calls itself; a driver feeds snapshots in
/// from whatever account/market feeds it owns.
pub struct RiskSupervisor {
    state: RwLock<State>,
    breaker: CircuitBreaker,
    limits: TriggerLimits,
    trading_days_per_year: f64,
}

impl RiskSupervisor {
    pub fn new(operator_secret: impl Into<String>, limits: TriggerLimits, now: i64) -> Self {
        Self {
            state: RwLock::new(State {
                account: AccountSnapshot::default(),
                market: MarketSnapshot::default(),
            }),
            breaker: CircuitBreaker::new(operator_secret, now),
            limits,
            trading_days_per_year: 252.0,
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Records the latest account snapshot and immediately evaluates
    /// the circuit breaker's trigger conditions against it.
    pub fn observe_account(&self, snapshot: AccountSnapshot, now: i64) {
        let conditions = TriggerConditions {
            daily_loss_pct: snapshot.daily_loss_pct,
            max_single_position_loss_pct: snapshot.max_single_position_loss_pct,
            margin_usage_pct: snapshot.margin_usage_pct,
            consecutive_losses: snapshot.consecutive_losses,
        };
        self.state.write().account = snapshot;
        self.breaker.evaluate(&self.limits, &conditions, now);
    }

    pub fn observe_market(&self, snapshot: MarketSnapshot) {
        self.state.write().market = snapshot;
    }

    /// Advances the circuit breaker's time-driven transitions
    /// (TRIGGERED -> COOLING -> RECOVERY staging). Drivers call this
    /// on their own polling cadence; the core never sleeps itself.
    pub fn tick(&self, now: i64) {
        self.breaker.tick(now);
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }

    pub fn allowed_qty(&self, base_limit: i64) -> i64 {
        self.breaker.allowed_qty(base_limit)
    }

    /// Selects a VaR regime from the current return window's realized
    /// volatility and computes VaR/CVaR with the regime's prescribed
    /// method and confidence.
    pub fn current_var(&self) -> Option<(RegimePolicy, f64, f64)> {
        let guard = self.state.read();
        let returns = &guard.market.returns_window;
        if returns.len() < 2 {
            return None;
        }
        let annualized_vol = VarEngine::realized_volatility_annualized(returns, self.trading_days_per_year);
        let regime = select_regime(annualized_vol);
        let var = match regime.method {
            VarMethod::Parametric => VarEngine::parametric(returns, regime.confidence, 1.0),
            VarMethod::Historical => VarEngine::historical(returns, regime.confidence),
            VarMethod::MonteCarlo => VarEngine::monte_carlo(returns, regime.confidence, 10_000),
        };
        let cvar = VarEngine::expected_shortfall(returns, regime.confidence);
        Some((regime, var, cvar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observing_a_breach_trips_the_breaker() {
        let supervisor = RiskSupervisor::new("secret", TriggerLimits::default(), 0);
        assert_eq!(supervisor.state(), CircuitBreakerState::Normal);

        supervisor.observe_account(
            AccountSnapshot {
                daily_loss_pct: 0.04,
                ..Default::default()
            },
            0,
        );
        assert_eq!(supervisor.state(), CircuitBreakerState::Triggered);
        assert_eq!(supervisor.allowed_qty(1000), 0);
    }

    #[test]
    fn calm_returns_select_parametric_regime() {
        let supervisor = RiskSupervisor::new("secret", TriggerLimits::default(), 0);
        let returns: Vec<f64> = (0..60).map(|i| if i % 2 == 0 { 0.0005 } else { -0.0004 }).collect();
        supervisor.observe_market(MarketSnapshot { returns_window: returns });
        let (regime, var, cvar) = supervisor.current_var().expect("enough observations");
        assert_eq!(regime.method, VarMethod::Parametric);
        assert!(var >= 0.0);
        assert!(cvar >= 0.0);
    }
}
