pub mod circuit_breaker;
pub mod supervisor;
pub mod var;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitBreakerTransition, TriggerConditions, TriggerLimits};
pub use supervisor::{AccountSnapshot, MarketSnapshot, RiskSupervisor};
pub use var::{
    basel_traffic_light, christoffersen_test, kupiec_test, select_regime, BacktestResult, BaselZone, RegimePolicy,
    VarEngine, VarMethod, VolatilityRegime,
};
