use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge};

pub static SLICE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "algo_exec_slice_latency_seconds",
        "Time from SLICE_SENT to its terminal event (fill/cancel/reject)",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("slice_latency histogram")
});

pub static SLIPPAGE_BPS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "algo_exec_slippage_bps",
        "Execution slippage versus intent limit price, in basis points",
        vec![0.0, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]
    )
    .expect("slippage_bps histogram")
});

pub static CIRCUIT_BREAKER_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "algo_exec_circuit_breaker_state",
        "Current circuit breaker state (0=NORMAL,1=TRIGGERED,2=COOLING,3=RECOVERY,4=MANUAL_OVERRIDE)"
    )
    .expect("circuit_breaker_state gauge")
});

pub static CIRCUIT_BREAKER_CAPACITY: Lazy<prometheus::Gauge> = Lazy::new(|| {
    prometheus::register_gauge!(
        "algo_exec_circuit_breaker_capacity",
        "Current fraction of base order-size limit permitted by the circuit breaker"
    )
    .expect("circuit_breaker_capacity gauge")
});

pub static ACTIVE_PLANS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("algo_exec_active_plans", "Number of execution plans not yet in a terminal status")
        .expect("active_plans gauge")
});

pub static FILLED_ORDERS: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("algo_exec_filled_orders_total", "Total child orders filled").expect("filled_orders counter"));

pub static INVALID_INTENTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("algo_exec_invalid_intents_total", "Total intents rejected by make_plan validation")
        .expect("invalid_intents counter")
});

pub static PLANS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("algo_exec_plans_failed_total", "Total plans that transitioned to FAILED")
        .expect("plans_failed counter")
});

pub static CHILD_ORDERS_SENT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("algo_exec_child_orders_sent_total", "Total PLACE_ORDER actions emitted")
        .expect("child_orders_sent counter")
});

pub static CHILD_ORDERS_RETRIED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("algo_exec_child_orders_retried_total", "Total slice retries after a REJECT or timeout")
        .expect("child_orders_retried counter")
});

pub static RISK_TRIGGERS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("algo_exec_risk_triggers_total", "Total circuit breaker trigger events")
        .expect("risk_triggers counter")
});

pub fn inc_invalid_intents() {
    INVALID_INTENTS.inc();
}

pub fn inc_plans_failed() {
    PLANS_FAILED.inc();
}

pub fn inc_child_orders_sent() {
    CHILD_ORDERS_SENT.inc();
}

pub fn inc_child_orders_retried() {
    CHILD_ORDERS_RETRIED.inc();
}

pub fn inc_risk_triggers() {
    RISK_TRIGGERS.inc();
}

pub fn inc_filled_orders() {
    FILLED_ORDERS.inc();
}

pub fn set_active_plans(count: i64) {
    ACTIVE_PLANS.set(count);
}

pub fn observe_slice_latency(duration_sec: f64) {
    SLICE_LATENCY.observe(duration_sec);
}

pub fn observe_slippage(bps: f64) {
    SLIPPAGE_BPS.observe(bps);
}

pub fn set_circuit_breaker_state(state: i64) {
    CIRCUIT_BREAKER_STATE.set(state);
}

pub fn set_circuit_breaker_capacity(capacity: f64) {
    CIRCUIT_BREAKER_CAPACITY.set(capacity);
}
