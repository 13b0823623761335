use crossbeam_channel::{unbounded, Receiver, Sender};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{AlgoKind, Offset, Side};

/// Discriminated union over every audit event kind the ledger can
/// carry. Per-`intent_id` ordering forms the chain described in
/// `OrderIntent`'s documentation: `INTENT_CREATED -> PLAN_CREATED ->
/// (SLICE_SENT -> (SLICE_ACK|SLICE_REJECTED) -> SLICE_PARTIAL_FILL* ->
/// (SLICE_FILLED|SLICE_CANCELLED))* -> (INTENT_COMPLETED|INTENT_FAILED
/// |PLAN_CANCELLED)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    IntentCreated,
    IntentRejected,
    PlanCreated,
    SliceScheduled,
    SliceSent,
    SliceAck,
    SlicePartialFill,
    SliceFilled,
    SliceRejected,
    SliceCancelled,
    PlanPaused,
    PlanResumed,
    PlanCancelled,
    IntentCompleted,
    IntentFailed,
}

/// One record in the append-only ledger. `run_id`/`exec_id` are filled
/// in by the ledger itself at insertion time, never by the caller, so
/// every event a sink observes is already correlated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventKind,
    pub ts: i64,
    pub run_id: String,
    pub exec_id: String,
    pub intent_id: String,
    pub plan_id: String,
    pub client_order_id: Option<String>,
    pub slice_index: Option<u32>,
    pub instrument: Option<String>,
    pub side: Option<Side>,
    pub offset: Option<Offset>,
    pub qty: Option<i64>,
    pub price: Option<Decimal>,
    pub filled_qty: Option<i64>,
    pub filled_price: Option<Decimal>,
    pub remaining_qty: Option<i64>,
    pub algo: Option<AlgoKind>,
    pub reason: Option<String>,
    pub error_code: Option<String>,
    pub error_msg: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Builder for `AuditEvent`s. The ledger is the only code allowed to
/// stamp `run_id`/`exec_id`/`ts`, so this builder leaves them blank
/// and `AuditLedger::record` fills them in just before the event is
/// sent to sinks.
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    event_type: AuditEventKind,
    intent_id: String,
    plan_id: String,
    client_order_id: Option<String>,
    slice_index: Option<u32>,
    instrument: Option<String>,
    side: Option<Side>,
    offset: Option<Offset>,
    qty: Option<i64>,
    price: Option<Decimal>,
    filled_qty: Option<i64>,
    filled_price: Option<Decimal>,
    remaining_qty: Option<i64>,
    algo: Option<AlgoKind>,
    reason: Option<String>,
    error_code: Option<String>,
    error_msg: Option<String>,
    metadata: HashMap<String, String>,
}

impl AuditEventBuilder {
    pub fn new(event_type: AuditEventKind, intent_id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            event_type,
            intent_id: intent_id.into(),
            plan_id: plan_id.into(),
            client_order_id: None,
            slice_index: None,
            instrument: None,
            side: None,
            offset: None,
            qty: None,
            price: None,
            filled_qty: None,
            filled_price: None,
            remaining_qty: None,
            algo: None,
            reason: None,
            error_code: None,
            error_msg: None,
            metadata: HashMap::new(),
        }
    }

    pub fn client_order_id(mut self, v: impl Into<String>) -> Self {
        self.client_order_id = Some(v.into());
        self
    }
    pub fn slice_index(mut self, v: u32) -> Self {
        self.slice_index = Some(v);
        self
    }
    pub fn instrument(mut self, v: impl Into<String>) -> Self {
        self.instrument = Some(v.into());
        self
    }
    pub fn side(mut self, v: Side) -> Self {
        self.side = Some(v);
        self
    }
    pub fn offset(mut self, v: Offset) -> Self {
        self.offset = Some(v);
        self
    }
    pub fn qty(mut self, v: i64) -> Self {
        self.qty = Some(v);
        self
    }
    pub fn price(mut self, v: Decimal) -> Self {
        self.price = Some(v);
        self
    }
    pub fn filled_qty(mut self, v: i64) -> Self {
        self.filled_qty = Some(v);
        self
    }
    pub fn filled_price(mut self, v: Decimal) -> Self {
        self.filled_price = Some(v);
        self
    }
    pub fn remaining_qty(mut self, v: i64) -> Self {
        self.remaining_qty = Some(v);
        self
    }
    pub fn algo(mut self, v: AlgoKind) -> Self {
        self.algo = Some(v);
        self
    }
    pub fn reason(mut self, v: impl Into<String>) -> Self {
        self.reason = Some(v.into());
        self
    }
    pub fn error_code(mut self, v: impl Into<String>) -> Self {
        self.error_code = Some(v.into());
        self
    }
    pub fn error_msg(mut self, v: impl Into<String>) -> Self {
        self.error_msg = Some(v.into());
        self
    }
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn build(self, ts: i64, run_id: &str, exec_id: &str) -> AuditEvent {
        AuditEvent {
            event_type: self.event_type,
            ts,
            run_id: run_id.to_string(),
            exec_id: exec_id.to_string(),
            intent_id: self.intent_id,
            plan_id: self.plan_id,
            client_order_id: self.client_order_id,
            slice_index: self.slice_index,
            instrument: self.instrument,
            side: self.side,
            offset: self.offset,
            qty: self.qty,
            price: self.price,
            filled_qty: self.filled_qty,
            filled_price: self.filled_price,
            remaining_qty: self.remaining_qty,
            algo: self.algo,
            reason: self.reason,
            error_code: self.error_code,
            error_msg: self.error_msg,
            metadata: self.metadata,
        }
    }
}

/// A destination for audit events. Drivers implement this to persist
/// the stream; the crate ships `VecAuditSink` and `NullAuditSink` for
/// tests and no-op wiring respectively.
pub trait AuditSink: Send + Sync {
    fn write(&self, event: AuditEvent);
}

/// Discards every event. Useful when a driver has not wired a real
/// sink yet but still wants to construct an `AuditLedger`.
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn write(&self, _event: AuditEvent) {}
}

/// Collects every event into memory, in insertion order. Intended for
/// tests asserting on the audit chain and replay determinism.
#[derive(Default)]
pub struct VecAuditSink {
    events: parking_lot::Mutex<Vec<AuditEvent>>,
}

impl VecAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

impl AuditSink for VecAuditSink {
    fn write(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Append-only, totally-ordered event stream. Internally transported
/// over an unbounded MPMC channel so many plan drivers can append
/// concurrently while a single background consumer drains to sinks;
/// `record` itself is synchronous and fans out to every registered
/// sink directly, since the core has no background thread of its own
/// to run a consumer loop (drivers own threading).
pub struct AuditLedger {
    run_id: String,
    exec_id: String,
    clock: std::sync::Arc<dyn crate::context::Clock>,
    sinks: Vec<std::sync::Arc<dyn AuditSink>>,
    tx: Sender<AuditEvent>,
    rx: Receiver<AuditEvent>,
}

impl AuditLedger {
    pub fn new(run_id: impl Into<String>, exec_id: impl Into<String>, clock: std::sync::Arc<dyn crate::context::Clock>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            run_id: run_id.into(),
            exec_id: exec_id.into(),
            clock,
            sinks: Vec::new(),
            tx,
            rx,
        }
    }

    pub fn add_sink(&mut self, sink: std::sync::Arc<dyn AuditSink>) {
        self.sinks.push(sink);
    }

    /// Stamps `ts`/`run_id`/`exec_id`, pushes onto the channel (so a
    /// driver that wants to drain asynchronously via `drain_into`
    /// still observes the event), and fans it out to every registered
    /// sink synchronously.
    pub fn record(&self, builder: AuditEventBuilder) {
        let event = builder.build(self.clock.now_millis(), &self.run_id, &self.exec_id);
        let _ = self.tx.send(event.clone());
        for sink in &self.sinks {
            sink.write(event.clone());
        }
    }

    /// Drains every event currently queued on the channel without
    /// touching the sink list — for drivers that prefer to pull rather
    /// than push.
    pub fn drain(&self) -> Vec<AuditEvent> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimulatedClock;
    use std::sync::Arc;

    #[test]
    fn record_stamps_run_and_exec_id() {
        let clock = Arc::new(SimulatedClock::new(1_000));
        let mut ledger = AuditLedger::new("run-1", "exec-1", clock);
        let sink = Arc::new(VecAuditSink::new());
        ledger.add_sink(sink.clone());

        ledger.record(AuditEventBuilder::new(
            AuditEventKind::IntentCreated,
            "intent-1",
            "intent-1",
        ));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_id, "run-1");
        assert_eq!(events[0].exec_id, "exec-1");
        assert_eq!(events[0].ts, 1_000);
    }

    #[test]
    fn null_sink_discards() {
        let clock = Arc::new(SimulatedClock::new(0));
        let mut ledger = AuditLedger::new("r", "e", clock);
        ledger.add_sink(Arc::new(NullAuditSink));
        ledger.record(AuditEventBuilder::new(AuditEventKind::IntentCreated, "i", "p"));
    }
}
