use crate::handler::{Event, Outcome};

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use std::fmt::{self, Debug};

pub struct Metrics {
    registry: Registry,
    events_by_name: IntCounterVec,
    reconciles_by_status: IntCounterVec,
    deferred_events: IntCounter,
    deferred_queue_len: IntGauge,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Metrics")
    }
}

const EVENT: &[&str] = &["event"];
const STATUS: &[&str] = &["status"];

impl Metrics {
    pub fn new() -> Metrics {
        let registry = Registry::new();

        let events_opts = Opts::new("events_handled", "the number of events handled, by event name")
            .variable_label("event");
        let events_by_name = IntCounterVec::new(events_opts, EVENT).unwrap();
        registry.register(Box::new(events_by_name.clone())).unwrap();

        let reconcile_opts = Opts::new("reconciles", "the number of reconciliations, by resulting status level")
            .variable_label("status");
        let reconciles_by_status = IntCounterVec::new(reconcile_opts, STATUS).unwrap();
        registry.register(Box::new(reconciles_by_status.clone())).unwrap();

        let deferred_opts = Opts::new("deferred_events", "the number of times an event was deferred for redelivery");
        let deferred_events = IntCounter::with_opts(deferred_opts).unwrap();
        registry.register(Box::new(deferred_events.clone())).unwrap();

        let queue_opts = Opts::new("deferred_queue_length", "the number of events currently waiting to be redelivered");
        let deferred_queue_len = IntGauge::with_opts(queue_opts).unwrap();
        registry.register(Box::new(deferred_queue_len.clone())).unwrap();

        Metrics {
            registry,
            events_by_name,
            reconciles_by_status,
            deferred_events,
            deferred_queue_len,
        }
    }

    pub fn event_handled(&self, event: &Event, outcome: &Outcome) {
        self.events_by_name.with_label_values(&[event.name()]).inc();
        if outcome.is_retry() {
            self.deferred_events.inc();
        }
        if let Some(status) = outcome.status() {
            self.reconciles_by_status.with_label_values(&[status.level()]).inc();
        }
    }

    pub fn set_deferred_count(&self, count: usize) {
        self.deferred_queue_len.set(count as i64);
    }

    #[cfg(test)]
    pub fn deferred_total(&self) -> u64 {
        self.deferred_events.get() as u64
    }

    #[cfg(test)]
    pub fn reconciles_with_status(&self, level: &str) -> u64 {
        self.reconciles_by_status.with_label_values(&[level]).get() as u64
    }

    pub fn encode_as_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::with_capacity(4096);
        encoder.encode(self.registry.gather().as_slice(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handler::Status;

    #[test]
    fn metrics_are_created_successfully() {
        let _metrics = Metrics::new();
    }

    #[test]
    fn outcomes_are_counted_by_status_level() {
        let metrics = Metrics::new();
        metrics.event_handled(&Event::ConfigChanged, &Outcome::Terminal(Status::Active));
        metrics.event_handled(
            &Event::ConfigChanged,
            &Outcome::RetryLater(Some(Status::blocked("Waiting for pg relation(s)"))),
        );
        metrics.event_handled(&Event::PeerRelationChanged, &Outcome::Ignored);

        assert_eq!(1, metrics.reconciles_with_status("active"));
        assert_eq!(1, metrics.reconciles_with_status("blocked"));
        assert_eq!(1, metrics.deferred_total());

        let text = String::from_utf8(metrics.encode_as_text().unwrap()).unwrap();
        assert!(text.contains("events_handled{event=\"config-changed\"} 2"));
    }
}
