//! Delivers events to the `Charm` and takes care of what the host scheduler would otherwise do: events that
//! ask to be retried are kept, in order, and redelivered before the next incoming event. An event that is
//! already waiting is not queued a second time.
mod metrics;

#[cfg(feature = "testkit")]
pub mod testkit;

use crate::action::{self, ActionError};
use crate::charm::Charm;
use crate::handler::{Event, Host, Outcome, Status};
use metrics::Metrics;

use std::collections::VecDeque;

#[derive(Debug)]
pub struct Dispatcher {
    charm: Charm,
    deferred: VecDeque<Event>,
    status: Status,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn new(charm: Charm) -> Dispatcher {
        Dispatcher {
            charm,
            deferred: VecDeque::new(),
            status: Status::initial(),
            metrics: Metrics::new(),
        }
    }

    pub fn charm(&self) -> &Charm {
        &self.charm
    }

    /// The last status reported to the host
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Events waiting to be redelivered, oldest first
    pub fn deferred(&self) -> impl Iterator<Item = &Event> {
        self.deferred.iter()
    }

    /// Delivers the given event, after first redelivering every previously deferred event. Returns the outcome
    /// of the given event.
    pub fn dispatch<H: Host + ?Sized>(&mut self, host: &mut H, event: Event) -> Outcome {
        let pending = self.deferred.len();
        if pending > 0 {
            log::debug!("Redelivering {} deferred event(s) before {}", pending, event);
        }
        for _ in 0..pending {
            if let Some(deferred) = self.deferred.pop_front() {
                self.deliver(host, deferred);
            }
        }
        let outcome = self.deliver(host, event);
        self.metrics.set_deferred_count(self.deferred.len());
        outcome
    }

    fn deliver<H: Host + ?Sized>(&mut self, host: &mut H, event: Event) -> Outcome {
        let outcome = self.charm.handle(host, &event);
        self.metrics.event_handled(&event, &outcome);

        if let Some(status) = outcome.status() {
            self.set_status(host, status.clone());
        }
        if outcome.is_retry() {
            if self.deferred.contains(&event) {
                log::debug!("{} event is already deferred", event);
            } else {
                log::info!("Deferring {} event", event);
                self.deferred.push_back(event);
            }
        }
        outcome
    }

    fn set_status<H: Host + ?Sized>(&mut self, host: &mut H, status: Status) {
        if status != self.status {
            log::info!("Status changed from '{}' to '{}'", self.status, status);
        }
        host.set_status(&status);
        self.status = status;
    }

    pub fn run_action<H: Host + ?Sized>(&self, host: &mut H, name: &str) -> Result<String, ActionError> {
        action::run_action(&self.charm, host, name)
    }

    /// Returns the current metrics in the prometheus text exposition format
    pub fn metrics_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.metrics.encode_as_text()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn new_dispatcher_starts_in_maintenance() {
        let dispatcher = Dispatcher::new(Charm::bundled().unwrap());
        assert_eq!(&Status::initial(), dispatcher.status());
        assert_eq!(0, dispatcher.deferred().count());
    }
}
