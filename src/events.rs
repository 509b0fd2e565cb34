//! Core-to-outside event publication.
//!
//! The core only publishes; it never depends on whether anything is
//! listening. Every subsystem that the specification says "broadcasts on an
//! external event bus" — OTA state changes, app state-change callbacks,
//! scheduler preemption — funnels through one [`EventSink`] trait, the same
//! decoupling the rest of the core uses for its collaborator ports.

use crate::appmgr::AppState;
use crate::ota::OtaState;

/// An event the core publishes. The direct callback registered per-component
/// (OTA's progress callback, the app manager's state-change callback) is
/// authoritative for UI; this sink is the non-core broadcast and does not
/// affect engine semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    OtaStateChanged { from: OtaState, to: OtaState },
    OtaProgress { percentage: u8 },
    AppStateChanged { app_id: u16, from: AppState, to: AppState },
    SchedulerPreempted { task: u8 },
}

/// Sink for core-originated events. Adapters implement this to forward onto
/// whatever transport or log the deployment wants; the core never blocks on
/// it and never inspects a return value.
pub trait EventSink {
    fn emit(&mut self, event: CoreEvent);
}

/// An `EventSink` that drops everything. Useful as the default when no
/// subscriber is wired up, and in tests that don't care about notifications.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: CoreEvent) {}
}

/// Collects every event in order; used by tests that assert on the exact
/// sequence of notifications a scenario produces.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<CoreEvent>,
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: CoreEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_order() {
        let mut sink = RecordingSink::default();
        sink.emit(CoreEvent::OtaProgress { percentage: 10 });
        sink.emit(CoreEvent::OtaProgress { percentage: 20 });
        assert_eq!(sink.events.len(), 2);
        assert_eq!(sink.events[0], CoreEvent::OtaProgress { percentage: 10 });
    }
}
