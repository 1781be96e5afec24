//! Shared fixtures for service tests.

use parking_lot::Mutex;

use crate::application::events::AgentEvent;
use crate::application::ports::EventPublisher;

/// Publisher that keeps every event in memory.
#[derive(Default)]
pub struct RecordingPublisher(Mutex<Vec<AgentEvent>>);

impl RecordingPublisher {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.0.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.0.lock().iter().map(AgentEvent::kind).collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: AgentEvent) {
        self.0.lock().push(event);
    }
}
