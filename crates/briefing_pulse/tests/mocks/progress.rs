use std::sync::{Arc, Mutex};

use briefing_pulse::progress::{ProgressEvent, ProgressSink, StepStatus};

#[derive(Clone, Default)]
pub struct MockProgress {
    pub events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MockProgress {
    pub fn steps_with(&self, status: StepStatus) -> Vec<u8> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.step)
            .collect()
    }
}

impl ProgressSink for MockProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
