//! Call-history handoff.

use callcore::CallHistoryRecord;
use std::sync::{Arc, Mutex};

/// Receives exactly one record per finished session.
pub trait CallHistoryRecorder: Send + Sync {
    fn record(&self, record: CallHistoryRecord);
}

/// Keeps records in memory, newest last.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCallHistory {
    records: Arc<Mutex<Vec<CallHistoryRecord>>>,
}

impl InMemoryCallHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallHistoryRecord> {
        self.records
            .lock()
            .expect("Mutex should not be poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .expect("Mutex should not be poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CallHistoryRecorder for InMemoryCallHistory {
    fn record(&self, record: CallHistoryRecord) {
        self.records
            .lock()
            .expect("Mutex should not be poisoned")
            .push(record);
    }
}
