//! # Status board
//!
//! Assembles the aggregate [`StatusDocument`] from the controller state and
//! every status reporter, both those attached through the registry and the
//! core components which aren't sensor clients (the chunk engine and the
//! timestamp authority).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use comms_if::status::StatusDocument;
use log::warn;
use serde_json::{Map, Value};

use crate::app_state::{AppState, AtomicAppState};
use crate::clients::{SensorRegistry, StatusReporting};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Clone)]
pub struct StatusBoard {
    state: Arc<AtomicAppState>,
    registry: Arc<SensorRegistry>,
    core: Vec<Arc<dyn StatusReporting>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusBoard {
    pub fn new(state: Arc<AtomicAppState>, registry: Arc<SensorRegistry>) -> Self {
        Self {
            state,
            registry,
            core: Vec::new(),
        }
    }

    /// Add a reporter which isn't attached through the registry.
    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporting>) -> Self {
        self.core.push(reporter);
        self
    }

    pub fn state(&self) -> AppState {
        self.state.load()
    }

    /// Build the current status document.
    pub fn document(&self) -> StatusDocument {
        let mut doc = StatusDocument::new(self.state().as_str());

        for reporter in self.core.iter().cloned().chain(self.registry.reporters()) {
            if !doc.insert_report(reporter.name(), reporter.status()) {
                warn!("Status reporter uses reserved key \"{}\"", reporter.name());
            }
        }

        let clients: Map<String, Value> = self
            .registry
            .attached()
            .into_iter()
            .map(|(name, caps)| (name, serde_json::to_value(caps).unwrap_or(Value::Null)))
            .collect();
        doc.set_clients(clients);

        doc
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clients::SensorClientHandle;
    use crate::timestamp::TimestampAuthority;
    use serde_json::json;

    struct Named(&'static str);

    impl StatusReporting for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn status(&self) -> Value {
            json!({ "ok": true })
        }
    }

    #[test]
    fn test_document() {
        let authority = Arc::new(TimestampAuthority::new());
        let registry = Arc::new(SensorRegistry::new(authority.clone()));
        registry.attach(SensorClientHandle::new("gpio").reporter(Arc::new(Named("gpio"))));
        registry.attach(SensorClientHandle::new("bad").reporter(Arc::new(Named("state"))));
        registry.attach(SensorClientHandle::new("odd").reporter(Arc::new(Named("clients"))));

        let state = Arc::new(AtomicAppState::new(AppState::Scanning));
        let board = StatusBoard::new(state, registry).with_reporter(authority);

        let doc = board.document().to_json();
        assert_eq!(doc["name"], "ScanRig");
        assert_eq!(doc["state"], "SCANNING");
        assert_eq!(doc["gpio"], json!({ "ok": true }));
        assert!(doc["timestamp"].is_object());
        assert_eq!(doc["clients"]["gpio"]["reporter"], true);
        assert_eq!(doc["clients"]["gpio"]["logger"], false);
        assert_eq!(doc["clients"]["odd"]["reporter"], true);
    }
}
