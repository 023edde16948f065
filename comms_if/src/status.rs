//! # Status document
//!
//! The aggregate status document served on `/status`. It has two fixed keys,
//! `name` and `state`, then a `clients` map of what each attached client can
//! do, followed by one key per status reporter.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Value of the `name` key of every status document.
pub const STATUS_NAME: &str = "ScanRig";

/// Keys no status reporter may use.
pub const RESERVED_KEYS: [&str; 3] = ["name", "state", CLIENTS_KEY];

/// Key of the attached clients map.
pub const CLIENTS_KEY: &str = "clients";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub name: String,

    /// String form of the controller state, for example `SCANNING`.
    pub state: String,

    /// Reports keyed by the reporter's declared name.
    #[serde(flatten)]
    pub reports: Map<String, Value>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusDocument {
    pub fn new<S: Into<String>>(state: S) -> Self {
        Self {
            name: STATUS_NAME.to_string(),
            state: state.into(),
            reports: Map::new(),
        }
    }

    /// Add a report. A reporter using one of the [`RESERVED_KEYS`] is ignored
    /// and `false` is returned.
    pub fn insert_report<S: Into<String>>(&mut self, key: S, report: Value) -> bool {
        let key = key.into();
        if RESERVED_KEYS.contains(&key.as_str()) {
            return false;
        }
        self.reports.insert(key, report);
        true
    }

    /// Set the attached clients map.
    pub fn set_clients(&mut self, clients: Map<String, Value>) {
        self.reports
            .insert(CLIENTS_KEY.to_string(), Value::Object(clients));
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_keys() {
        let mut doc = StatusDocument::new("IDLE");
        assert!(doc.insert_report("gpio", json!({"leds": {}})));
        assert!(!doc.insert_report("state", json!("BROKEN")));
        assert!(!doc.insert_report("clients", json!("BROKEN")));

        let mut clients = Map::new();
        clients.insert("gpio".to_string(), json!({"reporter": true}));
        doc.set_clients(clients);

        let val = doc.to_json();
        assert_eq!(val["name"], "ScanRig");
        assert_eq!(val["state"], "IDLE");
        assert_eq!(val["gpio"], json!({"leds": {}}));
        assert_eq!(val["clients"]["gpio"]["reporter"], true);

        let back: StatusDocument = serde_json::from_value(val).unwrap();
        assert_eq!(back, doc);
    }
}
