//! In-memory storage backend.
//!
//! No durability: state is lost on process restart. Intended for tests and
//! local development only, per spec.md §4.1.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::types::{format_offset, parse_offset, Event, EventInput};

use super::Storage;

#[derive(Default)]
struct PathLog {
    events: Vec<Event>,
}

/// `map<StreamPath, vector<Event>>` behind one mutex per path, as described
/// in spec.md §4.1's offset-allocation algorithm.
#[derive(Default)]
pub struct MemoryStore {
    paths: Mutex<HashMap<String, PathLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn append(&self, path: &str, input: EventInput) -> Result<Event, StorageError> {
        let mut paths = self.paths.lock();
        let log = paths.entry(path.to_string()).or_default();
        let offset = log.events.len() as u64;
        let event = Event {
            event_type: input.event_type,
            payload: input.payload,
            offset: format_offset(offset),
            created_at: Utc::now(),
            path: path.to_string(),
            version: input.version,
        };
        log.events.push(event.clone());
        Ok(event)
    }

    fn read(
        &self,
        path: &str,
        after: Option<&str>,
        up_to: Option<&str>,
    ) -> Result<Vec<Event>, StorageError> {
        let paths = self.paths.lock();
        let Some(log) = paths.get(path) else {
            return Ok(Vec::new());
        };

        let after_num = after.and_then(parse_offset);
        let up_to_num = up_to.and_then(parse_offset);

        Ok(log
            .events
            .iter()
            .filter(|e| {
                let offset = parse_offset(&e.offset).expect("stored offset is well-formed");
                after_num.map_or(true, |a| offset > a) && up_to_num.map_or(true, |u| offset <= u)
            })
            .cloned()
            .collect())
    }

    fn list_paths(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.paths.lock().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(event_type: &str) -> EventInput {
        EventInput {
            event_type: event_type.to_string(),
            payload: serde_json::json!({}),
            version: 1,
        }
    }

    #[test]
    fn test_append_allocates_dense_offsets() {
        let store = MemoryStore::new();
        let e0 = store.append("a", input("t")).unwrap();
        let e1 = store.append("a", input("t")).unwrap();
        let e2 = store.append("a", input("t")).unwrap();
        assert_eq!(e0.offset, format_offset(0));
        assert_eq!(e1.offset, format_offset(1));
        assert_eq!(e2.offset, format_offset(2));
    }

    #[test]
    fn test_read_from_beginning() {
        let store = MemoryStore::new();
        store.append("a", input("t1")).unwrap();
        store.append("a", input("t2")).unwrap();

        let events = store.read("a", None, None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "t1");
        assert_eq!(events[1].event_type, "t2");
    }

    #[test]
    fn test_read_after_offset_excludes_boundary() {
        let store = MemoryStore::new();
        store.append("a", input("t0")).unwrap();
        store.append("a", input("t1")).unwrap();
        store.append("a", input("t2")).unwrap();

        let events = store.read("a", Some(&format_offset(0)), None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "t1");
    }

    #[test]
    fn test_read_missing_path_is_empty_not_error() {
        let store = MemoryStore::new();
        let events = store.read("nonexistent", None, None).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_isolation_between_paths() {
        let store = MemoryStore::new();
        store.append("a", input("t")).unwrap();
        store.append("b", input("t")).unwrap();

        assert_eq!(store.read("a", None, None).unwrap().len(), 1);
        assert_eq!(store.read("b", None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_list_paths() {
        let store = MemoryStore::new();
        store.append("a", input("t")).unwrap();
        store.append("b", input("t")).unwrap();

        let mut paths = store.list_paths().unwrap();
        paths.sort();
        assert_eq!(paths, vec!["a".to_string(), "b".to_string()]);
    }
}
