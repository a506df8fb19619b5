//! Bounded, time-ordered checkpoint history per environment

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sandcheck_errors::AssessmentError;
use sandcheck_types::EnvironmentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Checkpoints kept per environment
pub const MAX_CHECKPOINTS: usize = 10;

/// Snapshot taken after a named step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub step_name: String,
    pub timestamp: DateTime<Utc>,
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Ring buffers of checkpoints keyed by environment id
#[derive(Debug)]
pub struct CheckpointStore {
    entries: DashMap<EnvironmentId, VecDeque<Checkpoint>>,
    capacity: usize,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::with_capacity(MAX_CHECKPOINTS)
    }
}

impl CheckpointStore {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a snapshot of `state`, evicting the oldest entry past capacity.
    ///
    /// Timestamps never go backwards within one history even if the wall
    /// clock does.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `state` cannot be serialized.
    pub fn create<S: Serialize + ?Sized>(
        &self,
        environment_id: &EnvironmentId,
        step_name: &str,
        state: &S,
        results: Option<Value>,
        metadata: Option<Value>,
    ) -> Result<(Checkpoint, usize), AssessmentError> {
        let state = serde_json::to_value(state)?;
        let mut history = self.entries.entry(environment_id.clone()).or_default();
        let mut timestamp = Utc::now();
        if let Some(last) = history.back() {
            if last.timestamp > timestamp {
                timestamp = last.timestamp;
            }
        }
        let checkpoint = Checkpoint {
            step_name: step_name.to_string(),
            timestamp,
            state,
            results,
            metadata,
        };
        history.push_back(checkpoint.clone());
        while history.len() > self.capacity {
            history.pop_front();
        }
        Ok((checkpoint, history.len()))
    }

    /// History for `environment_id`, oldest first.
    #[must_use]
    pub fn history(&self, environment_id: &EnvironmentId) -> Vec<Checkpoint> {
        self.entries
            .get(environment_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn latest(&self, environment_id: &EnvironmentId) -> Option<Checkpoint> {
        self.entries
            .get(environment_id)
            .and_then(|h| h.back().cloned())
    }

    pub fn clear(&self, environment_id: &EnvironmentId) {
        self.entries.remove(environment_id);
    }

    #[must_use]
    pub fn environments(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_only_the_most_recent_ten() {
        let store = CheckpointStore::default();
        let id = EnvironmentId::from("env-1");
        for i in 0..15 {
            store
                .create(&id, &format!("step-{i}"), &json!({ "i": i }), None, None)
                .unwrap();
        }
        let history = store.history(&id);
        assert_eq!(history.len(), MAX_CHECKPOINTS);
        assert_eq!(history[0].step_name, "step-5");
        assert_eq!(history[9].step_name, "step-14");
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn snapshots_are_detached_from_the_source() {
        let store = CheckpointStore::default();
        let id = EnvironmentId::from("env-2");
        let mut state = vec!["a".to_string()];
        store.create(&id, "first", &state, None, None).unwrap();
        state.push("b".to_string());
        assert_eq!(store.latest(&id).unwrap().state, json!(["a"]));
    }

    #[test]
    fn clear_drops_history() {
        let store = CheckpointStore::default();
        let id = EnvironmentId::from("env-3");
        store.create(&id, "x", &json!(null), None, None).unwrap();
        store.clear(&id);
        assert!(store.history(&id).is_empty());
        assert_eq!(store.environments(), 0);
    }
}
