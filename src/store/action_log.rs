//! Action-Log für Diagnose und deterministisches Replay

use super::engine::{Reducer, StoreError, StoreNamespace};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Eine erfolgreich reduzierte Action mit Zeitstempel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord<A> {
    pub recorded_at: DateTime<Utc>,
    pub action: A,
}

/// Geordnete Liste aller reduzierten Actions eines Stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLog<A> {
    pub store: String,
    records: Vec<ActionRecord<A>>,
}

impl<A> ActionLog<A> {
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, action: A) {
        self.records.push(ActionRecord {
            recorded_at: Utc::now(),
            action,
        });
    }

    pub fn records(&self) -> &[ActionRecord<A>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<A: Serialize> ActionLog<A> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl<A: for<'de> Deserialize<'de>> ActionLog<A> {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl<A> ActionLog<A> {
    /// Spielt das Log gegen die gegebenen Reducer ab
    ///
    /// Ohne Middleware und ohne Seiteneffekte: gleiche Reducer und gleicher
    /// Anfangs-State ergeben denselben End-State.
    pub fn replay<N>(
        &self,
        initial: N::State,
        reducers: &[Arc<dyn Reducer<N>>],
    ) -> Result<N::State, StoreError>
    where
        N: StoreNamespace<Action = A>,
    {
        self.records.iter().try_fold(initial, |state, record| {
            reducers
                .iter()
                .try_fold(state, |current, reducer| reducer.reduce(current, &record.action))
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
