use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use gate_core::{GateError, GateResult, JsonStore, MarketSnapshot};

use crate::models::{StructureConfig, StructureKey, StructureState};
use crate::rules;

type StateMap = BTreeMap<String, StructureState>;

/// Outcome of feeding one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureUpdate {
    pub state: StructureState,
    /// False when the snapshot was not newer than the last one seen
    pub applied: bool,
}

/// Per-(symbol, timeframe) market structure, one lock per partition.
pub struct StructureTracker {
    config: StructureConfig,
    states: DashMap<StructureKey, Arc<Mutex<StructureState>>>,
    store: Option<JsonStore<StateMap>>,
    persist_lock: Mutex<()>,
}

impl StructureTracker {
    pub fn new(config: StructureConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
            store: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Tracker persisted to `structure_states.json`.
    pub fn with_store(config: StructureConfig, path: impl Into<PathBuf>) -> Self {
        let tracker = Self {
            config,
            states: DashMap::new(),
            store: Some(JsonStore::new(path)),
            persist_lock: Mutex::new(()),
        };
        tracker.load();
        tracker
    }

    pub fn config(&self) -> &StructureConfig {
        &self.config
    }

    fn load(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let loaded: StateMap = store.load_or_default();
        for (_, state) in loaded {
            self.states
                .insert(state.key(), Arc::new(Mutex::new(state)));
        }
        tracing::info!(
            "Loaded {} structure states from {}",
            self.states.len(),
            store.path().display()
        );
    }

    fn partition(&self, symbol: &str, timeframe: &str) -> Arc<Mutex<StructureState>> {
        self.states
            .entry(StructureKey::new(symbol, timeframe))
            .or_insert_with(|| Arc::new(Mutex::new(StructureState::new(symbol, timeframe))))
            .clone()
    }

    /// Feed one snapshot and return the resulting state. A snapshot that is
    /// not newer than the last one seen for the key leaves the state as is.
    pub fn update(
        &self,
        symbol: &str,
        timeframe: &str,
        snapshot: &MarketSnapshot,
        current_price: f64,
    ) -> GateResult<StructureState> {
        self.apply_snapshot(symbol, timeframe, snapshot, current_price)
            .map(|update| update.state)
    }

    /// Like [`update`](Self::update), also reporting whether the snapshot
    /// advanced the state.
    pub fn apply_snapshot(
        &self,
        symbol: &str,
        timeframe: &str,
        snapshot: &MarketSnapshot,
        current_price: f64,
    ) -> GateResult<StructureUpdate> {
        if !current_price.is_finite() || current_price <= 0.0 {
            return Err(GateError::InputValidation(format!(
                "current price {current_price} must be finite and positive"
            )));
        }

        let partition = self.partition(symbol, timeframe);
        let (result, changed) = {
            let mut state = partition
                .lock()
                .map_err(|_| GateError::poisoned("structure state"))?;
            let changed = rules::apply(&mut state, &self.config, snapshot.candle(), current_price);
            if !changed {
                tracing::debug!(
                    "{}:{} ignoring snapshot at {} (not newer than {:?})",
                    symbol,
                    timeframe,
                    snapshot.timestamp_unix_ms,
                    state.last_timestamp_ms
                );
            }
            (state.clone(), changed)
        };

        if changed && self.store.is_some() {
            if let Err(e) = self.persist() {
                tracing::error!("Failed to persist structure states: {}", e);
            }
        }
        Ok(StructureUpdate {
            state: result,
            applied: changed,
        })
    }

    pub fn snapshot(&self, symbol: &str, timeframe: &str) -> GateResult<Option<StructureState>> {
        let Some(partition) = self
            .states
            .get(&StructureKey::new(symbol, timeframe))
            .map(|e| e.value().clone())
        else {
            return Ok(None);
        };
        let state = partition
            .lock()
            .map_err(|_| GateError::poisoned("structure state"))?;
        Ok(Some(state.clone()))
    }

    /// Tracked keys in sorted order
    pub fn keys(&self) -> Vec<StructureKey> {
        let mut keys: Vec<StructureKey> = self.states.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Drop the state for a key. Returns whether it existed.
    pub fn reset(&self, symbol: &str, timeframe: &str) -> GateResult<bool> {
        let removed = self
            .states
            .remove(&StructureKey::new(symbol, timeframe))
            .is_some();
        if removed {
            tracing::info!("Structure state reset for {}:{}", symbol, timeframe);
            if self.store.is_some() {
                self.persist()?;
            }
        }
        Ok(removed)
    }

    /// Write every partition to the store (no-op without one). Collecting
    /// and saving happen under one lock so an older map never lands last.
    pub fn persist(&self) -> GateResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| GateError::poisoned("structure persist"))?;
        let partitions: Vec<(StructureKey, Arc<Mutex<StructureState>>)> = self
            .states
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut map = StateMap::new();
        for (key, partition) in partitions {
            let state = partition
                .lock()
                .map_err(|_| GateError::poisoned("structure state"))?;
            map.insert(key.to_string(), state.clone());
        }
        store.save(&map)
    }
}
