//! Restore state for entities
//!
//! Entities that want their last state back after a restart register here.
//! On shutdown their current states are written to
//! `.storage/core.restore_state`; on the next start the store is loaded
//! before any platform is set up so entities can ask for their last state.
//!
//! JSON format:
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 1,
//!   "key": "core.restore_state",
//!   "data": [{ "state": { ... }, "extra_data": null, "last_seen": "..." }]
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, DashSet};
use ha_core::{EntityId, State};
use ha_state_machine::StateMachine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

/// Storage key of the restore state file
pub const STORAGE_KEY: &str = "core.restore_state";

const STORAGE_VERSION: u32 = 1;
const STORAGE_MINOR_VERSION: u32 = 1;

/// Stored states of entities that are no longer added are dropped after this
const STATE_EXPIRATION_DAYS: i64 = 7;

/// Restore state errors
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported restore state version {found} (expected {expected})")]
    Version { expected: u32, found: u32 },
}

pub type RestoreResult<T> = Result<T, RestoreError>;

/// A persisted state and when its entity was last seen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    pub state: State,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RestoreFile {
    version: u32,
    minor_version: u32,
    key: String,
    data: Vec<StoredState>,
}

/// Last-known states loaded at startup plus the set of entities to persist
pub struct RestoreStateStore {
    /// Path to the restore file; `None` keeps everything in memory
    path: Option<PathBuf>,
    last_states: DashMap<String, StoredState>,
    entities: DashSet<String>,
}

impl RestoreStateStore {
    /// A store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            last_states: DashMap::new(),
            entities: DashSet::new(),
        }
    }

    /// Load `<config_dir>/.storage/core.restore_state`
    ///
    /// A missing file gives an empty store. A file that cannot be read or
    /// parsed is logged and also gives an empty store; it will be overwritten
    /// by the next dump.
    pub async fn load(config_dir: impl AsRef<Path>) -> Self {
        let path = config_dir.as_ref().join(".storage").join(STORAGE_KEY);
        let store = Self {
            path: Some(path.clone()),
            last_states: DashMap::new(),
            entities: DashSet::new(),
        };

        match read_file(&path).await {
            Ok(Some(stored)) => {
                info!(count = stored.len(), "Loaded restore states");
                for entry in stored {
                    store
                        .last_states
                        .insert(entry.state.entity_id.to_string(), entry);
                }
            }
            Ok(None) => debug!(path = %path.display(), "No restore state file"),
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable restore state"),
        }

        store
    }

    /// Seed a last state directly
    pub fn insert_last_state(&self, state: State) {
        self.last_states.insert(
            state.entity_id.to_string(),
            StoredState {
                state,
                extra_data: None,
                last_seen: Utc::now(),
            },
        );
    }

    /// The state an entity had when the store was last dumped
    pub fn last_state(&self, entity_id: &EntityId) -> Option<State> {
        self.last_states
            .get(&entity_id.to_string())
            .map(|s| s.state.clone())
    }

    /// Include this entity in future dumps
    pub fn register_entity(&self, entity_id: &EntityId) {
        self.entities.insert(entity_id.to_string());
    }

    pub fn unregister_entity(&self, entity_id: &EntityId) {
        self.entities.remove(&entity_id.to_string());
    }

    pub fn is_registered(&self, entity_id: &EntityId) -> bool {
        self.entities.contains(&entity_id.to_string())
    }

    /// Snapshot registered entities and write the restore file
    ///
    /// States of entities that are not currently registered are kept until
    /// they expire. Returns the number of states written.
    pub async fn dump(&self, states: &StateMachine) -> RestoreResult<usize> {
        let now = Utc::now();
        let expiry = Duration::days(STATE_EXPIRATION_DAYS);

        for entity_id in self.entities.iter() {
            if let Some(state) = states.get(entity_id.key()) {
                self.last_states.insert(
                    entity_id.key().clone(),
                    StoredState {
                        state,
                        extra_data: None,
                        last_seen: now,
                    },
                );
            }
        }
        self.last_states
            .retain(|id, stored| self.entities.contains(id) || now - stored.last_seen < expiry);

        let mut data: Vec<StoredState> = self.last_states.iter().map(|s| s.clone()).collect();
        data.sort_by(|a, b| a.state.entity_id.cmp(&b.state.entity_id));
        let count = data.len();

        let Some(path) = &self.path else {
            return Ok(count);
        };

        let file = RestoreFile {
            version: STORAGE_VERSION,
            minor_version: STORAGE_MINOR_VERSION,
            key: STORAGE_KEY.to_string(),
            data,
        };
        write_file(path, &file).await?;

        debug!(count, "Dumped restore states");
        Ok(count)
    }
}

async fn read_file(path: &Path) -> RestoreResult<Option<Vec<StoredState>>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let file: RestoreFile = serde_json::from_str(&content)?;
    if file.version != STORAGE_VERSION {
        return Err(RestoreError::Version {
            expected: STORAGE_VERSION,
            found: file.version,
        });
    }
    Ok(Some(file.data))
}

/// Write to a temp file first, then rename over the old one
async fn write_file(path: &Path, file: &RestoreFile) -> RestoreResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }

    let temp_path = path.with_file_name(format!("{}.tmp", STORAGE_KEY));
    fs::write(&temp_path, serde_json::to_string_pretty(file)?).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::Context;
    use ha_event_bus::EventBus;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn thermostat() -> EntityId {
        "climate.generic_thermostat".parse().unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_gives_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = RestoreStateStore::load(dir.path()).await;
        assert!(store.last_state(&thermostat()).is_none());
    }

    #[tokio::test]
    async fn test_dump_and_reload() {
        let dir = TempDir::new().unwrap();
        let states = StateMachine::new(Arc::new(EventBus::new()));
        states.set(
            thermostat(),
            "heat_cool",
            HashMap::from([
                ("target_temp_low".to_string(), json!(19.5)),
                ("target_temp_high".to_string(), json!(24.0)),
            ]),
            Context::new(),
        );
        states.set(
            "sensor.unregistered".parse().unwrap(),
            "1",
            HashMap::new(),
            Context::new(),
        );

        let store = RestoreStateStore::load(dir.path()).await;
        store.register_entity(&thermostat());
        assert_eq!(store.dump(&states).await.unwrap(), 1);

        let reloaded = RestoreStateStore::load(dir.path()).await;
        let state = reloaded.last_state(&thermostat()).unwrap();
        assert_eq!(state.state, "heat_cool");
        assert_eq!(state.numeric_attribute("target_temp_low"), Some(Ok(19.5)));
        assert!(reloaded
            .last_state(&"sensor.unregistered".parse().unwrap())
            .is_none());
    }

    #[tokio::test]
    async fn test_unregistered_states_survive_until_expiry() {
        let dir = TempDir::new().unwrap();
        let states = StateMachine::new(Arc::new(EventBus::new()));
        let store = RestoreStateStore::load(dir.path()).await;

        let fresh: EntityId = "climate.fresh".parse().unwrap();
        let stale: EntityId = "climate.stale".parse().unwrap();
        store.insert_last_state(State::new(fresh.clone(), "cool", HashMap::new(), Context::new()));
        store.last_states.insert(
            stale.to_string(),
            StoredState {
                state: State::new(stale.clone(), "heat", HashMap::new(), Context::new()),
                extra_data: None,
                last_seen: Utc::now() - Duration::days(30),
            },
        );

        assert_eq!(store.dump(&states).await.unwrap(), 1);
        assert!(store.last_state(&fresh).is_some());
        assert!(store.last_state(&stale).is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let storage = dir.path().join(".storage");
        std::fs::create_dir_all(&storage).unwrap();
        std::fs::write(storage.join(STORAGE_KEY), "{ not json").unwrap();

        let store = RestoreStateStore::load(dir.path()).await;
        assert!(store.last_state(&thermostat()).is_none());
    }

    #[tokio::test]
    async fn test_reads_host_written_file() {
        let dir = TempDir::new().unwrap();
        let storage = dir.path().join(".storage");
        std::fs::create_dir_all(&storage).unwrap();
        let file = json!({
            "version": 1,
            "minor_version": 1,
            "key": "core.restore_state",
            "data": [{
                "state": {
                    "entity_id": "climate.generic_thermostat",
                    "state": "cool",
                    "attributes": {"temperature": 23.5},
                    "last_changed": "2024-05-01T10:00:00+00:00",
                    "last_updated": "2024-05-01T10:00:00+00:00",
                    "context": {"id": "01HX0000000000000000000000", "parent_id": null, "user_id": null}
                },
                "extra_data": null,
                "last_seen": "2024-05-01T12:00:00+00:00"
            }]
        });
        std::fs::write(storage.join(STORAGE_KEY), file.to_string()).unwrap();

        let store = RestoreStateStore::load(dir.path()).await;
        let state = store.last_state(&thermostat()).unwrap();
        assert_eq!(state.state, "cool");
        assert_eq!(state.numeric_attribute("temperature"), Some(Ok(23.5)));
    }

    #[tokio::test]
    async fn test_in_memory_dump_writes_nothing() {
        let states = StateMachine::new(Arc::new(EventBus::new()));
        states.set(thermostat(), "off", HashMap::new(), Context::new());

        let store = RestoreStateStore::in_memory();
        store.register_entity(&thermostat());
        assert!(store.is_registered(&thermostat()));
        assert_eq!(store.dump(&states).await.unwrap(), 1);
        assert_eq!(store.last_state(&thermostat()).unwrap().state, "off");

        store.unregister_entity(&thermostat());
        assert!(!store.is_registered(&thermostat()));
    }
}
