//! State machine for entity states
//!
//! The StateMachine holds the current state of every entity and announces
//! writes on the event bus: `state_changed` when the value or attributes
//! differ, `state_reported` when a write changed nothing. Climate platforms
//! also use it to ask whether an entity has held a state long enough.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::events::{StateChangedData, StateReportedData};
use ha_core::{Context, EntityId, State};
use ha_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace};

/// The state machine tracks all entity states
pub struct StateMachine {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Event bus for firing state events
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            event_bus,
        }
    }

    /// Set the state of an entity
    ///
    /// If neither the value nor the attributes change, only `last_reported`
    /// moves and STATE_REPORTED is fired. Otherwise STATE_CHANGED is fired
    /// with the old and new state.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let state = state.into();
        let key = entity_id.to_string();
        let old_state = self.states.get(&key).map(|s| s.clone());

        if let Some(existing) = old_state.as_ref().filter(|s| s.is_same(&state, &attributes)) {
            let mut reported = existing.clone();
            reported.last_reported = Some(Utc::now());
            self.states.insert(key, reported.clone());

            trace!(state = %reported.state, "State unchanged, reporting");
            self.event_bus.fire_typed(
                StateReportedData {
                    entity_id,
                    new_state: reported.clone(),
                },
                context,
            );
            return reported;
        }

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map(|s| s.state != new_state.state).unwrap_or(true),
            "Setting entity state"
        );

        self.states.insert(key, new_state.clone());

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value, or None if the entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Whether the entity is in `state` and has been since `duration` before `now`
    pub fn state_held_for(
        &self,
        entity_id: &str,
        state: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(current) = self.get(entity_id) else {
            return false;
        };
        if current.state != state {
            return false;
        }
        match chrono::Duration::from_std(duration) {
            Ok(duration) => now - current.last_changed >= duration,
            Err(_) => false,
        }
    }

    /// All entity IDs of a domain, sorted
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        let prefix = format!("{}.", domain);
        let mut ids: Vec<String> = self
            .states
            .iter()
            .filter(|r| r.key().starts_with(&prefix))
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Remove an entity's state
    ///
    /// Fires STATE_CHANGED with the old state and None for new_state.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let old_state = self.states.remove(&entity_id.to_string()).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");
            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::STATE_REPORTED;
    use serde_json::json;

    fn make_test_setup() -> (Arc<EventBus>, StateMachine) {
        let event_bus = Arc::new(EventBus::new());
        let state_machine = StateMachine::new(event_bus.clone());
        (event_bus, state_machine)
    }

    fn heat_pump() -> EntityId {
        EntityId::new("climate", "heat_pump").unwrap()
    }

    #[test]
    fn test_set_and_get_state() {
        let (_, sm) = make_test_setup();
        let attrs = HashMap::from([("temperature".to_string(), json!(21))]);

        let state = sm.set(heat_pump(), "heat", attrs.clone(), Context::new());
        assert_eq!(state.state, "heat");

        let retrieved = sm.get("climate.heat_pump").unwrap();
        assert_eq!(retrieved.attributes, attrs);
        assert!(sm.is_state("climate.heat_pump", "heat"));
        assert!(!sm.is_state("climate.missing", "heat"));
    }

    #[tokio::test]
    async fn test_state_changed_event_fired() {
        let (bus, sm) = make_test_setup();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        sm.set(heat_pump(), "cool", HashMap::new(), Context::new());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.entity_id, heat_pump());
        assert!(event.data.old_state.is_none());
        assert_eq!(event.data.new_state.unwrap().state, "cool");
    }

    #[tokio::test]
    async fn test_identical_write_is_only_reported() {
        let (bus, sm) = make_test_setup();
        let attrs = HashMap::from([("temperature".to_string(), json!(21))]);
        sm.set(heat_pump(), "heat", attrs.clone(), Context::new());

        let mut changed = bus.subscribe(ha_core::events::STATE_CHANGED);
        let mut reported = bus.subscribe(STATE_REPORTED);

        let first = sm.get("climate.heat_pump").unwrap();
        let again = sm.set(heat_pump(), "heat", attrs, Context::new());

        assert_eq!(again.last_updated, first.last_updated);
        assert!(reported.recv().await.is_ok());
        assert!(changed.try_recv().is_err());
    }

    #[test]
    fn test_attribute_change_keeps_last_changed() {
        let (_, sm) = make_test_setup();

        let first = sm.set(heat_pump(), "heat", HashMap::new(), Context::new());
        let second = sm.set(
            heat_pump(),
            "heat",
            HashMap::from([("temperature".to_string(), json!(22))]),
            Context::new(),
        );

        assert_eq!(first.last_changed, second.last_changed);
    }

    #[test]
    fn test_state_held_for() {
        let (_, sm) = make_test_setup();
        let state = sm.set(heat_pump(), "heat", HashMap::new(), Context::new());
        let ten_minutes = Duration::from_secs(600);

        let later = state.last_changed + chrono::Duration::minutes(11);
        assert!(sm.state_held_for("climate.heat_pump", "heat", ten_minutes, later));

        let sooner = state.last_changed + chrono::Duration::minutes(2);
        assert!(!sm.state_held_for("climate.heat_pump", "heat", ten_minutes, sooner));

        assert!(!sm.state_held_for("climate.heat_pump", "cool", ten_minutes, later));
        assert!(!sm.state_held_for("climate.missing", "heat", ten_minutes, later));
    }

    #[test]
    fn test_entity_ids_by_domain() {
        let (_, sm) = make_test_setup();
        sm.set(heat_pump(), "heat", HashMap::new(), Context::new());
        sm.set(
            EntityId::new("climate", "bedroom").unwrap(),
            "off",
            HashMap::new(),
            Context::new(),
        );
        sm.set(
            EntityId::new("sensor", "hallway").unwrap(),
            "20.1",
            HashMap::new(),
            Context::new(),
        );

        assert_eq!(
            sm.entity_ids("climate"),
            vec!["climate.bedroom".to_string(), "climate.heat_pump".to_string()]
        );
        assert_eq!(sm.entity_count(), 3);
    }

    #[tokio::test]
    async fn test_remove_fires_state_changed_without_new_state() {
        let (bus, sm) = make_test_setup();
        sm.set(heat_pump(), "heat", HashMap::new(), Context::new());
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        let removed = sm.remove(&heat_pump(), Context::new());
        assert_eq!(removed.unwrap().state, "heat");
        assert!(sm.get("climate.heat_pump").is_none());

        let event = rx.recv().await.unwrap();
        assert!(event.data.new_state.is_none());
        assert!(sm.remove(&heat_pump(), Context::new()).is_none());
    }
}
