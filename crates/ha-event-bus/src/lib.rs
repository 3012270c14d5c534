//! Event bus with typed pub/sub
//!
//! The EventBus is the message broker between the host and its
//! integrations. Besides raw subscriptions it offers the two helpers climate
//! platforms lean on: tracking state changes of a fixed set of entities and
//! waiting once for a lifecycle event such as `homeassistant_start`.

use dashmap::DashMap;
use ha_core::events::StateChangedData;
use ha_core::{Context, EntityId, Event, EventData, EventType};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type RawEvent = Event<serde_json::Value>;

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Map of event types to their broadcast senders
    listeners: DashMap<EventType, broadcast::Sender<RawEvent>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<RawEvent> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        self.listeners
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to a typed event; payloads that fail to parse are skipped
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Follow `state_changed` events for the given entities only
    pub fn track_state_change(
        &self,
        entity_ids: impl IntoIterator<Item = EntityId>,
    ) -> StateChangeTracker {
        let entity_ids: HashSet<EntityId> = entity_ids.into_iter().collect();
        debug!(entities = ?entity_ids, "Tracking state changes");
        StateChangeTracker {
            rx: self.subscribe_typed::<StateChangedData>(),
            entity_ids,
        }
    }

    /// Resolve with the next event of `event_type`
    ///
    /// The subscription is taken when this is called, not when the returned
    /// future is first polled, so an event fired in between is not missed.
    pub fn listen_once(
        &self,
        event_type: impl Into<EventType>,
    ) -> impl std::future::Future<Output = Option<RawEvent>> + Send + 'static {
        let mut rx = self.subscribe(event_type);
        async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }

    /// Fire an event to all subscribers of its type
    pub fn fire(&self, event: RawEvent) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // No active receivers is not an error
            let _ = sender.send(event);
        }
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context);
        match serde_json::to_value(&event.data) {
            Ok(json) => self.fire(event.map_data(json)),
            Err(e) => warn!(event_type = %event.event_type, error = %e, "Dropping unserializable event"),
        }
    }

    /// Number of event types with at least one subscription taken
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<RawEvent>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    /// Receive the next event whose data parses as `T`
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map_data(data));
            }
        }
    }
}

/// What a [`StateChangeTracker`] yields
#[derive(Debug, Clone)]
pub enum TrackedChange {
    /// A tracked entity changed
    Changed(Event<StateChangedData>),
    /// The receiver fell behind and `missed` events were dropped, some of
    /// which may have been for tracked entities. Re-read their current state.
    Resync { missed: u64 },
}

/// `state_changed` events filtered down to a set of entities
pub struct StateChangeTracker {
    rx: TypedEventReceiver<StateChangedData>,
    entity_ids: HashSet<EntityId>,
}

impl StateChangeTracker {
    /// Next change of a tracked entity, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<TrackedChange> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.entity_ids.contains(&event.data.entity_id) => {
                    return Some(TrackedChange::Changed(event))
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "State change tracker lagged behind");
                    return Some(TrackedChange::Resync { missed });
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
