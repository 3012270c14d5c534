//! Core types for the host platform
//!
//! EntityId, State, Event, Context and ServiceCall, plus the event and state
//! constants every integration relies on.

mod context;
mod entity_id;
mod event;
mod service_call;
mod state;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use service_call::ServiceCall;
pub use state::State;

/// State value of an entity whose integration cannot reach it
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State value of an entity that has not reported yet
pub const STATE_UNKNOWN: &str = "unknown";

/// Service data key naming the targeted entities
pub const ATTR_ENTITY_ID: &str = "entity_id";

/// Standard event types
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for a state write that did not change anything
    pub const STATE_REPORTED: &str = "state_reported";

    /// Event type fired once the host has finished starting
    pub const HOMEASSISTANT_START: &str = "homeassistant_start";

    /// Event type fired when the host begins shutting down
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for STATE_REPORTED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateReportedData {
        pub entity_id: EntityId,
        pub new_state: State,
    }

    impl EventData for StateReportedData {
        fn event_type() -> &'static str {
            STATE_REPORTED
        }
    }
}
