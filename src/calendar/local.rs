//! In-memory calendar backend.
//!
//! Used when the config selects `provider: local` (development without
//! calendar credentials) and throughout the test suite.  Behaves like
//! the remote backend, including idempotent deletes and identity-key
//! lookup.

use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CalendarError, CalendarPort, EventDraft};
use crate::booking::IdentityKey;
use crate::schedule::TimeWindow;

#[derive(Debug, Clone)]
struct StoredEvent {
    window: TimeWindow,
    identity_property: String,
}

/// Calendar held entirely in process memory.
#[derive(Default)]
pub struct LocalCalendar {
    events: Mutex<HashMap<String, StoredEvent>>,
}

impl LocalCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live events (test helper).
    pub async fn event_count(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Stored window for an event id (test helper).
    pub async fn event_window(&self, event_id: &str) -> Option<TimeWindow> {
        self.events.lock().await.get(event_id).map(|e| e.window.clone())
    }
}

#[async_trait::async_trait]
impl CalendarPort for LocalCalendar {
    async fn list_busy(&self, window: &TimeWindow) -> Result<Vec<TimeWindow>, CalendarError> {
        let events = self.events.lock().await;
        let mut busy: Vec<TimeWindow> = events
            .values()
            .filter(|e| e.window.overlaps(window))
            .map(|e| e.window.clone())
            .collect();
        busy.sort_by_key(|w| w.start());
        Ok(busy)
    }

    async fn create_event(&self, draft: &EventDraft) -> Result<String, CalendarError> {
        let id = Uuid::new_v4().to_string();
        self.events.lock().await.insert(
            id.clone(),
            StoredEvent {
                window: draft.window.clone(),
                identity_property: draft.identity.property_value(),
            },
        );
        Ok(id)
    }

    async fn update_event(
        &self,
        event_id: &str,
        window: &TimeWindow,
    ) -> Result<(), CalendarError> {
        let mut events = self.events.lock().await;
        match events.get_mut(event_id) {
            Some(event) => {
                event.window = window.clone();
                Ok(())
            }
            None => Err(CalendarError::Api {
                status: 404,
                body: format!("no such event: {event_id}"),
            }),
        }
    }

    async fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        // Removing an already-absent event is success.
        self.events.lock().await.remove(event_id);
        Ok(())
    }

    async fn find_event(&self, key: &IdentityKey) -> Result<Option<String>, CalendarError> {
        let wanted = key.property_value();
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .find(|(_, e)| e.identity_property == wanted)
            .map(|(id, _)| id.clone()))
    }
}
