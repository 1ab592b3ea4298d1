//! Dispatch table from event type to projection.

use relay_core::projection::Projection;
use relay_core::topic::EventType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Startup errors while assembling the dispatch table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two projections declared the same event type.
    #[error("Event type '{event_type}' is claimed by both '{existing}' and '{incoming}'")]
    Duplicate {
        /// The contested event type
        event_type: EventType,
        /// Projection already registered for it
        existing: String,
        /// Projection that tried to register it again
        incoming: String,
    },
}

/// Explicit `EventType -> Projection` table built once at startup.
///
/// Each projection is registered under every event type it declares.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn Projection>>,
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a set of projections.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if two projections share an event type.
    pub fn from_projections(
        projections: impl IntoIterator<Item = Arc<dyn Projection>>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for projection in projections {
            registry.register(projection)?;
        }
        Ok(registry)
    }

    /// Register `projection` for each of its event types.
    ///
    /// Either every type is registered or, on conflict, none is.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if any declared type is taken.
    pub fn register(&mut self, projection: Arc<dyn Projection>) -> Result<(), RegistryError> {
        let types = projection.event_types();

        for (i, event_type) in types.iter().enumerate() {
            let claimed = self.handlers.get(event_type).map(|p| p.name().to_string()).or_else(
                || {
                    types[..i]
                        .contains(event_type)
                        .then(|| projection.name().to_string())
                },
            );
            if let Some(existing) = claimed {
                return Err(RegistryError::Duplicate {
                    event_type: *event_type,
                    existing,
                    incoming: projection.name().to_string(),
                });
            }
        }

        for event_type in types {
            self.handlers.insert(*event_type, Arc::clone(&projection));
        }
        tracing::debug!(
            projection = projection.name(),
            event_types = types.len(),
            "Projection registered"
        );
        Ok(())
    }

    /// The projection owning `event_type`, if any.
    #[must_use]
    pub fn get(&self, event_type: EventType) -> Option<&Arc<dyn Projection>> {
        self.handlers.get(&event_type)
    }

    /// Number of registered event types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Event types with no registered projection, in declaration order.
    #[must_use]
    pub fn unhandled(&self) -> Vec<EventType> {
        EventType::ALL
            .iter()
            .copied()
            .filter(|t| !self.handlers.contains_key(t))
            .collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<(&str, &str)> = self
            .handlers
            .iter()
            .map(|(t, p)| (t.as_str(), p.name()))
            .collect();
        entries.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &entries)
            .finish()
    }
}
