//! Event type ↔ projection mapping.
//!
//! Each projection declares the event types it understands through
//! [`Projection::event_types`]. The registry keeps both directions of that
//! mapping so the dispatcher can answer "who wants this event?" with a single
//! lookup.

use eventide_core::projection::{Projection, ProjectionError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

struct Registered<E> {
    projection: Arc<dyn Projection<E>>,
    event_types: Vec<&'static str>,
}

struct Inner<E> {
    projections: HashMap<String, Registered<E>>,
    by_event_type: HashMap<&'static str, Vec<String>>,
}

impl<E> Default for Inner<E> {
    fn default() -> Self {
        Self {
            projections: HashMap::new(),
            by_event_type: HashMap::new(),
        }
    }
}

impl<E> Inner<E> {
    fn remove(&mut self, name: &str) -> bool {
        let Some(old) = self.projections.remove(name) else {
            return false;
        };
        for event_type in old.event_types {
            if let Some(names) = self.by_event_type.get_mut(event_type) {
                names.retain(|n| n != name);
                if names.is_empty() {
                    self.by_event_type.remove(event_type);
                }
            }
        }
        true
    }
}

/// Thread-safe projection registry.
///
/// Registering a projection under a name that is already taken replaces the
/// earlier registration and its event types.
pub struct ProjectionRegistry<E> {
    inner: RwLock<Inner<E>>,
}

impl<E> Default for ProjectionRegistry<E> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl<E: 'static> ProjectionRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a projection for the event types it declares.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::InvalidProjection`] if the projection has an
    /// empty name or declares no event types.
    pub fn register(&self, projection: Arc<dyn Projection<E>>) -> Result<(), ProjectionError> {
        let name = projection.name().to_string();
        if name.is_empty() {
            return Err(ProjectionError::InvalidProjection(
                "projection name is empty".to_string(),
            ));
        }
        let mut event_types = projection.event_types();
        event_types.sort_unstable();
        event_types.dedup();
        if event_types.is_empty() {
            tracing::warn!(projection = %name, "Projection declares no event types");
            return Err(ProjectionError::InvalidProjection(format!(
                "projection {name} declares no event types"
            )));
        }

        let mut inner = self.write();
        inner.remove(&name);
        for &event_type in &event_types {
            inner
                .by_event_type
                .entry(event_type)
                .or_default()
                .push(name.clone());
        }
        tracing::info!(
            projection = %name,
            event_types = ?event_types,
            "Registered projection"
        );
        inner.projections.insert(
            name,
            Registered {
                projection,
                event_types,
            },
        );
        Ok(())
    }

    /// Remove a projection. Returns `false` if it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.write().remove(name);
        if removed {
            tracing::info!(projection = %name, "Unregistered projection");
        }
        removed
    }

    /// Look up a projection by name.
    #[must_use]
    pub fn projection(&self, name: &str) -> Option<Arc<dyn Projection<E>>> {
        self.read()
            .projections
            .get(name)
            .map(|r| Arc::clone(&r.projection))
    }

    /// Names of projections interested in `event_type`, in registration order.
    #[must_use]
    pub fn projections_for_event_type(&self, event_type: &str) -> Vec<String> {
        self.read()
            .by_event_type
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Event types a projection is registered for, sorted.
    #[must_use]
    pub fn event_types_for(&self, name: &str) -> Vec<&'static str> {
        self.read()
            .projections
            .get(name)
            .map(|r| r.event_types.clone())
            .unwrap_or_default()
    }

    /// All registered projection names, sorted.
    #[must_use]
    pub fn registered_projections(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().projections.keys().cloned().collect();
        names.sort();
        names
    }

    /// All event types with at least one projection, sorted.
    #[must_use]
    pub fn registered_event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.read().by_event_type.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Number of registered projections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().projections.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registration.
    pub fn clear(&self) {
        *self.write() = Inner::default();
        tracing::info!("Cleared all projection registrations");
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner<E>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner<E>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: 'static> std::fmt::Debug for ProjectionRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionRegistry")
            .field("projections", &self.registered_projections())
            .finish()
    }
}
