//! Viewer registry for managing actor lifecycles.
//!
//! The registry is responsible for:
//! - Creating viewer actors
//! - Looking up live viewers
//! - Broadcasting pause/resume to sibling viewers during retry backoff
//! - Disposing every viewer on shutdown

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use molstage_render::LibraryLoader;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::Config;

use super::actor::ViewerActor;
use super::actor_types::{VIEWER_ID_PREFIX, ViewerError, ViewerSettings};
use super::handle::{LibrarySlot, ViewerHandle};

// ============================================================================
// Viewer Registry
// ============================================================================

/// Registry of live viewers.
///
/// Passed explicitly to every viewer it creates; viewers remove themselves
/// on disposal. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct ViewerRegistry {
    /// Viewer handles by ID.
    handles: Arc<DashMap<String, ViewerHandle>>,
    /// Settings applied to every new viewer.
    settings: Arc<ViewerSettings>,
}

/// Direction of a sibling broadcast.
#[derive(Debug, Clone, Copy)]
enum RenderLoop {
    Pause,
    Resume,
}

impl ViewerRegistry {
    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Create a new viewer registry.
    pub fn new(settings: ViewerSettings) -> Self {
        Self {
            handles: Arc::new(DashMap::new()),
            settings: Arc::new(settings),
        }
    }

    /// Create a registry whose viewers use the settings in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(ViewerSettings::from_config(config))
    }

    /// Dispose every registered viewer.
    pub async fn shutdown(&self) {
        info!(count = self.len(), "Shutting down viewer registry");

        let handles: Vec<_> = self
            .handles
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        join_all(handles.iter().map(|handle| handle.dispose())).await;

        info!("Viewer registry shutdown complete");
    }

    // ------------------------------------------------------------------------
    // Core API
    // ------------------------------------------------------------------------

    /// Create a new viewer.
    ///
    /// Spawns the viewer actor and makes it immediately visible in the
    /// registry. The rendering library is imported lazily through `loader`.
    /// Must be called from within a tokio runtime.
    pub fn create(&self, loader: Arc<dyn LibraryLoader>) -> ViewerHandle {
        let id: Arc<str> = format!("{}{}", VIEWER_ID_PREFIX, Ulid::new()).into();

        let (tx, state_rx) = ViewerActor::spawn(id.to_string(), self.settings.clone(), self.clone());
        let handle = ViewerHandle::new(tx, id.clone(), Arc::new(LibrarySlot::new(loader)), state_rx);

        self.handles.insert(id.to_string(), handle.clone());
        debug!(viewer_id = %id, "Viewer registered");

        handle
    }

    /// Get a viewer handle by ID.
    pub fn get(&self, id: &str) -> Option<ViewerHandle> {
        self.handles.get(id).map(|r| r.clone())
    }

    /// Check if a viewer is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    /// IDs of all registered viewers.
    pub fn ids(&self) -> Vec<String> {
        self.handles.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove a viewer handle from the registry.
    ///
    /// Returns true if a viewer was removed. Called by the actor on disposal.
    pub(crate) fn remove(&self, id: &str) -> bool {
        self.handles.remove(id).is_some()
    }

    /// Get the number of registered viewers.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Settings applied to new viewers.
    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    // ------------------------------------------------------------------------
    // Sibling Coordination
    // ------------------------------------------------------------------------

    /// Ask every viewer except `id` to pause its render loop.
    ///
    /// Best effort: failures and timeouts are logged and ignored.
    pub async fn pause_others(&self, id: &str, timeout: Duration) {
        self.broadcast(id, RenderLoop::Pause, timeout).await;
    }

    /// Ask every viewer except `id` to resume its render loop.
    ///
    /// Best effort: failures and timeouts are logged and ignored.
    pub async fn resume_others(&self, id: &str, timeout: Duration) {
        self.broadcast(id, RenderLoop::Resume, timeout).await;
    }

    async fn broadcast(&self, id: &str, action: RenderLoop, timeout: Duration) {
        // Collect handles first to avoid holding DashMap references across await
        let others: Vec<_> = self
            .handles
            .iter()
            .filter(|entry| entry.key() != id)
            .map(|entry| entry.value().clone())
            .collect();

        if others.is_empty() {
            return;
        }

        debug!(viewer_id = %id, siblings = others.len(), ?action, "Broadcasting to siblings");

        join_all(others.into_iter().map(|sibling| async move {
            let request = async {
                match action {
                    RenderLoop::Pause => sibling.pause().await,
                    RenderLoop::Resume => sibling.resume().await,
                }
            };
            match tokio::time::timeout(timeout, request).await {
                Ok(Ok(())) => {}
                Ok(Err(ViewerError::Disposed)) => {
                    debug!(sibling_id = %sibling.id(), ?action, "Sibling already disposed");
                }
                Ok(Err(e)) => {
                    warn!(sibling_id = %sibling.id(), ?action, error = %e, "Sibling render loop request failed");
                }
                Err(_) => {
                    warn!(
                        sibling_id = %sibling.id(),
                        ?action,
                        timeout_ms = timeout.as_millis() as u64,
                        "Sibling render loop request timed out"
                    );
                }
            }
        }))
        .await;
    }
}

impl Default for ViewerRegistry {
    fn default() -> Self {
        Self::new(ViewerSettings::default())
    }
}
