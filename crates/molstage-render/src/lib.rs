//! Contract between molstage viewers and the external rendering library.
//!
//! The rendering library (parsing, geometry, drawing) is not part of molstage.
//! This crate describes the surface it must expose so the viewer session
//! manager can drive it:
//!
//! - **LibraryLoader**: lazily imports the library module.
//! - **RenderingLibrary**: builds a [`Stage`] bound to a [`HostElement`].
//! - **Stage**: one rendering surface; loads structures into [`Component`]s.
//! - **Component**: a loaded structure; carries representations and a camera fit.
//!
//! The host view tree owns [`HostElement`]s and delivers WebGL context events
//! (`webglcontextlost` / `webglcontextrestored`) through them.
//!
//! # Example: host side
//!
//! ```ignore
//! use molstage_render::HostElement;
//!
//! let host = HostElement::new("viewer-panel");
//! // ... bind a viewer to `host` ...
//! // The viewer's listener task suppresses the default action once it
//! // receives the event, so check `default_prevented` after it has run.
//! let lost = host.dispatch_context_lost();
//! tokio::task::yield_now().await;
//! assert!(lost.default_prevented());
//! host.dispatch_context_restored();
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

// ============================================================================
// Errors
// ============================================================================

/// Error reported by the rendering library.
///
/// The library only gives us a message; classification (transient vs.
/// permanent) is done by the caller against the message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RenderError {
    message: String,
}

impl RenderError {
    /// Create an error from a library message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The raw library message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

// ============================================================================
// Stage Parameters
// ============================================================================

/// Rendering quality preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

/// Options recognised when constructing a [`Stage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageParameters {
    /// Camera clipping distance. Zero disables clipping.
    #[serde(default)]
    pub clip_dist: f64,
    #[serde(default)]
    pub quality: Quality,
}

impl Default for StageParameters {
    fn default() -> Self {
        Self {
            clip_dist: 0.0,
            quality: Quality::Medium,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Raw structure payload handed to [`Stage::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureBlob {
    pub content: Arc<str>,
    pub mime_type: &'static str,
}

impl StructureBlob {
    /// Wrap structure text as a `text/plain` blob.
    pub fn text(content: Arc<str>) -> Self {
        Self {
            content,
            mime_type: "text/plain",
        }
    }
}

/// Options for [`Stage::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Format tag (file extension) used to pick the parser, e.g. `pdb`, `cif`.
    pub ext: String,
    /// Let the library attach its own default representation.
    pub default_representation: bool,
}

impl LoadOptions {
    pub fn for_extension(ext: impl Into<String>) -> Self {
        Self {
            ext: ext.into(),
            default_representation: true,
        }
    }
}

// ============================================================================
// Representations
// ============================================================================

/// Visual style kinds understood by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepresentationKind {
    BallAndStick,
    UnitCell,
}

impl RepresentationKind {
    /// Library name of the representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BallAndStick => "ball+stick",
            Self::UnitCell => "unitcell",
        }
    }
}

impl fmt::Display for RepresentationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ball-and-stick style parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BallAndStickStyle {
    pub sphere_scale: f64,
    pub bond_scale: f64,
    pub bond_color: String,
    pub aspect_ratio: f64,
}

impl Default for BallAndStickStyle {
    fn default() -> Self {
        Self {
            sphere_scale: 0.7,
            bond_scale: 0.3,
            bond_color: "yellow".to_string(),
            aspect_ratio: 1.5,
        }
    }
}

/// Unit cell outline style parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitCellStyle {
    pub line_width: f64,
    pub color: String,
    pub opacity: f64,
}

impl Default for UnitCellStyle {
    fn default() -> Self {
        Self {
            line_width: 1.0,
            color: "yellow".to_string(),
            opacity: 1.0,
        }
    }
}

/// A representation request: kind plus its style.
#[derive(Debug, Clone, PartialEq)]
pub enum RepresentationStyle {
    BallAndStick(BallAndStickStyle),
    UnitCell(UnitCellStyle),
}

impl RepresentationStyle {
    pub fn kind(&self) -> RepresentationKind {
        match self {
            Self::BallAndStick(_) => RepresentationKind::BallAndStick,
            Self::UnitCell(_) => RepresentationKind::UnitCell,
        }
    }
}

// ============================================================================
// Library Traits
// ============================================================================

/// Imports the rendering library module.
///
/// Called at most once per successful load by each viewer; failed loads may be
/// retried by a later call.
#[async_trait]
pub trait LibraryLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn RenderingLibrary>, RenderError>;
}

/// Entry point of a loaded rendering library.
#[async_trait]
pub trait RenderingLibrary: Send + Sync {
    /// Build a rendering surface bound to `host`.
    async fn create_stage(
        &self,
        host: &HostElement,
        params: &StageParameters,
    ) -> Result<Arc<dyn Stage>, RenderError>;
}

/// A live rendering surface.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Parse `blob` and add the result to the stage.
    ///
    /// `Ok(None)` means the library accepted the call but produced nothing.
    async fn load(
        &self,
        blob: StructureBlob,
        options: &LoadOptions,
    ) -> Result<Option<Arc<dyn Component>>, RenderError>;

    /// Remove a component previously returned by [`Stage::load`].
    fn remove_component(&self, component: &Arc<dyn Component>);

    /// Stop the animation/render loop.
    fn pause(&self) -> Result<(), RenderError>;

    /// Restart the animation/render loop.
    fn resume(&self) -> Result<(), RenderError>;

    /// Release the surface and its GPU resources.
    fn dispose(&self);
}

/// A structure loaded into a stage.
pub trait Component: Send + Sync {
    /// Display name, if the library derived one.
    fn name(&self) -> Option<String>;

    fn add_representation(&self, style: &RepresentationStyle) -> Result<(), RenderError>;

    /// Center and zoom the camera on this component.
    fn auto_view(&self);
}

// ============================================================================
// Host Element & Context Events
// ============================================================================

/// Capacity of a host element's event channel.
const HOST_EVENT_CAPACITY: usize = 16;

/// Native `webglcontextlost` event.
///
/// Listeners call [`ContextLost::prevent_default`] to let the platform try to
/// restore the context. The dispatcher keeps a clone to observe that.
#[derive(Debug, Clone, Default)]
pub struct ContextLost {
    default_prevented: Arc<AtomicBool>,
}

impl ContextLost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::SeqCst);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::SeqCst)
    }
}

/// WebGL context events delivered through a [`HostElement`].
#[derive(Debug, Clone)]
pub enum ContextEvent {
    Lost(ContextLost),
    Restored,
}

/// Display element provided by the host view tree.
///
/// Cheap to clone; clones refer to the same element and share its event
/// channel.
#[derive(Clone)]
pub struct HostElement {
    inner: Arc<HostInner>,
}

struct HostInner {
    id: String,
    events: broadcast::Sender<ContextEvent>,
}

impl HostElement {
    pub fn new(id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(HOST_EVENT_CAPACITY);
        Self {
            inner: Arc::new(HostInner {
                id: id.into(),
                events,
            }),
        }
    }

    /// Element identifier (DOM id or equivalent).
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Register a listener for context events.
    ///
    /// Dropping the receiver unregisters it.
    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.inner.events.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    /// Deliver an event to all listeners. Returns how many received it.
    pub fn dispatch(&self, event: ContextEvent) -> usize {
        self.inner.events.send(event).unwrap_or(0)
    }

    /// Deliver a `webglcontextlost` event and return it for inspection.
    pub fn dispatch_context_lost(&self) -> ContextLost {
        let lost = ContextLost::new();
        self.dispatch(ContextEvent::Lost(lost.clone()));
        lost
    }

    /// Deliver a `webglcontextrestored` event.
    pub fn dispatch_context_restored(&self) -> usize {
        self.dispatch(ContextEvent::Restored)
    }

    /// True if both handles refer to the same element.
    pub fn same_element(&self, other: &HostElement) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for HostElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostElement")
            .field("id", &self.inner.id)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
