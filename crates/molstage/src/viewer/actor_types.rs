//! Viewer actor types and protocol.
//!
//! This module defines the command protocol for communicating with viewer
//! actors, along with settings, observable state and error types.

use std::sync::Arc;
use std::time::Duration;

use molstage_render::{
    Component, ContextEvent, HostElement, RenderError, RenderingLibrary, RepresentationStyle,
    Stage, StageParameters,
};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::retry::RetryPolicy;

// ============================================================================
// Viewer Command
// ============================================================================

/// Commands that can be sent to a viewer actor.
pub(crate) enum ViewerCommand {
    // Host operations
    SetStage {
        library: Arc<dyn RenderingLibrary>,
        host: HostElement,
        reply: oneshot::Sender<()>,
    },
    SetStructure {
        content: String,
        extension: String,
        reply: oneshot::Sender<Result<LoadOutcome, ViewerError>>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },

    // Sibling coordination
    Pause {
        reply: oneshot::Sender<Result<(), ViewerError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), ViewerError>>,
    },

    // Internal: context listener
    Context {
        binding: u64,
        event: ContextEvent,
    },

    // Internal: load task
    Backoff {
        token: u64,
        attempt: u32,
    },
    LoadFinished {
        token: u64,
        stage: Arc<dyn Stage>,
        result: LoadResult,
    },
}

/// Terminal result of a load task.
pub(crate) enum LoadResult {
    Loaded(Arc<dyn Component>),
    Failed(ViewerError),
    Cancelled,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from viewer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewerError {
    /// The rendering library could not be imported.
    #[error("failed to load rendering library: {0}")]
    Library(#[source] RenderError),

    /// The structure could not be loaded (content or representation problem).
    #[error("failed to load structure: {0}")]
    Load(#[source] RenderError),

    /// Transient failures persisted through every attempt.
    #[error("structure load failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: RenderError,
    },

    /// The WebGL context was lost before the load finished. The structure is
    /// reloaded once the context is restored.
    #[error("WebGL context lost while loading")]
    ContextLost,

    /// Pausing or resuming the render loop failed.
    #[error("render loop control failed: {0}")]
    RenderLoop(#[source] RenderError),

    /// The viewer has been disposed.
    #[error("viewer has been disposed")]
    Disposed,
}

// ============================================================================
// Outcome & State
// ============================================================================

/// How a `set_structure` request ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The structure is displayed.
    Loaded { name: Option<String> },
    /// Content, format or stage missing; nothing was loaded.
    NotReady,
    /// A newer request replaced this one before it finished.
    Superseded,
    /// The viewer was disposed while loading.
    Cancelled,
}

/// Lifecycle phase of a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    Empty,
    StageReady,
    Loading,
    Retrying,
    Loaded,
    Error,
    Disposed,
}

/// Observable snapshot of a viewer, published on every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerState {
    pub viewer_id: String,
    pub content: Option<Arc<str>>,
    pub extension: Option<String>,
    pub is_error_state: bool,
    pub phase: ViewerPhase,
    pub structure_name: Option<String>,
}

impl ViewerState {
    pub(crate) fn new(viewer_id: String) -> Self {
        Self {
            viewer_id,
            content: None,
            extension: None,
            is_error_state: false,
            phase: ViewerPhase::Empty,
            structure_name: None,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Settings shared by every viewer created through a registry.
#[derive(Debug, Clone)]
pub struct ViewerSettings {
    pub stage: StageParameters,
    pub retry: RetryPolicy,
    pub representations: Vec<RepresentationStyle>,
    pub surface_recreate_delay: Duration,
    pub coordination_timeout: Duration,
}

impl ViewerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stage: config.stage.clone(),
            retry: RetryPolicy::from_config(&config.retry),
            representations: config.representations.styles(),
            surface_recreate_delay: Duration::from_millis(
                config.recovery.surface_recreate_delay_ms,
            ),
            coordination_timeout: Duration::from_millis(config.recovery.coordination_timeout_ms),
        }
    }
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Prefix for viewer IDs.
pub const VIEWER_ID_PREFIX: &str = "viewer_";

/// Channel capacity for commands.
pub const CHANNEL_CAPACITY: usize = 64;
