//! Viewer handle for communicating with a viewer actor.
//!
//! `ViewerHandle` wraps the actor's command sender, the shared library slot
//! and a watch receiver for observable state. It is cheap to clone.

use std::sync::Arc;

use molstage_render::{HostElement, LibraryLoader, RenderingLibrary};
use tokio::sync::{OnceCell, mpsc, oneshot, watch};
use tracing::debug;

use super::actor_types::{LoadOutcome, ViewerCommand, ViewerError, ViewerState};

/// Lazily imported rendering library, shared by all clones of a handle.
pub(crate) struct LibrarySlot {
    loader: Arc<dyn LibraryLoader>,
    library: OnceCell<Arc<dyn RenderingLibrary>>,
}

impl LibrarySlot {
    pub(crate) fn new(loader: Arc<dyn LibraryLoader>) -> Self {
        Self {
            loader,
            library: OnceCell::new(),
        }
    }
}

/// Handle for interacting with a viewer actor.
#[derive(Clone)]
pub struct ViewerHandle {
    tx: mpsc::Sender<ViewerCommand>,
    id: Arc<str>,
    library: Arc<LibrarySlot>,
    state_rx: watch::Receiver<ViewerState>,
}

impl ViewerHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<ViewerCommand>,
        id: Arc<str>,
        library: Arc<LibrarySlot>,
        state_rx: watch::Receiver<ViewerState>,
    ) -> Self {
        Self {
            tx,
            id,
            library,
            state_rx,
        }
    }

    /// Get the viewer ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    // ------------------------------------------------------------------------
    // Library
    // ------------------------------------------------------------------------

    /// Import the rendering library.
    ///
    /// Concurrent callers share a single import; a successful import is cached
    /// for the lifetime of the viewer. A failed import is not cached.
    pub async fn init_library(&self) -> Result<Arc<dyn RenderingLibrary>, ViewerError> {
        self.library
            .library
            .get_or_try_init(|| async {
                debug!(viewer_id = %self.id, "Importing rendering library");
                self.library.loader.load().await.map_err(ViewerError::Library)
            })
            .await
            .cloned()
    }

    /// Whether the rendering library has been imported.
    pub fn is_library_loaded(&self) -> bool {
        self.library.library.initialized()
    }

    // ------------------------------------------------------------------------
    // Host Operations
    // ------------------------------------------------------------------------

    /// Bind a new rendering surface to `host`, replacing any existing one.
    ///
    /// Imports the library first if needed; only an import failure or a
    /// disposed viewer is reported as an error. Surface construction failures
    /// show up as `is_error_state` instead.
    pub async fn set_stage(&self, host: HostElement) -> Result<(), ViewerError> {
        let library = self.init_library().await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ViewerCommand::SetStage {
                library,
                host,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ViewerError::Disposed)?;

        reply_rx.await.map_err(|_| ViewerError::Disposed)
    }

    /// Replace the displayed structure and wait for the load to settle.
    pub async fn set_structure(
        &self,
        content: impl Into<String>,
        extension: impl Into<String>,
    ) -> Result<LoadOutcome, ViewerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ViewerCommand::SetStructure {
                content: content.into(),
                extension: extension.into(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| ViewerError::Disposed)?;

        reply_rx.await.map_err(|_| ViewerError::Disposed)?
    }

    /// Display name of the loaded structure, if any.
    pub fn structure_name(&self) -> Option<String> {
        self.state_rx.borrow().structure_name.clone()
    }

    /// Tear the viewer down. Calling this more than once is fine.
    pub async fn dispose(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(ViewerCommand::Dispose { reply: reply_tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = reply_rx.await;
    }

    // ------------------------------------------------------------------------
    // Render Loop
    // ------------------------------------------------------------------------

    /// Pause the viewer's render loop. A viewer without a stage ignores this.
    pub async fn pause(&self) -> Result<(), ViewerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ViewerCommand::Pause { reply: reply_tx })
            .await
            .map_err(|_| ViewerError::Disposed)?;

        reply_rx.await.map_err(|_| ViewerError::Disposed)?
    }

    /// Resume the viewer's render loop. A viewer without a stage ignores this.
    pub async fn resume(&self) -> Result<(), ViewerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ViewerCommand::Resume { reply: reply_tx })
            .await
            .map_err(|_| ViewerError::Disposed)?;

        reply_rx.await.map_err(|_| ViewerError::Disposed)?
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Current observable state.
    pub fn state(&self) -> ViewerState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ViewerState> {
        self.state_rx.clone()
    }

    /// True once the actor has stopped.
    pub fn is_disposed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for ViewerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerHandle")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
