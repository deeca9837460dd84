//! Per-viewer actor for serialized state mutations.
//!
//! Each viewer gets a dedicated actor task that:
//! - Owns the stage, the loaded component and the error flag
//! - Serializes host operations, context events and load results
//! - Commits a load result only if its request token is still current
//!
//! Loads run in separate tasks (see `load`), so context events and sibling
//! pause/resume requests are handled while a load is waiting on the library.

use std::sync::Arc;

use molstage_render::{
    Component, ContextEvent, HostElement, LoadOptions, RenderingLibrary, Stage, StructureBlob,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::actor_types::{
    CHANNEL_CAPACITY, LoadOutcome, LoadResult, ViewerCommand, ViewerError, ViewerPhase,
    ViewerSettings, ViewerState,
};
use super::listener;
use super::load::LoadJob;
use super::registry::ViewerRegistry;

type LoadReply = oneshot::Sender<Result<LoadOutcome, ViewerError>>;

/// A load task that has not reported back yet.
struct InFlightLoad {
    token: u64,
    cancel: CancellationToken,
    reply: Option<LoadReply>,
}

/// Host element plus the listener registered on it.
struct HostBinding {
    host: HostElement,
    id: u64,
    listener: CancellationToken,
}

// ============================================================================
// Viewer Actor
// ============================================================================

/// Per-viewer actor that owns rendering resources.
pub(crate) struct ViewerActor {
    // Identity
    id: String,

    // Collaborators
    settings: Arc<ViewerSettings>,
    registry: ViewerRegistry,
    library: Option<Arc<dyn RenderingLibrary>>,

    // Rendering resources
    binding: Option<HostBinding>,
    stage: Option<Arc<dyn Stage>>,
    component: Option<Arc<dyn Component>>,

    // Structure data
    content: Option<Arc<str>>,
    extension: Option<String>,

    // State
    error_state: bool,
    phase: ViewerPhase,

    // Load sequencing
    load_token: u64,
    binding_seq: u64,
    in_flight: Option<InFlightLoad>,
    cancel: CancellationToken,

    // Communication
    command_rx: mpsc::Receiver<ViewerCommand>,
    command_tx: mpsc::WeakSender<ViewerCommand>,
    state_tx: watch::Sender<ViewerState>,
}

impl ViewerActor {
    /// Spawn a new viewer actor.
    ///
    /// Returns the command sender and the state receiver.
    pub(crate) fn spawn(
        id: String,
        settings: Arc<ViewerSettings>,
        registry: ViewerRegistry,
    ) -> (mpsc::Sender<ViewerCommand>, watch::Receiver<ViewerState>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ViewerState::new(id.clone()));

        let actor = Self {
            id,
            settings,
            registry,
            library: None,
            binding: None,
            stage: None,
            component: None,
            content: None,
            extension: None,
            error_state: false,
            phase: ViewerPhase::Empty,
            load_token: 0,
            binding_seq: 0,
            in_flight: None,
            cancel: CancellationToken::new(),
            command_rx: rx,
            command_tx: tx.downgrade(),
            state_tx,
        };

        tokio::spawn(actor.run());
        (tx, state_rx)
    }

    /// Main actor loop.
    async fn run(mut self) {
        debug!(viewer_id = %self.id, "Viewer actor started");

        while let Some(command) = self.command_rx.recv().await {
            let stop = matches!(command, ViewerCommand::Dispose { .. });
            self.handle_command(command).await;
            if stop {
                break;
            }
        }

        if self.phase != ViewerPhase::Disposed {
            // All handles dropped without an explicit dispose
            self.dispose();
        }

        debug!(viewer_id = %self.id, "Viewer actor stopped");
    }

    /// Handle a single command.
    async fn handle_command(&mut self, command: ViewerCommand) {
        match command {
            ViewerCommand::SetStage {
                library,
                host,
                reply,
            } => {
                self.set_stage(library, host).await;
                let _ = reply.send(());
            }
            ViewerCommand::SetStructure {
                content,
                extension,
                reply,
            } => {
                self.set_structure(content, extension, reply).await;
            }
            ViewerCommand::Pause { reply } => {
                let result = match &self.stage {
                    Some(stage) => stage.pause().map_err(ViewerError::RenderLoop),
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
            ViewerCommand::Resume { reply } => {
                let result = match &self.stage {
                    Some(stage) => stage.resume().map_err(ViewerError::RenderLoop),
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
            ViewerCommand::Context { binding, event } => {
                self.handle_context_event(binding, event).await;
            }
            ViewerCommand::Backoff { token, attempt } => {
                self.handle_backoff(token, attempt);
            }
            ViewerCommand::LoadFinished {
                token,
                stage,
                result,
            } => {
                self.handle_load_finished(token, stage, result);
            }
            ViewerCommand::Dispose { reply } => {
                self.dispose();
                let _ = reply.send(());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Host Operations
    // ------------------------------------------------------------------------

    async fn set_stage(&mut self, library: Arc<dyn RenderingLibrary>, host: HostElement) {
        self.library = Some(library);

        self.supersede_in_flight();
        self.clean_component();
        let after_error = self.error_state;
        self.bind_host(host);
        self.rebuild_stage(after_error).await;

        self.begin_load(None).await;
    }

    async fn set_structure(&mut self, content: String, extension: String, reply: LoadReply) {
        self.content = Some(content.into());
        self.extension = Some(extension);
        if self.stage.is_some() {
            self.error_state = false;
            if self.phase == ViewerPhase::Error {
                self.phase = ViewerPhase::StageReady;
            }
        }
        self.publish();

        self.begin_load(Some(reply)).await;
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Start loading the current content, superseding any in-flight load.
    async fn begin_load(&mut self, reply: Option<LoadReply>) {
        self.supersede_in_flight();
        self.clean_component();

        if !self.is_data_ready() {
            if self.phase != ViewerPhase::Error {
                self.phase = self.idle_phase();
            }
            self.publish();
            if let Some(reply) = reply {
                let _ = reply.send(Ok(LoadOutcome::NotReady));
            }
            return;
        }

        let (Some(stage), Some(content), Some(extension), Some(tx)) = (
            self.stage.clone(),
            self.content.clone(),
            self.extension.clone(),
            self.command_tx.upgrade(),
        ) else {
            if let Some(reply) = reply {
                let _ = reply.send(Ok(LoadOutcome::NotReady));
            }
            return;
        };

        self.load_token += 1;
        let token = self.load_token;
        let cancel = self.cancel.child_token();

        debug!(viewer_id = %self.id, token, extension = %extension, "Loading structure");

        LoadJob {
            viewer_id: self.id.clone(),
            token,
            stage,
            blob: StructureBlob::text(content),
            options: LoadOptions::for_extension(extension),
            representations: self.settings.representations.clone(),
            policy: self.settings.retry.clone(),
            registry: self.registry.clone(),
            coordination_timeout: self.settings.coordination_timeout,
            cancel: cancel.clone(),
            tx,
        }
        .spawn();

        self.in_flight = Some(InFlightLoad {
            token,
            cancel,
            reply,
        });
        self.phase = ViewerPhase::Loading;
        self.publish();
    }

    /// Dispose the current stage and build a new one on the bound host.
    ///
    /// After an error the build waits `surface_recreate_delay` first. A fresh
    /// stage clears `error_state`; a failed build sets it. Returns true if a
    /// stage was built.
    async fn rebuild_stage(&mut self, after_error: bool) -> bool {
        let (Some(library), Some(host)) = (
            self.library.clone(),
            self.binding.as_ref().map(|b| b.host.clone()),
        ) else {
            return false;
        };

        self.release_stage();
        if after_error {
            info!(viewer_id = %self.id, host_id = %host.id(), "Recreating stage after error state");
            tokio::time::sleep(self.settings.surface_recreate_delay).await;
        }

        let built = match library.create_stage(&host, &self.settings.stage).await {
            Ok(stage) => {
                debug!(viewer_id = %self.id, host_id = %host.id(), "Stage created");
                self.stage = Some(stage);
                self.error_state = false;
                self.phase = ViewerPhase::StageReady;
                true
            }
            Err(e) => {
                warn!(viewer_id = %self.id, host_id = %host.id(), error = %e, "Stage construction failed");
                self.error_state = true;
                self.phase = ViewerPhase::Error;
                false
            }
        };
        self.publish();
        built
    }

    fn handle_backoff(&mut self, token: u64, attempt: u32) {
        if !self.is_current(token) {
            return;
        }
        debug!(viewer_id = %self.id, token, attempt, "Load backing off");
        self.error_state = true;
        self.phase = ViewerPhase::Retrying;
        self.publish();
    }

    fn handle_load_finished(&mut self, token: u64, stage: Arc<dyn Stage>, result: LoadResult) {
        if !self.is_current(token) {
            if let LoadResult::Loaded(component) = result {
                debug!(viewer_id = %self.id, token, "Discarding stale load result");
                stage.remove_component(&component);
            }
            return;
        }

        let Some(in_flight) = self.in_flight.take() else {
            return;
        };

        let reply_value = match result {
            LoadResult::Loaded(component) => {
                let name = component.name();
                self.error_state = false;
                self.component = Some(component);
                self.phase = ViewerPhase::Loaded;
                Ok(LoadOutcome::Loaded { name })
            }
            LoadResult::Failed(e) => {
                self.error_state = matches!(e, ViewerError::RetriesExhausted { .. });
                self.phase = if self.error_state {
                    ViewerPhase::Error
                } else {
                    self.idle_phase()
                };
                if in_flight.reply.is_none() {
                    warn!(viewer_id = %self.id, error = %e, "Background structure load failed");
                }
                Err(e)
            }
            LoadResult::Cancelled => Ok(LoadOutcome::Cancelled),
        };
        self.publish();

        if let Some(reply) = in_flight.reply {
            let _ = reply.send(reply_value);
        }
    }

    /// Cancel the in-flight load, if any, and tell its caller.
    fn supersede_in_flight(&mut self) {
        self.abort_in_flight(Ok(LoadOutcome::Superseded));
    }

    /// Cancel the in-flight load, if any, resolving its caller with `outcome`.
    ///
    /// The load's eventual `LoadFinished` no longer matches a current token.
    fn abort_in_flight(&mut self, outcome: Result<LoadOutcome, ViewerError>) {
        if let Some(in_flight) = self.in_flight.take() {
            debug!(viewer_id = %self.id, token = in_flight.token, "Aborting in-flight load");
            in_flight.cancel.cancel();
            if let Some(reply) = in_flight.reply {
                let _ = reply.send(outcome);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Context Events
    // ------------------------------------------------------------------------

    async fn handle_context_event(&mut self, binding: u64, event: ContextEvent) {
        if self.binding.as_ref().is_none_or(|b| b.id != binding) {
            return;
        }

        match event {
            ContextEvent::Lost(_) => {
                warn!(viewer_id = %self.id, "WebGL context lost");
                self.abort_in_flight(Err(ViewerError::ContextLost));
                self.error_state = true;
                self.clean_component();
                self.phase = ViewerPhase::Error;
                self.publish();
            }
            ContextEvent::Restored => {
                info!(viewer_id = %self.id, "WebGL context restored, reloading");
                if self.stage.is_none() {
                    // The last stage construction failed
                    if !self.rebuild_stage(true).await {
                        return;
                    }
                } else {
                    self.error_state = false;
                    self.phase = self.idle_phase();
                    self.publish();
                }
                self.begin_load(None).await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------------

    fn dispose(&mut self) {
        if self.phase == ViewerPhase::Disposed {
            return;
        }

        self.cancel.cancel();
        self.abort_in_flight(Ok(LoadOutcome::Cancelled));

        self.clean_component();
        self.release_stage();
        if let Some(binding) = self.binding.take() {
            binding.listener.cancel();
        }

        self.phase = ViewerPhase::Disposed;
        self.publish();

        let removed = self.registry.remove(&self.id);
        debug!(viewer_id = %self.id, removed, "Viewer disposed");
    }

    // ------------------------------------------------------------------------
    // Resource Helpers
    // ------------------------------------------------------------------------

    /// Replace the host binding, unregistering the previous listener.
    fn bind_host(&mut self, host: HostElement) {
        if let Some(previous) = self.binding.take() {
            previous.listener.cancel();
        }

        self.binding_seq += 1;
        let listener = self.cancel.child_token();
        listener::listen(
            self.id.clone(),
            &host,
            self.binding_seq,
            self.command_tx.clone(),
            listener.clone(),
        );

        self.binding = Some(HostBinding {
            host,
            id: self.binding_seq,
            listener,
        });
    }

    fn release_stage(&mut self) {
        if let Some(stage) = self.stage.take() {
            debug!(viewer_id = %self.id, "Disposing stage");
            stage.dispose();
        }
    }

    /// Remove the loaded component from the stage.
    fn clean_component(&mut self) {
        if let Some(component) = self.component.take()
            && let Some(stage) = &self.stage
        {
            stage.remove_component(&component);
        }
    }

    fn is_data_ready(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
            && self.extension.as_deref().is_some_and(|e| !e.is_empty())
            && self.stage.is_some()
    }

    fn is_current(&self, token: u64) -> bool {
        self.in_flight.as_ref().is_some_and(|f| f.token == token)
    }

    /// Phase for a viewer with no load running and no loaded component.
    fn idle_phase(&self) -> ViewerPhase {
        if self.stage.is_some() {
            ViewerPhase::StageReady
        } else {
            ViewerPhase::Empty
        }
    }

    /// Publish observable state if it changed.
    fn publish(&self) {
        let next = ViewerState {
            viewer_id: self.id.clone(),
            content: self.content.clone(),
            extension: self.extension.clone(),
            is_error_state: self.error_state,
            phase: self.phase,
            structure_name: self.component.as_ref().and_then(|c| c.name()),
        };
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }
}
