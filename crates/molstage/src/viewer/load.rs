//! Structure load task with retry and sibling coordination.
//!
//! Each `set_structure` (or reload) spawns one `LoadJob`. The job runs
//! attempts until one succeeds, a permanent error occurs, the retry budget is
//! spent, or its cancellation token fires, then reports back to the actor with
//! its request token. The actor decides whether the result is still current.

use std::sync::Arc;
use std::time::Duration;

use molstage_render::{
    Component, LoadOptions, RenderError, RepresentationStyle, Stage, StructureBlob,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::retry::{ErrorClass, RetryPolicy};

use super::actor_types::{LoadResult, ViewerCommand, ViewerError};
use super::registry::ViewerRegistry;

/// One load request, owned by a spawned task.
pub(crate) struct LoadJob {
    pub viewer_id: String,
    pub token: u64,
    pub stage: Arc<dyn Stage>,
    pub blob: StructureBlob,
    pub options: LoadOptions,
    pub representations: Vec<RepresentationStyle>,
    pub policy: RetryPolicy,
    pub registry: ViewerRegistry,
    pub coordination_timeout: Duration,
    pub cancel: CancellationToken,
    pub tx: mpsc::Sender<ViewerCommand>,
}

impl LoadJob {
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(self) {
        let result = self.load_with_retry().await;

        let command = ViewerCommand::LoadFinished {
            token: self.token,
            stage: self.stage.clone(),
            result,
        };
        if self.tx.send(command).await.is_err() {
            debug!(viewer_id = %self.viewer_id, token = self.token, "Viewer gone before load finished");
        }
    }

    async fn load_with_retry(&self) -> LoadResult {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LoadResult::Cancelled,
                outcome = self.attempt() => outcome,
            };

            let error = match outcome {
                Ok(component) => {
                    debug!(viewer_id = %self.viewer_id, token = self.token, attempt, "Structure loaded");
                    return LoadResult::Loaded(component);
                }
                Err(e) => e,
            };

            let class = self.policy.classify(&error);
            if !self.policy.should_retry(class, attempt) {
                return LoadResult::Failed(match class {
                    ErrorClass::Transient => {
                        warn!(
                            viewer_id = %self.viewer_id,
                            attempts = attempt,
                            error = %error,
                            "Transient load failure, retries exhausted"
                        );
                        ViewerError::RetriesExhausted {
                            attempts: attempt,
                            source: error,
                        }
                    }
                    ErrorClass::Permanent => {
                        debug!(viewer_id = %self.viewer_id, error = %error, "Load failed");
                        ViewerError::Load(error)
                    }
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                viewer_id = %self.viewer_id,
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient load failure, retrying"
            );

            if self.backoff(attempt, delay).await {
                return LoadResult::Cancelled;
            }
        }
    }

    /// Signal the backoff to the actor, pause siblings, wait, resume siblings.
    ///
    /// Returns true if the job was cancelled while waiting. Siblings are
    /// resumed either way.
    async fn backoff(&self, attempt: u32, delay: Duration) -> bool {
        let _ = self
            .tx
            .send(ViewerCommand::Backoff {
                token: self.token,
                attempt,
            })
            .await;

        self.registry
            .pause_others(&self.viewer_id, self.coordination_timeout)
            .await;

        let cancelled = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        };

        self.registry
            .resume_others(&self.viewer_id, self.coordination_timeout)
            .await;

        cancelled
    }

    /// One attempt: load, attach representations, fit the camera.
    ///
    /// A component produced by a failed attempt is removed from the stage.
    async fn attempt(&self) -> Result<Arc<dyn Component>, RenderError> {
        let component = self
            .stage
            .load(self.blob.clone(), &self.options)
            .await?
            .ok_or_else(|| RenderError::new(format!("Failed to show file {}", self.options.ext)))?;

        if let Err(e) = self.decorate(&component) {
            self.stage.remove_component(&component);
            return Err(e);
        }

        Ok(component)
    }

    fn decorate(&self, component: &Arc<dyn Component>) -> Result<(), RenderError> {
        for style in &self.representations {
            component.add_representation(style)?;
        }
        component.auto_view();
        Ok(())
    }
}
