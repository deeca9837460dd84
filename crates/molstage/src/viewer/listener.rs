//! WebGL context listener.
//!
//! One listener task per host binding forwards `webglcontextlost` /
//! `webglcontextrestored` events to the viewer actor. The lost event's
//! default action is suppressed here, before the actor sees it.

use molstage_render::{ContextEvent, HostElement};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::actor_types::ViewerCommand;

/// Register a context listener on `host`.
///
/// The subscription is taken before this returns, so events dispatched after
/// the call are never missed. Cancelling `cancel` unregisters the listener.
pub(crate) fn listen(
    viewer_id: String,
    host: &HostElement,
    binding: u64,
    tx: mpsc::WeakSender<ViewerCommand>,
    cancel: CancellationToken,
) {
    let mut events = host.subscribe();
    let host_id = host.id().to_string();

    tokio::spawn(async move {
        debug!(viewer_id = %viewer_id, host_id = %host_id, binding, "Context listener registered");

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = events.recv() => received,
            };

            let event = match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(viewer_id = %viewer_id, skipped, "Context listener lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if let ContextEvent::Lost(lost) = &event {
                lost.prevent_default();
            }

            let Some(tx) = tx.upgrade() else { break };
            if tx
                .send(ViewerCommand::Context { binding, event })
                .await
                .is_err()
            {
                break;
            }
        }

        debug!(viewer_id = %viewer_id, host_id = %host_id, binding, "Context listener unregistered");
    });
}
