//! Viewer session management for molstage.
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────────┐        ┌───────────────┐
//!  │ ViewerRegistry  │──owns──▶ ViewerActor   │  (one per viewer, runs in a tokio task)
//!  │  (ID → Handle)  │        │  owns stage,  │
//!  └────────┬────────┘        │  component,   │
//!           │                 │  error flag   │
//!           │ clone           └───▲───────▲───┘
//!           ▼                     │       │ LoadFinished / Backoff
//!  ┌─────────────────┐  commands  │   ┌───┴───────┐
//!  │  ViewerHandle   │────────────┘   │  LoadJob  │  (one per load request, retries
//!  └─────────────────┘                └───────────┘   and pauses siblings via registry)
//! ```
//!
//! - **ViewerActor**: owns the rendering resources and processes commands
//!   sequentially, so a viewer never holds two stages or two components.
//! - **ViewerHandle**: cloneable reference used by the host; also caches the
//!   imported rendering library and exposes observable state.
//! - **ViewerRegistry**: context object that creates viewers and broadcasts
//!   pause/resume to siblings while one of them backs off.
//! - **LoadJob**: a spawned load with its request token and cancellation
//!   token; stale or cancelled results never reach the viewer.

mod actor;
mod actor_types;
mod handle;
mod listener;
mod load;
mod registry;

pub use actor_types::{
    CHANNEL_CAPACITY, LoadOutcome, VIEWER_ID_PREFIX, ViewerError, ViewerPhase, ViewerSettings,
    ViewerState,
};
pub use handle::ViewerHandle;
pub use registry::ViewerRegistry;
