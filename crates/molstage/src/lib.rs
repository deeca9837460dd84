//! Lifecycle and failure recovery for embedded molecular structure viewers.
//!
//! A viewer binds one rendering surface to a host element, displays one
//! structure at a time, and recovers from WebGL context trouble: transient
//! load failures are retried with backoff while sibling viewers pause, and
//! context loss/restoration is tracked as state the host can observe.
//!
//! # Example
//!
//! ```ignore
//! use molstage::{Config, ViewerRegistry};
//! use molstage_render::HostElement;
//!
//! let config = Config::load("molstage.yaml").await?;
//! molstage::telemetry::init_tracing(&config.log.filter);
//!
//! let registry = ViewerRegistry::from_config(&config);
//! let viewer = registry.create(loader);
//! viewer.set_stage(HostElement::new("structure-panel")).await?;
//! viewer.set_structure(pdb_text, "pdb").await?;
//! ```

pub mod config;
pub mod retry;
pub mod telemetry;
pub mod viewer;

pub use config::{Config, ConfigError};
pub use retry::{ErrorClass, RetryPolicy};
pub use viewer::{
    LoadOutcome, ViewerError, ViewerHandle, ViewerPhase, ViewerRegistry, ViewerSettings,
    ViewerState,
};
