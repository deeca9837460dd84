//! Integration tests for the viewer registry and disposal.

mod common;

use std::time::Duration;

use molstage::{LoadOutcome, ViewerError, ViewerPhase, ViewerRegistry};

use common::{MockLibrary, MockLoader, PDB, settle, viewer_with_stage, wait_for_state};

// ============================================================================
// Registry Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn create_registers_viewer() {
    let registry = ViewerRegistry::default();
    assert!(registry.is_empty());

    let viewer = registry.create(MockLoader::new(MockLibrary::new()));

    assert!(viewer.id().starts_with("viewer_"));
    assert_eq!(registry.len(), 1);
    assert!(registry.contains(viewer.id()));
    assert_eq!(registry.ids(), vec![viewer.id().to_string()]);
    assert_eq!(registry.get(viewer.id()).unwrap().id(), viewer.id());
    assert!(registry.get("viewer_missing").is_none());
    assert_eq!(viewer.state().phase, ViewerPhase::Empty);
}

#[tokio::test(start_paused = true)]
async fn viewer_ids_are_unique() {
    let registry = ViewerRegistry::default();

    let a = registry.create(MockLoader::new(MockLibrary::new()));
    let b = registry.create(MockLoader::new(MockLibrary::new()));

    assert_ne!(a.id(), b.id());
    assert_eq!(registry.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn pause_others_skips_caller() {
    let registry = ViewerRegistry::default();
    let library_a = MockLibrary::new();
    let library_b = MockLibrary::new();
    let library_c = MockLibrary::new();
    let (a, _) = viewer_with_stage(&registry, &library_a, "a").await;
    let _ = viewer_with_stage(&registry, &library_b, "b").await;
    let _ = viewer_with_stage(&registry, &library_c, "c").await;

    registry.pause_others(a.id(), Duration::from_secs(1)).await;

    assert_eq!(library_a.last_stage().pauses(), 0);
    assert_eq!(library_b.last_stage().pauses(), 1);
    assert_eq!(library_c.last_stage().pauses(), 1);

    registry.resume_others(a.id(), Duration::from_secs(1)).await;

    assert_eq!(library_a.last_stage().resumes(), 0);
    assert_eq!(library_b.last_stage().resumes(), 1);
    assert_eq!(library_c.last_stage().resumes(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_disposes_every_viewer() {
    let registry = ViewerRegistry::default();
    let library = MockLibrary::new();
    let (a, _) = viewer_with_stage(&registry, &library, "a").await;
    let (b, _) = viewer_with_stage(&registry, &library, "b").await;

    registry.shutdown().await;

    assert!(registry.is_empty());
    assert_eq!(library.live_stages(), 0);
    assert_eq!(a.state().phase, ViewerPhase::Disposed);
    assert_eq!(b.state().phase, ViewerPhase::Disposed);
}

// ============================================================================
// Disposal Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn dispose_is_idempotent() {
    let registry = ViewerRegistry::default();
    let library = MockLibrary::new();
    let (viewer, host) = viewer_with_stage(&registry, &library, "panel").await;
    viewer.set_structure(PDB, "pdb").await.unwrap();
    let _other = registry.create(MockLoader::new(MockLibrary::new()));
    assert_eq!(registry.len(), 2);

    viewer.dispose().await;
    assert_eq!(registry.len(), 1);
    assert!(!registry.contains(viewer.id()));

    viewer.dispose().await;
    assert_eq!(registry.len(), 1);
    settle().await;

    let stage = library.last_stage();
    assert!(stage.is_disposed());
    assert_eq!(stage.removed(), 1);
    assert_eq!(host.listener_count(), 0);
    assert!(viewer.is_disposed());

    let state = viewer.state();
    assert_eq!(state.phase, ViewerPhase::Disposed);
    assert!(state.structure_name.is_none());
}

#[tokio::test(start_paused = true)]
async fn dispose_before_setup() {
    let registry = ViewerRegistry::default();
    let viewer = registry.create(MockLoader::new(MockLibrary::new()));

    viewer.dispose().await;

    assert!(registry.is_empty());
    assert_eq!(viewer.state().phase, ViewerPhase::Disposed);
}

#[tokio::test(start_paused = true)]
async fn operations_after_dispose_fail() {
    let registry = ViewerRegistry::default();
    let library = MockLibrary::new();
    let (viewer, host) = viewer_with_stage(&registry, &library, "panel").await;

    viewer.dispose().await;
    settle().await;

    assert_eq!(
        viewer.set_structure(PDB, "pdb").await,
        Err(ViewerError::Disposed)
    );
    assert_eq!(viewer.set_stage(host).await, Err(ViewerError::Disposed));
    assert_eq!(viewer.pause().await, Err(ViewerError::Disposed));
    assert_eq!(library.load_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dispose_during_load_cancels_it() {
    let registry = ViewerRegistry::default();
    let library = MockLibrary::new();
    library.delay_content(PDB, Duration::from_secs(1));
    let (viewer, host) = viewer_with_stage(&registry, &library, "panel").await;

    let pending = {
        let viewer = viewer.clone();
        tokio::spawn(async move { viewer.set_structure(PDB, "pdb").await })
    };
    wait_for_state(&viewer, |s| s.phase == ViewerPhase::Loading).await;

    viewer.dispose().await;

    assert_eq!(pending.await.unwrap(), Ok(LoadOutcome::Cancelled));

    tokio::time::sleep(Duration::from_secs(2)).await;

    let stage = library.last_stage();
    assert!(stage.is_disposed());
    assert_eq!(stage.attached(), 0);
    assert_eq!(library.load_count(), 1);
    assert_eq!(host.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dispose_during_backoff_stops_retrying() {
    let registry = ViewerRegistry::default();
    let library = MockLibrary::new();
    library.always_fail(common::TRANSIENT);
    let (viewer, _host) = viewer_with_stage(&registry, &library, "panel").await;

    let pending = {
        let viewer = viewer.clone();
        tokio::spawn(async move { viewer.set_structure(PDB, "pdb").await })
    };
    wait_for_state(&viewer, |s| s.phase == ViewerPhase::Retrying).await;

    viewer.dispose().await;

    assert_eq!(pending.await.unwrap(), Ok(LoadOutcome::Cancelled));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(library.load_count(), 1);
}
