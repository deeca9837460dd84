//! Common test utilities: a recording rendering library.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use molstage::{ViewerHandle, ViewerRegistry, ViewerState};
use molstage_render::{
    Component, HostElement, LibraryLoader, LoadOptions, RenderError, RenderingLibrary,
    RepresentationKind, RepresentationStyle, Stage, StageParameters, StructureBlob,
};

pub const PDB: &str = "ATOM      1  N   ALA A   1      11.104   6.134  -6.504  1.00  0.00           N";
pub const TRANSIENT: &str = "WebGL: FRAMEBUFFER_INCOMPLETE_ATTACHMENT";

// ============================================================================
// Mock Library
// ============================================================================

#[derive(Default)]
struct Behavior {
    queued: VecDeque<Result<(), String>>,
    always_fail: Option<String>,
    delays: HashMap<String, Duration>,
    fail_representations: Option<String>,
    return_none: bool,
    fail_stage_creation: bool,
    fail_render_loop: bool,
}

impl Behavior {
    fn next_result(&mut self) -> Result<(), RenderError> {
        if let Some(result) = self.queued.pop_front() {
            return result.map_err(RenderError::new);
        }
        match &self.always_fail {
            Some(message) => Err(RenderError::new(message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct Shared {
    behavior: Mutex<Behavior>,
    stages: Mutex<Vec<Arc<MockStage>>>,
    loads: AtomicUsize,
}

/// Rendering library that records every call.
#[derive(Clone, Default)]
pub struct MockLibrary {
    shared: Arc<Shared>,
}

impl MockLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of the next loads, in order.
    pub fn queue_results(&self, results: impl IntoIterator<Item = Result<(), &'static str>>) {
        let mut behavior = self.shared.behavior.lock().unwrap();
        behavior
            .queued
            .extend(results.into_iter().map(|r| r.map_err(String::from)));
    }

    /// Fail every load not covered by `queue_results`.
    pub fn always_fail(&self, message: &str) {
        self.shared.behavior.lock().unwrap().always_fail = Some(message.to_string());
    }

    /// Delay loads of `content`.
    pub fn delay_content(&self, content: &str, delay: Duration) {
        self.shared
            .behavior
            .lock()
            .unwrap()
            .delays
            .insert(content.to_string(), delay);
    }

    pub fn fail_representations(&self, message: &str) {
        self.shared.behavior.lock().unwrap().fail_representations = Some(message.to_string());
    }

    pub fn return_nothing(&self) {
        self.shared.behavior.lock().unwrap().return_none = true;
    }

    pub fn fail_stage_creation(&self, fail: bool) {
        self.shared.behavior.lock().unwrap().fail_stage_creation = fail;
    }

    /// Make pause/resume on every stage fail.
    pub fn fail_render_loop(&self) {
        self.shared.behavior.lock().unwrap().fail_render_loop = true;
    }

    pub fn load_count(&self) -> usize {
        self.shared.loads.load(Ordering::SeqCst)
    }

    pub fn stages(&self) -> Vec<Arc<MockStage>> {
        self.shared.stages.lock().unwrap().clone()
    }

    pub fn stage_count(&self) -> usize {
        self.shared.stages.lock().unwrap().len()
    }

    pub fn last_stage(&self) -> Arc<MockStage> {
        self.stages().last().cloned().expect("no stage created")
    }

    /// Stages that have not been disposed.
    pub fn live_stages(&self) -> usize {
        self.stages().iter().filter(|s| !s.is_disposed()).count()
    }
}

#[async_trait]
impl RenderingLibrary for MockLibrary {
    async fn create_stage(
        &self,
        host: &HostElement,
        params: &StageParameters,
    ) -> Result<Arc<dyn Stage>, RenderError> {
        if self.shared.behavior.lock().unwrap().fail_stage_creation {
            return Err(RenderError::new("WebGL: Error creating WebGL context."));
        }
        let stage = Arc::new(MockStage {
            host_id: host.id().to_string(),
            params: params.clone(),
            shared: self.shared.clone(),
            disposed: AtomicBool::new(false),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            used_after_dispose: AtomicUsize::new(0),
            components: Mutex::new(Vec::new()),
        });
        self.shared.stages.lock().unwrap().push(stage.clone());
        Ok(stage)
    }
}

// ============================================================================
// Mock Stage
// ============================================================================

pub struct MockStage {
    pub host_id: String,
    pub params: StageParameters,
    shared: Arc<Shared>,
    disposed: AtomicBool,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    removed: AtomicUsize,
    used_after_dispose: AtomicUsize,
    components: Mutex<Vec<Arc<MockComponent>>>,
}

impl MockStage {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    /// Loads that ran to completion on this stage after it was disposed.
    pub fn used_after_dispose(&self) -> usize {
        self.used_after_dispose.load(Ordering::SeqCst)
    }

    pub fn components(&self) -> Vec<Arc<MockComponent>> {
        self.components.lock().unwrap().clone()
    }

    fn render_loop_result(&self) -> Result<(), RenderError> {
        if self.shared.behavior.lock().unwrap().fail_render_loop {
            return Err(RenderError::new("animation loop unavailable"));
        }
        Ok(())
    }

    /// Components loaded into this stage and not removed.
    pub fn attached(&self) -> usize {
        self.components().len() - self.removed()
    }
}

#[async_trait]
impl Stage for MockStage {
    async fn load(
        &self,
        blob: StructureBlob,
        _options: &LoadOptions,
    ) -> Result<Option<Arc<dyn Component>>, RenderError> {
        self.shared.loads.fetch_add(1, Ordering::SeqCst);

        let (delay, result, fail_representations, return_none) = {
            let mut behavior = self.shared.behavior.lock().unwrap();
            (
                behavior.delays.get(&*blob.content).copied(),
                behavior.next_result(),
                behavior.fail_representations.clone(),
                behavior.return_none,
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_disposed() {
            self.used_after_dispose.fetch_add(1, Ordering::SeqCst);
        }
        result?;
        if return_none {
            return Ok(None);
        }

        let component = Arc::new(MockComponent {
            name: blob.content.to_string(),
            representations: Mutex::new(Vec::new()),
            auto_views: AtomicUsize::new(0),
            fail_representations,
        });
        self.components.lock().unwrap().push(component.clone());
        Ok(Some(component))
    }

    fn remove_component(&self, _component: &Arc<dyn Component>) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) -> Result<(), RenderError> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.render_loop_result()
    }

    fn resume(&self) -> Result<(), RenderError> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        self.render_loop_result()
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock Component
// ============================================================================

pub struct MockComponent {
    pub name: String,
    representations: Mutex<Vec<RepresentationKind>>,
    auto_views: AtomicUsize,
    fail_representations: Option<String>,
}

impl MockComponent {
    pub fn representations(&self) -> Vec<RepresentationKind> {
        self.representations.lock().unwrap().clone()
    }

    pub fn auto_views(&self) -> usize {
        self.auto_views.load(Ordering::SeqCst)
    }
}

impl Component for MockComponent {
    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn add_representation(&self, style: &RepresentationStyle) -> Result<(), RenderError> {
        if let Some(message) = &self.fail_representations {
            return Err(RenderError::new(message.clone()));
        }
        self.representations.lock().unwrap().push(style.kind());
        Ok(())
    }

    fn auto_view(&self) {
        self.auto_views.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock Loader
// ============================================================================

/// Library loader that counts imports.
pub struct MockLoader {
    library: MockLibrary,
    imports: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Duration,
}

impl MockLoader {
    pub fn new(library: MockLibrary) -> Arc<Self> {
        Self::with(library, 0, Duration::ZERO)
    }

    pub fn with(library: MockLibrary, failures: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            library,
            imports: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(failures),
            delay,
        })
    }

    pub fn imports(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LibraryLoader for MockLoader {
    async fn load(&self) -> Result<Arc<dyn RenderingLibrary>, RenderError> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RenderError::new("failed to fetch dynamically imported module"));
        }
        Ok(Arc::new(self.library.clone()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Create a viewer with a bound stage.
pub async fn viewer_with_stage(
    registry: &ViewerRegistry,
    library: &MockLibrary,
    host_id: &str,
) -> (ViewerHandle, HostElement) {
    let handle = registry.create(MockLoader::new(library.clone()));
    let host = HostElement::new(host_id);
    handle.set_stage(host.clone()).await.unwrap();
    (handle, host)
}

/// Wait until the viewer's state satisfies `predicate`.
pub async fn wait_for_state(
    handle: &ViewerHandle,
    predicate: impl FnMut(&ViewerState) -> bool,
) -> ViewerState {
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for viewer state")
        .expect("viewer state channel closed")
        .clone()
}

/// Let spawned tasks run without advancing meaningful time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
