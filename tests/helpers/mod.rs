//! Mock collaborators and polling helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine as _;
use pod_publish_engine::models::event::EngineEvent;
use pod_publish_engine::models::job::{Job, JobStatus};
use pod_publish_engine::models::pipeline::ProductType;
use pod_publish_engine::services::collaborators::{
    CollaboratorError, CreatedProduct, GeneratedImage, GenerationStatus, ImageSource,
    PlatformAdapter, PlatformRegistry, ProductListing, PromptIdea, PromptQuery, PromptSource,
};
use pod_publish_engine::services::engine::{Engine, EngineConfig};
use pod_publish_engine::services::orchestrator::{Collaborators, FanOutOrchestrator, OrchestratorConfig};
use pod_publish_engine::services::storage::MemoryAssetStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

/// Theme that makes [`MockPrompts`] fail regardless of its failing flag.
pub const FAILING_THEME: &str = "explode";

/// `data:` URI carrying `bytes`, as returned by the image mocks.
pub fn data_uri(bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Prompt backend returning `count` numbered ideas.
#[derive(Default)]
pub struct MockPrompts {
    calls: AtomicUsize,
    failing: AtomicBool,
    empty: AtomicBool,
}

impl MockPrompts {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_empty(&self, empty: bool) {
        self.empty.store(empty, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PromptSource for MockPrompts {
    async fn generate_prompts(&self, query: &PromptQuery) -> Result<Vec<PromptIdea>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) || query.theme.as_deref() == Some(FAILING_THEME) {
            return Err(CollaboratorError::Other("prompt backend unavailable".to_string()));
        }
        if self.empty.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let theme = query.theme.clone().unwrap_or_else(|| "abstract".to_string());
        Ok((0..query.count)
            .map(|i| PromptIdea {
                prompt_text: format!("{theme} design {i}, {}", Uuid::new_v4()),
                title: format!("{theme} #{i}"),
                tags: vec![theme.clone()],
                description: format!("Design {i} for {theme}"),
            })
            .collect())
    }
}

/// Image backend that encodes the prompt into a `data:` URI.
pub struct MockImages {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_remaining: AtomicUsize,
    stall_remaining: AtomicUsize,
    panic_remaining: AtomicUsize,
    failing: AtomicBool,
    identical: bool,
    delay: Duration,
    gate: Option<Semaphore>,
}

impl Default for MockImages {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            stall_remaining: AtomicUsize::new(0),
            panic_remaining: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            identical: false,
            delay: Duration::ZERO,
            gate: None,
        }
    }
}

impl MockImages {
    /// Every prompt yields the same bytes.
    pub fn identical() -> Self {
        Self {
            identical: true,
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Calls block until [`MockImages::open_gate`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls hang for a minute.
    pub fn stall_next(&self, n: usize) {
        self.stall_remaining.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls panic.
    pub fn panic_next(&self, n: usize) {
        self.panic_remaining.store(n, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_failure(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        Self::take(&self.fail_remaining)
    }
}

#[async_trait]
impl ImageSource for MockImages {
    async fn generate_image(
        &self,
        prompt_text: &str,
        _width: u32,
        _height: u32,
        _steps: u32,
    ) -> Result<GeneratedImage, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.panic_remaining) {
            panic!("image backend client bug");
        }
        if Self::take(&self.stall_remaining) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.take_failure() {
            return Err(CollaboratorError::Other("GPU worker crashed".to_string()));
        }

        let bytes = if self.identical {
            b"the same pixels every time".to_vec()
        } else {
            prompt_text.as_bytes().to_vec()
        };
        Ok(GeneratedImage {
            image_urls: vec![data_uri(&bytes)],
            status: GenerationStatus::Completed,
            error: None,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PlatformMode {
    Ok,
    Failing,
    Panicking,
}

/// Storefront double recording every listing it receives.
pub struct MockPlatform {
    name: String,
    mode: Mutex<PlatformMode>,
    product_types: Option<Vec<ProductType>>,
    publishes: bool,
    calls: AtomicUsize,
    publish_calls: AtomicUsize,
    listings: Mutex<Vec<ProductListing>>,
    gate: Option<Semaphore>,
}

impl MockPlatform {
    fn build(name: &str, mode: PlatformMode) -> Self {
        Self {
            name: name.to_string(),
            mode: Mutex::new(mode),
            product_types: None,
            publishes: false,
            calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            listings: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn ok(name: &str) -> Self {
        Self::build(name, PlatformMode::Ok)
    }

    pub fn failing(name: &str) -> Self {
        Self::build(name, PlatformMode::Failing)
    }

    pub fn panicking(name: &str) -> Self {
        Self::build(name, PlatformMode::Panicking)
    }

    pub fn publishing(mut self) -> Self {
        self.publishes = true;
        self
    }

    /// Listings are recorded, then the call blocks until [`MockPlatform::open_gate`].
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn supporting(mut self, product_types: Vec<ProductType>) -> Self {
        self.product_types = Some(product_types);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        *self.mode.lock().unwrap() = if failing {
            PlatformMode::Failing
        } else {
            PlatformMode::Ok
        };
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn listings(&self) -> Vec<ProductListing> {
        self.listings.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformAdapter for MockPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, product_type: ProductType) -> bool {
        self.product_types
            .as_ref()
            .map_or(true, |types| types.contains(&product_type))
    }

    fn supports_publish(&self) -> bool {
        self.publishes
    }

    async fn create_product(&self, listing: &ProductListing) -> Result<CreatedProduct, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            PlatformMode::Failing => Err(CollaboratorError::Other(format!("{} rejected the listing", self.name))),
            PlatformMode::Panicking => panic!("{} adapter bug", self.name),
            PlatformMode::Ok => {
                self.listings.lock().unwrap().push(listing.clone());
                if let Some(gate) = &self.gate {
                    let _permit = gate.acquire().await;
                }
                Ok(CreatedProduct {
                    platform_product_id: format!("{}-{}", self.name, call),
                    product_url: Some(format!("https://{}.example.com/p/{}", self.name, call)),
                })
            }
        }
    }

    async fn publish(&self, _platform_product_id: &str) -> Result<bool, CollaboratorError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

/// One set of mock collaborators.
pub struct TestStack {
    pub prompts: Arc<MockPrompts>,
    pub images: Arc<MockImages>,
    pub assets: Arc<MemoryAssetStore>,
    pub platforms: Vec<Arc<MockPlatform>>,
}

impl TestStack {
    pub fn new(images: MockImages, platforms: Vec<MockPlatform>) -> Self {
        Self {
            prompts: Arc::new(MockPrompts::default()),
            images: Arc::new(images),
            assets: Arc::new(MemoryAssetStore::new()),
            platforms: platforms.into_iter().map(Arc::new).collect(),
        }
    }

    /// Working image backend and one working storefront named `shop`.
    pub fn simple() -> Self {
        Self::new(MockImages::default(), vec![MockPlatform::ok("shop")])
    }

    pub fn platform(&self, name: &str) -> &MockPlatform {
        self.platforms
            .iter()
            .find(|p| p.name() == name)
            .map(Arc::as_ref)
            .unwrap()
    }

    pub fn collaborators(&self) -> Collaborators {
        let mut registry = PlatformRegistry::new();
        for platform in &self.platforms {
            registry.register(platform.clone());
        }
        Collaborators {
            prompts: self.prompts.clone(),
            images: self.images.clone(),
            assets: self.assets.clone(),
            platforms: registry,
        }
    }

    pub fn orchestrator(&self, config: OrchestratorConfig) -> Arc<FanOutOrchestrator> {
        Arc::new(FanOutOrchestrator::new(config, self.collaborators()))
    }

    /// Engine over this stack, not yet started.
    pub async fn engine(&self, config: EngineConfig) -> Engine {
        self.engine_with(config, OrchestratorConfig::default()).await
    }

    pub async fn engine_with(&self, config: EngineConfig, orchestrator: OrchestratorConfig) -> Engine {
        Engine::new(config, self.orchestrator(orchestrator))
            .await
            .expect("engine construction")
    }
}

/// Poll until the job reaches `status`, panicking after five seconds.
pub async fn wait_for_status(engine: &Engine, job_id: Uuid, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(job) = engine.get_job(job_id) {
            if job.status == status {
                return job;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "job {job_id} never reached {status}; last seen {:?}",
                engine.get_job(job_id).map(|j| j.status)
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `check` holds, panicking after five seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Collect events up to and including the first one matching `last`.
pub async fn events_until<F>(rx: &mut broadcast::Receiver<EngineEvent>, last: F) -> Vec<EngineEvent>
where
    F: Fn(&EngineEvent) -> bool,
{
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = last(&event);
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await
    .expect("timed out waiting for engine events");
    events
}

/// Everything already sent on the event channel.
pub fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Pending jobs are exactly the queued ones; running jobs are exactly the in-flight ones.
pub fn assert_scheduling_consistent(engine: &Engine) {
    let queued = engine.queued_job_ids();
    let running = engine.running_job_ids();
    for job in engine.list_jobs() {
        assert_eq!(
            job.status == JobStatus::Pending,
            queued.contains(&job.id),
            "job {} is {} but queue membership disagrees",
            job.id,
            job.status
        );
        assert_eq!(
            job.status == JobStatus::Running,
            running.contains(&job.id),
            "job {} is {} but running set disagrees",
            job.id,
            job.status
        );
    }
}
