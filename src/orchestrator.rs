//! The per-frame pipeline and the worker thread that drives it.
//!
//! `Pipeline` is the single owner of associator, registry and engine state and
//! runs one cycle per acquired frame. `Orchestrator` moves a pipeline and a
//! sensor onto a dedicated worker thread and exposes the shared surface that
//! request handlers use concurrently: zones, the active use case, the latest
//! annotated frame and the recent-events buffer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;

use crate::detect::{
    Detection, DetectionCapability, DetectionProvider, MotionDetector, ProviderRegistry,
    SharedProvider, TileDetector, TilingConfig,
};
use crate::engines::{run_isolated, EngineSet, FrameContext, Tripwire, UseCase};
use crate::frame::{
    derive_views, LatestFrame, Resolution, DISPLAY_HEIGHT, DISPLAY_WIDTH, PROXY_HEIGHT, PROXY_WIDTH,
};
use crate::ingest::Sensor;
use crate::render::{self, Overlays};
use crate::sink::{EventSink, SinkMessage};
use crate::track::{
    CentroidAssociator, IdentityRegistry, Track, DEFAULT_MAX_DISAPPEARED, DEFAULT_MAX_DISTANCE,
};
use crate::zones::{Zone, ZoneEngine};
use crate::{Event, Severity};

pub const DEFAULT_DETECT_EVERY: u32 = 8;
pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_millis(20);
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_RECENT_EVENTS: usize = 15;
pub const DEFAULT_CONFIDENCE: f32 = 0.3;

const SIMULATION_YIELD: Duration = Duration::from_millis(1);
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOptions {
    /// Simulation mode: detection runs every `detect_every` iterations and the
    /// loop only yields between iterations.
    pub simulation: bool,
    pub confidence: f32,
    pub detect_every: u32,
    pub frame_budget: Duration,
    pub snapshot_interval: Duration,
    pub recent_events: usize,
    pub announce_targets: bool,
    pub display: Resolution,
    pub proxy: Resolution,
    pub tiling: TilingConfig,
    pub max_disappeared: u32,
    pub max_distance: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            simulation: false,
            confidence: DEFAULT_CONFIDENCE,
            detect_every: DEFAULT_DETECT_EVERY,
            frame_budget: DEFAULT_FRAME_BUDGET,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            recent_events: DEFAULT_RECENT_EVENTS,
            announce_targets: false,
            display: Resolution::new(DISPLAY_WIDTH, DISPLAY_HEIGHT),
            proxy: Resolution::new(PROXY_WIDTH, PROXY_HEIGHT),
            tiling: TilingConfig::default(),
            max_disappeared: DEFAULT_MAX_DISAPPEARED,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

/// Everything one cycle produced.
pub struct CycleOutput {
    pub events: Vec<Event>,
    /// Display-resolution frame with overlays.
    pub annotated: RgbImage,
    /// Present when the snapshot interval has elapsed.
    pub snapshot: Option<Vec<Track>>,
    /// Simulation only: one `x y w h` line per reported track.
    pub telemetry: Option<String>,
    pub ran_detection: bool,
    pub active_tracks: usize,
}

// -------------------- Pipeline --------------------

pub struct Pipeline {
    options: PipelineOptions,
    providers: ProviderRegistry,
    fallback: MotionDetector,
    tiler: TileDetector,
    associator: CentroidAssociator,
    registry: IdentityRegistry,
    engines: EngineSet,
    iteration: u64,
    has_results: bool,
    last_snapshot: Option<Instant>,
    use_case: Option<UseCase>,
}

impl Pipeline {
    pub fn new(options: PipelineOptions, providers: ProviderRegistry, engines: EngineSet) -> Self {
        Self {
            tiler: TileDetector::new(options.tiling.clone()),
            associator: CentroidAssociator::new(options.max_disappeared, options.max_distance),
            fallback: MotionDetector::new(),
            registry: IdentityRegistry::new(),
            providers,
            engines,
            options,
            iteration: 0,
            has_results: false,
            last_snapshot: None,
            use_case: None,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn engine_status(&self, use_case: UseCase) -> serde_json::Value {
        self.engines.status(use_case)
    }

    /// Run one cycle on an acquired frame.
    ///
    /// `use_case` must be read once by the caller for the whole cycle. Engines
    /// and zones only run on cycles that ran detection; cached cycles re-render
    /// the registry's current view.
    pub fn run_cycle(
        &mut self,
        frame: &RgbImage,
        now: Instant,
        use_case: UseCase,
        zones: &ZoneEngine,
    ) -> Result<CycleOutput> {
        if self.use_case != Some(use_case) {
            if let Some(previous) = self.use_case {
                log::info!("use case switched {} -> {}", previous, use_case);
                self.engines.reset_all();
            }
            self.tiler
                .set_enabled(self.options.tiling.enabled || use_case.wants_tiling());
            self.use_case = Some(use_case);
        }

        let views = derive_views(frame, self.options.display, self.options.proxy)?;
        let ran_detection = !self.options.simulation
            || !self.has_results
            || self.iteration % u64::from(self.options.detect_every.max(1)) == 0;
        self.iteration += 1;

        let mut events = Vec::new();
        if ran_detection {
            let detections: Vec<Detection> = self
                .detect(&views.proxy, use_case)?
                .into_iter()
                .filter(|d| !use_case.wants_pose() || d.label.eq_ignore_ascii_case("person"))
                .map(|d| d.scale(views.scale_x, views.scale_y))
                .collect();

            let mut tracks = self.associator.update(&detections);
            self.registry.observe(&mut tracks, now);
            if self.options.announce_targets {
                events.extend(self.announcements(&tracks, now));
            }

            let ctx = FrameContext::new(&views.display, now);
            if let Some(engine) = self.engines.get_mut(use_case) {
                match run_isolated(engine, &ctx, &mut tracks) {
                    Ok(engine_events) => events.extend(engine_events),
                    Err(e) => log::error!("behavior engine for {} failed: {:#}", use_case, e),
                }
            }
            events.extend(zones.check(&tracks));

            self.registry.remember(&tracks);
            let removed = self.registry.prune(now);
            if removed > 0 {
                log::debug!("pruned {} stale identities", removed);
            }
            self.has_results = true;
        }

        let tracks = self.registry.snapshot(now);
        let wires: &[Tripwire] = if use_case == UseCase::Perimeter {
            self.engines.tripwires()
        } else {
            &[]
        };
        let overlays = Overlays {
            zones: zones.zones(),
            tripwires: wires,
            forensic: use_case == UseCase::MallCctv,
        };
        let annotated = render::annotate(&views.display, &tracks, &overlays);

        let telemetry = self.options.simulation.then(|| telemetry_lines(&tracks));
        let snapshot_due = self
            .last_snapshot
            .map_or(true, |last| now.saturating_duration_since(last) >= self.options.snapshot_interval);
        let active_tracks = tracks.len();
        let snapshot = if snapshot_due {
            self.last_snapshot = Some(now);
            Some(tracks)
        } else {
            None
        };

        Ok(CycleOutput {
            events,
            annotated,
            snapshot,
            telemetry,
            ran_detection,
            active_tracks,
        })
    }

    fn select_provider(&self, use_case: UseCase) -> Option<SharedProvider> {
        if use_case.wants_pose() {
            match self.providers.provider_for_capability(DetectionCapability::Pose) {
                Ok(provider) => return Some(provider),
                Err(e) => log::debug!("{:#}; using default provider", e),
            }
        }
        self.providers.default_provider()
    }

    /// Primary provider (tiled when enabled), or motion detection for this
    /// cycle when the primary fails.
    fn detect(&mut self, proxy: &RgbImage, use_case: UseCase) -> Result<Vec<Detection>> {
        let confidence = self.options.confidence;
        let primary = match self.select_provider(use_case) {
            Some(provider) => detect_with(&provider, &self.tiler, proxy, confidence),
            None => Err(anyhow!("no detection provider registered")),
        };
        match primary {
            Ok(detections) => Ok(detections),
            Err(e) => {
                log::warn!("detection failed, motion fallback for this cycle: {:#}", e);
                self.fallback
                    .detect(proxy, confidence)
                    .context("motion fallback failed")
            }
        }
    }

    fn announcements(&mut self, tracks: &[Track], now: Instant) -> Vec<Event> {
        let mut events = Vec::new();
        for track in tracks.iter().filter(|t| t.disappeared == 0) {
            if !self.registry.should_announce(track.id, now) {
                continue;
            }
            events.push(
                Event::new(
                    "track",
                    Severity::Info,
                    "Target Acquired",
                    format!(
                        "{} acquired at {:.0}% confidence",
                        track.display_name(),
                        track.avg_confidence * 100.0
                    ),
                )
                .with_track(track.id),
            );
        }
        events
    }
}

fn detect_with(
    provider: &SharedProvider,
    tiler: &TileDetector,
    proxy: &RgbImage,
    confidence: f32,
) -> Result<Vec<Detection>> {
    let mut guard = provider
        .lock()
        .map_err(|_| anyhow!("provider lock poisoned"))?;
    tiler.detect(&mut *guard, proxy, confidence)
}

fn telemetry_lines(tracks: &[Track]) -> String {
    tracks
        .iter()
        .map(|t| {
            format!(
                "{} {} {} {}",
                t.bbox.x1.round() as i64,
                t.bbox.y1.round() as i64,
                t.bbox.width().round() as i64,
                t.bbox.height().round() as i64
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// -------------------- Recent Events --------------------

/// Bounded buffer of the latest events; the oldest are evicted first.
pub struct RecentEvents {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push_all(&self, new_events: &[Event]) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow!("recent events lock poisoned"))?;
        for event in new_events {
            events.push_back(event.clone());
            while events.len() > self.capacity {
                events.pop_front();
            }
        }
        Ok(())
    }

    /// Oldest first.
    pub fn list(&self) -> Result<Vec<Event>> {
        let events = self
            .events
            .lock()
            .map_err(|_| anyhow!("recent events lock poisoned"))?;
        Ok(events.iter().cloned().collect())
    }
}

// -------------------- Orchestrator --------------------

struct SharedState {
    active: AtomicBool,
    latest: LatestFrame,
    /// Copy-on-write: the worker clones the `Arc` and releases the lock before
    /// running a cycle, so zone edits never wait on inference.
    zones: RwLock<Arc<ZoneEngine>>,
    use_case: Mutex<UseCase>,
    recent: RecentEvents,
    engine_status: Mutex<serde_json::Value>,
    sink: Arc<dyn EventSink>,
}

impl SharedState {
    fn use_case(&self) -> Result<UseCase> {
        self.use_case
            .lock()
            .map(|u| *u)
            .map_err(|_| anyhow!("use case lock poisoned"))
    }

    fn zones(&self) -> Result<Arc<ZoneEngine>> {
        self.zones
            .read()
            .map(|zones| Arc::clone(&zones))
            .map_err(|_| anyhow!("zone lock poisoned"))
    }

    fn add_zone(&self, zone: Zone) -> Result<()> {
        let mut zones = self
            .zones
            .write()
            .map_err(|_| anyhow!("zone lock poisoned"))?;
        Arc::make_mut(&mut zones).add_zone(zone)
    }

    fn publish(&self, output: CycleOutput) -> Result<()> {
        self.recent.push_all(&output.events)?;
        for event in output.events {
            self.sink.deliver(SinkMessage::Event(event));
        }
        if let Some(snapshot) = output.snapshot {
            self.sink.deliver(SinkMessage::Tracks(snapshot));
        }
        if let Some(telemetry) = output.telemetry {
            self.sink.deliver(SinkMessage::Telemetry(telemetry));
        }
        let jpeg = render::encode_jpeg(&output.annotated, render::JPEG_QUALITY)?;
        self.latest.store(jpeg)
    }
}

/// Owns the worker thread and the state shared with request handlers.
pub struct Orchestrator {
    shared: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(options: &PipelineOptions, use_case: UseCase, sink: Arc<dyn EventSink>) -> Result<Self> {
        let shared = SharedState {
            active: AtomicBool::new(false),
            latest: LatestFrame::new(options.display)?,
            zones: RwLock::new(Arc::new(ZoneEngine::new())),
            use_case: Mutex::new(use_case),
            recent: RecentEvents::new(options.recent_events),
            engine_status: Mutex::new(serde_json::Value::Null),
            sink,
        };
        Ok(Self {
            shared: Arc::new(shared),
            worker: None,
        })
    }

    /// Move `sensor` and `pipeline` onto a new worker thread.
    pub fn start(&mut self, sensor: Box<dyn Sensor>, pipeline: Pipeline) -> Result<()> {
        if self.worker.is_some() {
            bail!("pipeline is already running");
        }
        self.shared.active.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("perception-worker".into())
            .spawn(move || worker_loop(shared, sensor, pipeline))
            .context("spawn perception worker")?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Clear the active flag and wait for the worker to release its sensor.
    pub fn stop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("perception worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.shared.active.load(Ordering::SeqCst)
    }

    pub fn add_zone(&self, zone: Zone) -> Result<()> {
        self.shared.add_zone(zone)
    }

    pub fn zones(&self) -> Result<Vec<Zone>> {
        Ok(self.shared.zones()?.zones().to_vec())
    }

    /// Takes effect at the start of the worker's next iteration.
    pub fn switch_use_case(&self, use_case: UseCase) -> Result<()> {
        let mut current = self
            .shared
            .use_case
            .lock()
            .map_err(|_| anyhow!("use case lock poisoned"))?;
        if *current != use_case {
            log::info!("use case set to {}", use_case);
            *current = use_case;
        }
        Ok(())
    }

    pub fn use_case(&self) -> Result<UseCase> {
        self.shared.use_case()
    }

    pub fn latest_frame_jpeg(&self) -> Result<Vec<u8>> {
        self.shared.latest.get()
    }

    pub fn recent_events(&self) -> Result<Vec<Event>> {
        self.shared.recent.list()
    }

    /// Status of the active engine as of the last cycle.
    pub fn engine_status(&self) -> Result<serde_json::Value> {
        self.shared
            .engine_status
            .lock()
            .map(|s| s.clone())
            .map_err(|_| anyhow!("engine status lock poisoned"))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerStats {
    frames: u64,
    events: u64,
    read_failures: u64,
    active_tracks: usize,
    last_log: Instant,
}

fn worker_loop(shared: Arc<SharedState>, mut sensor: Box<dyn Sensor>, mut pipeline: Pipeline) {
    let simulation = pipeline.options().simulation;
    let budget = pipeline.options().frame_budget;
    let mut connected = false;
    let mut stats = WorkerStats {
        frames: 0,
        events: 0,
        read_failures: 0,
        active_tracks: 0,
        last_log: Instant::now(),
    };
    log::info!(
        "perception worker started on {} ({})",
        sensor.name(),
        if simulation { "simulation" } else { "live" }
    );

    while shared.active.load(Ordering::SeqCst) {
        let started = Instant::now();

        if !connected {
            match sensor.connect() {
                Ok(()) => connected = true,
                Err(e) => {
                    log::warn!("sensor {} connect failed, retrying: {:#}", sensor.name(), e);
                    std::thread::sleep(READ_RETRY_DELAY);
                    continue;
                }
            }
        }

        let frame = match sensor.read() {
            Ok(frame) => frame,
            Err(e) => {
                stats.read_failures += 1;
                log::warn!("sensor {} read failed, retrying: {:#}", sensor.name(), e);
                sensor.disconnect();
                connected = false;
                std::thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        };

        if let Err(e) = iteration(&shared, &mut pipeline, &frame, &mut stats) {
            log::error!("pipeline cycle failed: {:#}", e);
        }

        if stats.last_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log::info!(
                "pipeline health frames={} tracks={} events={} read_failures={}",
                stats.frames,
                stats.active_tracks,
                stats.events,
                stats.read_failures
            );
            stats.last_log = Instant::now();
        }

        if simulation {
            std::thread::sleep(SIMULATION_YIELD);
        } else if let Some(remaining) = budget.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    sensor.disconnect();
    log::info!("perception worker stopped after {} frames", stats.frames);
}

fn iteration(
    shared: &SharedState,
    pipeline: &mut Pipeline,
    frame: &RgbImage,
    stats: &mut WorkerStats,
) -> Result<()> {
    let use_case = shared.use_case()?;
    let zones = shared.zones()?;
    let output = pipeline.run_cycle(frame, Instant::now(), use_case, &zones)?;
    stats.frames += 1;
    stats.events += output.events.len() as u64;
    stats.active_tracks = output.active_tracks;
    *shared
        .engine_status
        .lock()
        .map_err(|_| anyhow!("engine status lock poisoned"))? = pipeline.engine_status(use_case);
    shared.publish(output)
}
