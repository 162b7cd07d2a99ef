use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::TilingConfig;
use crate::engines::{
    ConcealmentConfig, CongestionConfig, EngineSet, LoiteringConfig, Tripwire, TripwireConfig,
    UseCase,
};
use crate::frame::Resolution;
use crate::ingest::SourceSpec;
use crate::orchestrator::PipelineOptions;
use crate::zones::Zone;

const DEFAULT_SOURCE: &str = "stub://front_camera";

#[derive(Debug, Deserialize, Default)]
struct PerceptionConfigFile {
    source: Option<String>,
    simulation: Option<bool>,
    use_case: Option<String>,
    detection: Option<DetectionConfigFile>,
    tracking: Option<TrackingConfigFile>,
    timing: Option<TimingConfigFile>,
    display: Option<ResolutionFile>,
    proxy: Option<ResolutionFile>,
    recent_events: Option<usize>,
    announce_targets: Option<bool>,
    zones: Option<Vec<Zone>>,
    tripwires: Option<Vec<Tripwire>>,
    engines: Option<EnginesConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence: Option<f32>,
    model_path: Option<PathBuf>,
    tiling: Option<TilingConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    max_disappeared: Option<u32>,
    max_distance: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    detect_every: Option<u32>,
    frame_budget_ms: Option<u64>,
    snapshot_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResolutionFile {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize, Default)]
struct EnginesConfigFile {
    congestion: Option<CongestionConfig>,
    loitering: Option<LoiteringConfig>,
    concealment: Option<ConcealmentConfig>,
    tripwire: Option<TripwireConfig>,
}

/// Command-line values that win over both the file and the environment.
/// They are applied before validation so derived settings follow them.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub source: Option<String>,
    pub use_case: Option<UseCase>,
}

#[derive(Debug, Clone)]
pub struct PerceptionConfig {
    pub source: String,
    pub use_case: UseCase,
    pub model_path: Option<PathBuf>,
    /// `pipeline.simulation` defaults to whether the source is synthetic.
    pub pipeline: PipelineOptions,
    pub zones: Vec<Zone>,
    pub congestion: CongestionConfig,
    pub loitering: LoiteringConfig,
    pub concealment: ConcealmentConfig,
    pub tripwire: TripwireConfig,
    simulation_explicit: bool,
}

impl PerceptionConfig {
    /// Load from the file named by `PERCEPTION_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PERCEPTION_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit file (JSON, or TOML for `.toml` paths), then apply
    /// environment overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, &ConfigOverrides::default())
    }

    /// Like `load_from`, with command-line overrides applied after the
    /// environment and before validation.
    pub fn load_with(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        if let Some(source) = &overrides.source {
            cfg.source = source.trim().to_string();
        }
        if let Some(use_case) = overrides.use_case {
            cfg.use_case = use_case;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PerceptionConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let use_case = match file.use_case.as_deref() {
            Some(key) => key.parse()?,
            None => UseCase::default(),
        };

        let defaults = PipelineOptions::default();
        let detection = file.detection.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        let pipeline = PipelineOptions {
            simulation: file.simulation.unwrap_or(false),
            confidence: detection.confidence.unwrap_or(defaults.confidence),
            detect_every: timing.detect_every.unwrap_or(defaults.detect_every),
            frame_budget: timing
                .frame_budget_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.frame_budget),
            snapshot_interval: timing
                .snapshot_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.snapshot_interval),
            recent_events: file.recent_events.unwrap_or(defaults.recent_events),
            announce_targets: file.announce_targets.unwrap_or(defaults.announce_targets),
            display: file
                .display
                .map(|r| Resolution::new(r.width, r.height))
                .unwrap_or(defaults.display),
            proxy: file
                .proxy
                .map(|r| Resolution::new(r.width, r.height))
                .unwrap_or(defaults.proxy),
            tiling: detection.tiling.unwrap_or(defaults.tiling),
            max_disappeared: tracking.max_disappeared.unwrap_or(defaults.max_disappeared),
            max_distance: tracking.max_distance.unwrap_or(defaults.max_distance),
        };

        let engines = file.engines.unwrap_or_default();
        let mut tripwire = engines.tripwire.unwrap_or_default();
        if let Some(wires) = file.tripwires {
            tripwire.wires = wires;
        }

        Ok(Self {
            source,
            use_case,
            model_path: detection.model_path,
            pipeline,
            zones: file.zones.unwrap_or_default(),
            congestion: engines.congestion.unwrap_or_default(),
            loitering: engines.loitering.unwrap_or_default(),
            concealment: engines.concealment.unwrap_or_default(),
            tripwire,
            simulation_explicit: file.simulation.is_some(),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("PERCEPTION_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source.trim().to_string();
            }
        }
        if let Ok(use_case) = std::env::var("PERCEPTION_USE_CASE") {
            if !use_case.trim().is_empty() {
                self.use_case = use_case.parse()?;
            }
        }
        if let Ok(simulation) = std::env::var("PERCEPTION_SIMULATION") {
            self.pipeline.simulation = parse_bool("PERCEPTION_SIMULATION", &simulation)?;
            self.simulation_explicit = true;
        }
        if let Ok(confidence) = std::env::var("PERCEPTION_CONFIDENCE") {
            self.pipeline.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("PERCEPTION_CONFIDENCE must be a number in [0,1]"))?;
        }
        if let Ok(tiling) = std::env::var("PERCEPTION_TILING") {
            self.pipeline.tiling.enabled = parse_bool("PERCEPTION_TILING", &tiling)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let spec = SourceSpec::parse(&self.source)?;
        if !self.simulation_explicit {
            self.pipeline.simulation = spec.is_synthetic();
        }

        let p = &self.pipeline;
        for (name, r) in [("display", p.display), ("proxy", p.proxy)] {
            if r.width == 0 || r.height == 0 {
                bail!("{} resolution must be non-zero", name);
            }
        }
        if !(0.0..=1.0).contains(&p.confidence) {
            bail!("confidence must lie in [0,1], got {}", p.confidence);
        }
        if !(0.0..1.0).contains(&p.tiling.overlap) {
            bail!("tile overlap must lie in [0,1), got {}", p.tiling.overlap);
        }
        if p.tiling.tile_size == 0 {
            return Err(anyhow!("tile size must be greater than zero"));
        }
        if p.detect_every == 0 {
            return Err(anyhow!("detect_every must be greater than zero"));
        }
        if p.recent_events == 0 {
            return Err(anyhow!("recent_events must be greater than zero"));
        }
        if p.max_distance.is_nan() || p.max_distance <= 0.0 {
            return Err(anyhow!("max_distance must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for zone in &mut self.zones {
            zone.id = zone.id.to_lowercase();
            zone.validate()?;
            if !seen.insert(zone.id.clone()) {
                bail!("duplicate zone id {}", zone.id);
            }
        }
        for wire in &self.tripwire.wires {
            wire.validate()?;
        }
        Ok(())
    }

    pub fn source_spec(&self) -> Result<SourceSpec> {
        SourceSpec::parse(&self.source)
    }

    pub fn engine_set(&self) -> EngineSet {
        EngineSet::new(
            self.congestion.clone(),
            self.loitering.clone(),
            self.concealment.clone(),
            self.tripwire.clone(),
        )
    }
}

fn read_config_file(path: &Path) -> Result<PerceptionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean (true/false), got {:?}", key, value)),
    }
}
