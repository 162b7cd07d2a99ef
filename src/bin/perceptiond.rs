//! perceptiond - Perception Kernel daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by PERCEPTION_CONFIG, env overrides)
//! 2. Registers detection providers (ONNX model when built with backend-tract,
//!    motion detection otherwise)
//! 3. Starts the pipeline worker on the configured source
//! 4. Writes every event, track snapshot and telemetry message to stdout as
//!    one JSON line
//! 5. Stops cleanly on Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use perception_kernel::config::ConfigOverrides;
use perception_kernel::detect::{MotionDetector, ProviderRegistry};
use perception_kernel::{
    open_sensor, ChannelSink, EventSink, Orchestrator, PerceptionConfig, Pipeline, UseCase,
};

const SINK_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PERCEPTION_CONFIG")]
    config: Option<PathBuf>,
    /// Override the configured source (stub://name, path, URL, pool:a,b).
    #[arg(long)]
    source: Option<String>,
    /// Override the configured use case.
    #[arg(long)]
    use_case: Option<UseCase>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let overrides = ConfigOverrides {
        source: args.source,
        use_case: args.use_case,
    };
    let cfg = PerceptionConfig::load_with(args.config.as_deref(), &overrides)?;
    let spec = cfg.source_spec()?;

    let providers = build_providers(&cfg)?;
    log::info!("detection providers: {}", providers.list().join(", "));

    let (sink, rx) = ChannelSink::new(SINK_CAPACITY);
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let consumer = std::thread::Builder::new()
        .name("perception-sink".into())
        .spawn(move || {
            let stdout = std::io::stdout();
            for message in rx {
                let line = match serde_json::to_string(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("failed to serialize sink message: {}", e);
                        continue;
                    }
                };
                let mut out = stdout.lock();
                if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                    break;
                }
            }
        })
        .context("spawn sink consumer")?;

    let mut orchestrator = Orchestrator::new(&cfg.pipeline, cfg.use_case, sink)?;
    for zone in cfg.zones.clone() {
        orchestrator.add_zone(zone)?;
    }
    let pipeline = Pipeline::new(cfg.pipeline.clone(), providers, cfg.engine_set());
    orchestrator.start(open_sensor(&spec)?, pipeline)?;

    log::info!(
        "perceptiond running. source={} use_case={} simulation={}",
        cfg.source,
        cfg.use_case,
        cfg.pipeline.simulation
    );

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;
    let _ = stop_rx.recv();

    log::info!("shutting down");
    orchestrator.stop();
    drop(orchestrator);
    if consumer.join().is_err() {
        log::error!("sink consumer panicked");
    }
    Ok(())
}

fn build_providers(cfg: &PerceptionConfig) -> Result<ProviderRegistry> {
    let mut providers = ProviderRegistry::new();
    if let Some(model_path) = &cfg.model_path {
        #[cfg(feature = "backend-tract")]
        {
            let provider = perception_kernel::detect::backends::TractProvider::new(model_path, 640)?;
            providers.register(provider);
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            log::warn!(
                "model {} ignored: built without the backend-tract feature",
                model_path.display()
            );
        }
    }
    providers.register(MotionDetector::new());
    Ok(providers)
}
