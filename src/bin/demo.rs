//! demo - end-to-end synthetic run for the Perception Kernel

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use perception_kernel::detect::{MotionDetector, ProviderRegistry};
use perception_kernel::engines::EngineSet;
use perception_kernel::ingest::SyntheticSensor;
use perception_kernel::orchestrator::PipelineOptions;
use perception_kernel::zones::ObjectType;
use perception_kernel::{
    ChannelSink, EventSink, Orchestrator, Pipeline, Point, SinkMessage, UseCase, Zone, ZoneType,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration of the run in seconds.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Use case to run.
    #[arg(long, default_value = "security")]
    use_case: UseCase,
    /// Synthetic scene name; the same name replays the same scene.
    #[arg(long, default_value = "demo")]
    scene: String,
    /// Output directory for the final annotated frame.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Add a restricted zone over the left third of the frame.
    #[arg(long)]
    zone: bool,
}

#[derive(Default)]
struct Summary {
    by_severity: BTreeMap<String, u64>,
    snapshots: u64,
    telemetry: u64,
    max_tracks: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.seconds == 0 {
        return Err(anyhow!("seconds must be >= 1"));
    }

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let options = PipelineOptions {
        simulation: true,
        announce_targets: true,
        ..PipelineOptions::default()
    };
    let mut providers = ProviderRegistry::new();
    providers.register(MotionDetector::new());

    let (sink, rx) = ChannelSink::new(1024);
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let mut orchestrator = Orchestrator::new(&options, args.use_case, sink)?;
    if args.zone {
        let (w, h) = (options.display.width as f32, options.display.height as f32);
        let zone = Zone::new(
            "zone:demo_restricted",
            "Demo Restricted Area",
            ZoneType::Restricted,
            vec![
                Point::new(0.0, 0.0),
                Point::new(w / 3.0, 0.0),
                Point::new(w / 3.0, h),
                Point::new(0.0, h),
            ],
        )?
        .with_disallowed(vec![ObjectType::Person, ObjectType::Vehicle]);
        orchestrator.add_zone(zone)?;
    }

    let tally = std::thread::spawn(move || {
        let mut summary = Summary::default();
        for message in rx {
            match message {
                SinkMessage::Event(event) => {
                    *summary
                        .by_severity
                        .entry(format!("{:?}", event.severity).to_lowercase())
                        .or_default() += 1;
                }
                SinkMessage::Tracks(tracks) => {
                    summary.snapshots += 1;
                    summary.max_tracks = summary.max_tracks.max(tracks.len());
                }
                SinkMessage::Telemetry(_) => summary.telemetry += 1,
            }
        }
        summary
    });

    let pipeline = Pipeline::new(options, providers, EngineSet::default());
    orchestrator.start(Box::new(SyntheticSensor::new(&args.scene)), pipeline)?;
    println!(
        "running stub://{} for {}s (use case {})",
        args.scene, args.seconds, args.use_case
    );
    std::thread::sleep(Duration::from_secs(args.seconds));
    orchestrator.stop();

    let frame_path = out_dir.join("final.jpg");
    fs::write(&frame_path, orchestrator.latest_frame_jpeg()?)
        .with_context(|| format!("failed to write {}", frame_path.display()))?;

    let recent = orchestrator.recent_events()?;
    let status = orchestrator.engine_status()?;
    drop(orchestrator);
    let summary = tally
        .join()
        .map_err(|_| anyhow!("sink consumer panicked"))?;

    println!("demo complete:");
    println!("  track snapshots: {}", summary.snapshots);
    println!("  telemetry messages: {}", summary.telemetry);
    println!("  peak tracks in a snapshot: {}", summary.max_tracks);
    for (severity, count) in &summary.by_severity {
        println!("  {} events: {}", severity, count);
    }
    for event in recent {
        println!("  [{:?}] {} - {}", event.severity, event.title, event.description);
    }
    println!(
        "  engine status: {}",
        serde_json::to_string(&status)?
    );
    println!("  final frame: {}", frame_path.display());
    Ok(())
}
