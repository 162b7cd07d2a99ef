use std::time::{Duration, Instant};

use image::RgbImage;

use perception_kernel::detect::{BBox, Detection, ProviderRegistry, ScriptedProvider};
use perception_kernel::engines::EngineSet;
use perception_kernel::frame::{PROXY_HEIGHT, PROXY_WIDTH};
use perception_kernel::ingest::{Sensor, SensorPool, SyntheticSensor};
use perception_kernel::orchestrator::PipelineOptions;
use perception_kernel::{Pipeline, Severity, TrackStatus, UseCase, ZoneEngine};

fn pipeline(provider: ScriptedProvider) -> Pipeline {
    let mut providers = ProviderRegistry::new();
    providers.register(provider);
    Pipeline::new(PipelineOptions::default(), providers, EngineSet::default())
}

fn person_at(x: f32, y: f32) -> Detection {
    Detection::new(BBox::new(x - 15.0, y - 50.0, x + 15.0, y + 50.0), "person", 0.9)
}

fn car_at(x: f32, y: f32) -> Detection {
    Detection::new(BBox::new(x - 30.0, y - 20.0, x + 30.0, y + 20.0), "car", 0.8)
}

fn proxy_frame() -> RgbImage {
    RgbImage::new(PROXY_WIDTH, PROXY_HEIGHT)
}

#[test]
fn perimeter_crossing_is_reported_once_per_cooldown() {
    let mut provider = ScriptedProvider::new();
    for y in [300.0, 320.0, 350.0, 370.0, 340.0, 320.0] {
        provider.push(vec![person_at(415.0, y)]);
    }
    let mut pipeline = pipeline(provider);
    let zones = ZoneEngine::new();
    let t0 = Instant::now();

    let mut breaches = Vec::new();
    for step in 0..6u64 {
        let out = pipeline
            .run_cycle(&proxy_frame(), t0 + Duration::from_millis(step * 100), UseCase::Perimeter, &zones)
            .unwrap();
        for event in out.events {
            if event.title == "Perimeter Breach Detected" {
                breaches.push((step, event));
            }
        }
    }

    assert_eq!(breaches.len(), 1);
    let (step, event) = &breaches[0];
    assert_eq!(*step, 2);
    assert_eq!(event.severity, Severity::Critical);
    assert_eq!(event.description, "Person crossed driveway_1.");
}

#[test]
fn congestion_warns_once_per_window() {
    let cars: Vec<Detection> = (0..5).map(|i| car_at(100.0 + i as f32 * 120.0, 240.0)).collect();
    let mut pipeline = pipeline(ScriptedProvider::new().then(cars));
    let zones = ZoneEngine::new();
    let t0 = Instant::now();

    let mut warnings = Vec::new();
    for second in 0..=22u64 {
        let out = pipeline
            .run_cycle(&proxy_frame(), t0 + Duration::from_secs(second), UseCase::Traffic, &zones)
            .unwrap();
        if out.events.iter().any(|e| e.title == "Traffic Congestion") {
            warnings.push(second);
        }
    }
    assert_eq!(warnings, vec![11, 22]);
}

#[test]
fn identities_persist_and_lock() {
    let provider = ScriptedProvider::new().then(vec![person_at(200.0, 240.0), person_at(600.0, 240.0)]);
    let mut pipeline = pipeline(provider);
    let zones = ZoneEngine::new();
    let t0 = Instant::now();

    let mut last = Vec::new();
    for step in 0..25u64 {
        let out = pipeline
            .run_cycle(&proxy_frame(), t0 + Duration::from_millis(step * 100), UseCase::General, &zones)
            .unwrap();
        if let Some(snapshot) = out.snapshot {
            last = snapshot;
        }
    }

    assert_eq!(last.len(), 2);
    assert_eq!(last[0].persistent_id.as_deref(), Some("person001"));
    assert_eq!(last[1].persistent_id.as_deref(), Some("person002"));
    assert!(last.iter().all(|t| t.status == TrackStatus::Locked));
    assert!(last.iter().all(|t| t.lock_strength > 0.7));
}

#[test]
fn vanished_tracks_coast_then_drop_out() {
    let provider = ScriptedProvider::new().then(vec![person_at(300.0, 240.0)]).then(Vec::new());
    let mut pipeline = pipeline(provider);
    let zones = ZoneEngine::new();
    let t0 = Instant::now();

    let seen = pipeline.run_cycle(&proxy_frame(), t0, UseCase::General, &zones).unwrap();
    assert_eq!(seen.snapshot.unwrap()[0].status, TrackStatus::Active);

    let coasting = pipeline
        .run_cycle(&proxy_frame(), t0 + Duration::from_millis(200), UseCase::General, &zones)
        .unwrap();
    let snapshot = coasting.snapshot.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, TrackStatus::Lost);

    let gone = pipeline
        .run_cycle(&proxy_frame(), t0 + Duration::from_millis(1200), UseCase::General, &zones)
        .unwrap();
    assert!(gone.snapshot.unwrap().is_empty());
}

#[test]
fn identity_survives_a_long_coast() {
    let mut provider = ScriptedProvider::new();
    for _ in 0..6 {
        provider.push(vec![person_at(300.0, 240.0)]);
    }
    for _ in 0..10 {
        provider.push(Vec::new());
    }
    provider.push(vec![person_at(300.0, 240.0)]);
    let mut pipeline = pipeline(provider);
    let zones = ZoneEngine::new();
    let t0 = Instant::now();

    let mut now = t0;
    let mut before = None;
    for step in 0..6u64 {
        now = t0 + Duration::from_millis(step * 100);
        let out = pipeline.run_cycle(&proxy_frame(), now, UseCase::General, &zones).unwrap();
        before = out.snapshot.and_then(|s| s.into_iter().next());
    }
    let before = before.unwrap();
    for _ in 0..10 {
        now += Duration::from_millis(600);
        pipeline.run_cycle(&proxy_frame(), now, UseCase::General, &zones).unwrap();
    }
    now += Duration::from_millis(600);
    let out = pipeline.run_cycle(&proxy_frame(), now, UseCase::General, &zones).unwrap();
    let after = &out.snapshot.unwrap()[0];

    assert_eq!(after.id, before.id);
    assert_eq!(after.persistent_id.as_deref(), Some("person001"));
    assert!(after.lock_strength >= before.lock_strength);
    assert!(after.lock_strength > 0.0);
}

#[test]
fn pooled_sensors_feed_the_pipeline() {
    let members: Vec<Box<dyn Sensor>> = vec![
        Box::new(SyntheticSensor::new("north")),
        Box::new(SyntheticSensor::new("south")),
    ];
    let mut pool = SensorPool::new(members);
    pool.connect().unwrap();

    let mut pipeline = pipeline(ScriptedProvider::new());
    let zones = ZoneEngine::new();
    let t0 = Instant::now();
    for step in 0..3u64 {
        let frame = pool.read().unwrap();
        let out = pipeline
            .run_cycle(&frame, t0 + Duration::from_millis(step * 100), UseCase::General, &zones)
            .unwrap();
        assert_eq!(out.annotated.dimensions(), (1280, 720));
    }
    pool.disconnect();
}
