//! Synthetic scene source (`stub://`).
//!
//! Actors enter from the left or right edge and drift across a dark canvas.
//! Persons are drawn as 40x100 blocks, vehicles as 100x60 blocks, so both the
//! motion detector and scripted providers have something real to find.

use std::collections::BTreeMap;

use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Sensor;
use crate::detect::{BBox, Detection};

pub const SCENE_WIDTH: u32 = 1920;
pub const SCENE_HEIGHT: u32 = 1080;
const SPAWN_CHANCE: f64 = 0.05;
const EDGE_MARGIN: f32 = 50.0;

const PERSON_SIZE: (f32, f32) = (40.0, 100.0);
const VEHICLE_SIZE: (f32, f32) = (100.0, 60.0);
const PERSON_COLOR: Rgb<u8> = Rgb([60, 220, 90]);
const VEHICLE_COLOR: Rgb<u8> = Rgb([70, 110, 240]);
const BACKGROUND: Rgb<u8> = Rgb([18, 18, 24]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ActorKind {
    Person,
    Vehicle,
}

#[derive(Clone, Debug)]
struct Actor {
    kind: ActorKind,
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
}

impl Actor {
    fn bbox(&self) -> BBox {
        let (w, h) = match self.kind {
            ActorKind::Person => PERSON_SIZE,
            ActorKind::Vehicle => VEHICLE_SIZE,
        };
        BBox::new(self.x - w / 2.0, self.y - h / 2.0, self.x + w / 2.0, self.y + h / 2.0)
    }

    fn label(&self) -> &'static str {
        match self.kind {
            ActorKind::Person => "person",
            ActorKind::Vehicle => "vehicle",
        }
    }
}

/// Deterministic (seeded) moving scene.
pub struct SyntheticScene {
    width: u32,
    height: u32,
    rng: StdRng,
    actors: BTreeMap<u64, Actor>,
    next_id: u64,
}

impl SyntheticScene {
    pub fn new(seed: u64) -> Self {
        Self {
            width: SCENE_WIDTH,
            height: SCENE_HEIGHT,
            rng: StdRng::seed_from_u64(seed),
            actors: BTreeMap::new(),
            next_id: 1000,
        }
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Advance one frame: maybe spawn, move everyone, drop actors that left.
    pub fn step(&mut self) {
        if self.rng.gen_bool(SPAWN_CHANCE) {
            self.spawn();
        }
        let (w, h) = (self.width as f32, self.height as f32);
        self.actors.retain(|_, a| {
            a.x += a.dx;
            a.y += a.dy;
            a.x >= -EDGE_MARGIN && a.x <= w + EDGE_MARGIN && a.y >= -EDGE_MARGIN && a.y <= h + EDGE_MARGIN
        });
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        let from_left = self.rng.gen_bool(0.5);
        let y = self.rng.gen_range(200.0..(self.height as f32 - 200.0).max(201.0));
        let (x, dx) = if from_left {
            (0.0, self.rng.gen_range(2.0..5.0))
        } else {
            (self.width as f32, self.rng.gen_range(-5.0..-2.0))
        };
        let kind = if self.rng.gen_bool(0.5) {
            ActorKind::Person
        } else {
            ActorKind::Vehicle
        };
        let dy = self.rng.gen_range(-1.0..1.0);
        self.actors.insert(id, Actor { kind, x, y, dx, dy });
    }

    /// What is actually in the scene right now.
    pub fn ground_truth(&self) -> Vec<Detection> {
        self.actors
            .values()
            .map(|a| Detection::new(a.bbox(), a.label(), 0.95))
            .collect()
    }

    pub fn render(&self) -> RgbImage {
        let mut frame = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        for actor in self.actors.values() {
            let b = actor.bbox();
            let color = match actor.kind {
                ActorKind::Person => PERSON_COLOR,
                ActorKind::Vehicle => VEHICLE_COLOR,
            };
            let rect = Rect::at(b.x1.round() as i32, b.y1.round() as i32)
                .of_size(b.width().round() as u32, b.height().round() as u32);
            draw_filled_rect_mut(&mut frame, rect, color);
        }
        frame
    }
}

/// `Sensor` wrapper around `SyntheticScene`.
pub struct SyntheticSensor {
    name: String,
    scene: SyntheticScene,
    connected: bool,
}

impl SyntheticSensor {
    pub fn new(name: &str) -> Self {
        // Seed from the name so the same stub source replays the same scene.
        let seed = name
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100_0000_01b3));
        Self {
            name: format!("stub://{}", name),
            scene: SyntheticScene::new(seed),
            connected: false,
        }
    }
}

impl Sensor for SyntheticSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("sensor {} connected (synthetic)", self.name);
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage> {
        if !self.connected {
            anyhow::bail!("sensor {} is not connected", self.name);
        }
        self.scene.step();
        Ok(self.scene.render())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}
