//! Multi-camera pool composed into one grid frame.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use image::RgbImage;

use super::Sensor;
use crate::frame::{compose_grid, GRID_MAX_PANELS};

const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

struct Member {
    sensor: Box<dyn Sensor>,
    connected: bool,
}

/// Samples up to four connected member sensors per read, round-robin, and
/// lays them out as a 2x2 grid. Members that fail to connect stay in the pool
/// and are retried on every `connect` and, at most once per retry interval,
/// on `read`. Members that fail a read leave a blank panel for that frame.
pub struct SensorPool {
    members: Vec<Member>,
    cursor: usize,
    retry_interval: Duration,
    last_retry: Option<Instant>,
}

impl SensorPool {
    pub fn new(members: Vec<Box<dyn Sensor>>) -> Self {
        Self {
            members: members
                .into_iter()
                .map(|sensor| Member {
                    sensor,
                    connected: false,
                })
                .collect(),
            cursor: 0,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            last_retry: None,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn connected(&self) -> usize {
        self.members.iter().filter(|m| m.connected).count()
    }

    /// Try to connect every member not currently connected.
    fn retry_disconnected(&mut self) {
        self.last_retry = Some(Instant::now());
        for member in self.members.iter_mut().filter(|m| !m.connected) {
            match member.sensor.connect() {
                Ok(()) => {
                    member.connected = true;
                    log::info!("pool member {} connected", member.sensor.name());
                }
                Err(e) => log::warn!("pool member {} unavailable: {:#}", member.sensor.name(), e),
            }
        }
    }

    fn retry_due(&self) -> bool {
        self.last_retry
            .map_or(true, |at| at.elapsed() >= self.retry_interval)
    }
}

impl Sensor for SensorPool {
    fn name(&self) -> &str {
        "pool"
    }

    fn connect(&mut self) -> Result<()> {
        self.retry_disconnected();
        self.cursor = 0;
        let connected = self.connected();
        if connected == 0 {
            bail!("no pool member could be connected");
        }
        log::info!(
            "sensor pool connected ({} of {} members)",
            connected,
            self.members.len()
        );
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage> {
        if self.connected() < self.members.len() && self.retry_due() {
            self.retry_disconnected();
        }
        let live: Vec<usize> = (0..self.members.len())
            .filter(|&i| self.members[i].connected)
            .collect();
        let n = live.len();
        if n == 0 {
            bail!("sensor pool has no connected members");
        }
        let batch = n.min(GRID_MAX_PANELS);
        let mut panels = Vec::with_capacity(batch);
        let mut any_ok = false;
        for offset in 0..batch {
            let sensor = &mut self.members[live[(self.cursor + offset) % n]].sensor;
            match sensor.read() {
                Ok(frame) => {
                    any_ok = true;
                    panels.push(frame);
                }
                Err(e) => {
                    log::debug!("pool member {} read failed: {:#}", sensor.name(), e);
                    panels.push(RgbImage::new(0, 0));
                }
            }
        }
        self.cursor = (self.cursor + batch) % n;
        if !any_ok {
            bail!("every pool member failed to read");
        }
        Ok(compose_grid(&panels))
    }

    fn disconnect(&mut self) {
        for member in self.members.iter_mut() {
            member.sensor.disconnect();
            member.connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{GRID_PANEL_HEIGHT, GRID_PANEL_WIDTH};
    use crate::ingest::{StreamSensor, SyntheticSensor};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn synthetic(names: &[&str]) -> Vec<Box<dyn Sensor>> {
        names
            .iter()
            .map(|n| Box::new(SyntheticSensor::new(n)) as Box<dyn Sensor>)
            .collect()
    }

    #[test]
    fn composes_a_grid_and_pads_missing_panels() {
        let mut pool = SensorPool::new(synthetic(&["a", "b"]));
        pool.connect().unwrap();
        let frame = pool.read().unwrap();
        assert_eq!(frame.dimensions(), (GRID_PANEL_WIDTH * 2, GRID_PANEL_HEIGHT * 2));
        // Bottom-right panel has no sensor behind it.
        assert_eq!(frame.get_pixel(GRID_PANEL_WIDTH + 10, GRID_PANEL_HEIGHT + 10).0, [0, 0, 0]);
        assert_ne!(frame.get_pixel(10, 10).0, [0, 0, 0]);
    }

    /// Fails its first `failures` connect attempts, then behaves like a
    /// synthetic camera.
    struct FlakySensor {
        inner: SyntheticSensor,
        failures: u32,
        attempts: Arc<AtomicU32>,
    }

    impl FlakySensor {
        fn boxed(failures: u32, attempts: Arc<AtomicU32>) -> Box<dyn Sensor> {
            Box::new(Self {
                inner: SyntheticSensor::new("flaky"),
                failures,
                attempts,
            })
        }
    }

    impl Sensor for FlakySensor {
        fn name(&self) -> &str {
            "flaky"
        }

        fn connect(&mut self) -> Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                bail!("camera offline");
            }
            self.inner.connect()
        }

        fn read(&mut self) -> Result<RgbImage> {
            self.inner.read()
        }

        fn disconnect(&mut self) {
            self.inner.disconnect();
        }
    }

    #[test]
    fn members_that_cannot_connect_stay_in_the_pool() {
        let mut members = synthetic(&["a"]);
        members.push(Box::new(StreamSensor::new("rtsp://unreachable.invalid/x".into())));
        let mut pool = SensorPool::new(members);
        #[cfg(not(feature = "ingest-ffmpeg"))]
        {
            pool.connect().unwrap();
            assert_eq!(pool.len(), 2);
            assert_eq!(pool.connected(), 1);
            assert!(pool.read().is_ok());
        }
        pool.disconnect();
        assert_eq!(pool.connected(), 0);
    }

    #[test]
    fn failed_member_is_retried_on_reconnect() {
        let attempts = Arc::new(AtomicU32::new(0));
        let mut members = synthetic(&["a"]);
        members.push(FlakySensor::boxed(1, attempts.clone()));
        let mut pool = SensorPool::new(members);

        pool.connect().unwrap();
        assert_eq!(pool.connected(), 1);
        pool.connect().unwrap();
        assert_eq!(pool.connected(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn read_retries_missing_members_once_the_interval_passes() {
        let attempts = Arc::new(AtomicU32::new(0));
        let members = vec![
            Box::new(SyntheticSensor::new("a")) as Box<dyn Sensor>,
            FlakySensor::boxed(1, attempts.clone()),
        ];
        let mut pool = SensorPool::new(members).with_retry_interval(Duration::ZERO);
        pool.connect().unwrap();
        assert_eq!(pool.connected(), 1);

        let frame = pool.read().unwrap();
        assert_eq!(pool.connected(), 2);
        // Both top panels are filled once the second member is back.
        assert_ne!(frame.get_pixel(GRID_PANEL_WIDTH + 10, 10).0, [0, 0, 0]);
    }

    #[test]
    fn read_does_not_retry_before_the_interval() {
        let attempts = Arc::new(AtomicU32::new(0));
        let members = vec![
            Box::new(SyntheticSensor::new("a")) as Box<dyn Sensor>,
            FlakySensor::boxed(1, attempts.clone()),
        ];
        let mut pool = SensorPool::new(members).with_retry_interval(Duration::from_secs(3600));
        pool.connect().unwrap();
        pool.read().unwrap();
        assert_eq!(pool.connected(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn round_robin_past_four_members() {
        let mut pool = SensorPool::new(synthetic(&["a", "b", "c", "d", "e", "f"]));
        pool.connect().unwrap();
        pool.read().unwrap();
        assert_eq!(pool.cursor, 4);
        pool.read().unwrap();
        assert_eq!(pool.cursor, 2);
    }

    #[test]
    fn empty_pool_fails() {
        let mut pool = SensorPool::new(Vec::new());
        assert!(pool.is_empty());
        assert!(pool.connect().is_err());
        assert!(pool.read().is_err());
    }
}
