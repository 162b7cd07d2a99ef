//! Live stream source.
//!
//! Live sources never loop: end of stream or a dropped connection is reported
//! as a read error and the pipeline retries after a short delay.

use anyhow::{anyhow, Result};
use image::RgbImage;

use super::Sensor;
#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegSensor;

pub struct StreamSensor {
    url: String,
    #[cfg(feature = "ingest-ffmpeg")]
    inner: Option<FfmpegSensor>,
}

impl StreamSensor {
    pub fn new(url: String) -> Self {
        Self {
            url,
            #[cfg(feature = "ingest-ffmpeg")]
            inner: None,
        }
    }
}

impl Sensor for StreamSensor {
    fn name(&self) -> &str {
        &self.url
    }

    #[cfg(feature = "ingest-ffmpeg")]
    fn connect(&mut self) -> Result<()> {
        let mut inner = FfmpegSensor::new(self.url.clone(), false);
        inner.connect()?;
        self.inner = Some(inner);
        Ok(())
    }

    #[cfg(not(feature = "ingest-ffmpeg"))]
    fn connect(&mut self) -> Result<()> {
        Err(anyhow!(
            "live source {} requires the ingest-ffmpeg feature",
            self.url
        ))
    }

    fn read(&mut self) -> Result<RgbImage> {
        #[cfg(feature = "ingest-ffmpeg")]
        {
            if let Some(inner) = self.inner.as_mut() {
                return inner.read();
            }
        }
        Err(anyhow!("sensor {} is not connected", self.url))
    }

    fn disconnect(&mut self) {
        #[cfg(feature = "ingest-ffmpeg")]
        {
            if let Some(mut inner) = self.inner.take() {
                inner.disconnect();
            }
        }
    }
}
