//! FFmpeg-backed decoding for video files and live URLs.
//!
//! Looping sources seek back to the start at end of stream and reopen the
//! input when the seek does not produce a frame.

use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

struct Decoder {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

impl Decoder {
    fn open(location: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&location)
            .with_context(|| format!("failed to open '{}' with ffmpeg", location))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", location))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;
        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
        })
    }

    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        let mut rgb = ffmpeg::frame::Video::empty();
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.scaler
                    .run(&decoded, &mut rgb)
                    .context("scale frame to RGB")?;
                return frame_to_image(&rgb).map(Some);
            }
        }
        Ok(None)
    }

    fn rewind(&mut self) -> Result<()> {
        self.input.seek(0, ..).context("seek to start")?;
        self.decoder.flush();
        Ok(())
    }
}

pub(crate) struct FfmpegSensor {
    location: String,
    looping: bool,
    decoder: Option<Decoder>,
}

impl FfmpegSensor {
    pub(crate) fn new(location: String, looping: bool) -> Self {
        Self {
            location,
            looping,
            decoder: None,
        }
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.decoder = Some(Decoder::open(&self.location)?);
        log::info!("sensor {} connected (ffmpeg)", self.location);
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Result<RgbImage> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| anyhow!("sensor {} is not connected", self.location))?;
        if let Some(frame) = decoder.next_frame()? {
            return Ok(frame);
        }
        if !self.looping {
            bail!("end of stream on {}", self.location);
        }

        log::info!("looping video file {}", self.location);
        let rewound = match decoder.rewind() {
            Ok(()) => decoder.next_frame()?,
            Err(e) => {
                log::warn!("seek failed on {}: {}", self.location, e);
                None
            }
        };
        if let Some(frame) = rewound {
            return Ok(frame);
        }

        log::warn!("reloading video source {}", self.location);
        let mut reopened = Decoder::open(&self.location)?;
        let frame = reopened
            .next_frame()?
            .ok_or_else(|| anyhow!("{} produced no frames after reopen", self.location))?;
        self.decoder = Some(reopened);
        Ok(frame)
    }

    pub(crate) fn disconnect(&mut self) {
        if self.decoder.take().is_some() {
            log::info!("sensor {} disconnected", self.location);
        }
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    RgbImage::from_raw(width, height, pixels).ok_or_else(|| anyhow!("ffmpeg frame size mismatch"))
}
