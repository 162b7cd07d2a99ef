//! Local file sources.
//!
//! `FileSensor` plays a directory of still frames (PNG/JPEG, sorted by name)
//! or a single image, and loops forever. When rewinding fails because frames
//! vanished, the directory is rescanned. Video files are decoded with FFmpeg
//! when the ingest-ffmpeg feature is enabled.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use super::Sensor;
#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegSensor;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

pub struct FileSensor {
    path: PathBuf,
    name: String,
    backend: Option<FileBackend>,
}

enum FileBackend {
    Frames(FrameSequence),
    #[cfg(feature = "ingest-ffmpeg")]
    Video(FfmpegSensor),
}

impl FileSensor {
    pub fn new(path: PathBuf) -> Self {
        let name = path.display().to_string();
        Self {
            path,
            name,
            backend: None,
        }
    }
}

impl Sensor for FileSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<()> {
        if self.path.is_dir() || is_image(&self.path) {
            let sequence = FrameSequence::scan(&self.path)?;
            log::info!(
                "sensor {} connected ({} frames, looping)",
                self.name,
                sequence.frames.len()
            );
            self.backend = Some(FileBackend::Frames(sequence));
            return Ok(());
        }
        if !self.path.exists() {
            return Err(anyhow!("file source {} does not exist", self.name));
        }
        #[cfg(feature = "ingest-ffmpeg")]
        {
            let mut video = FfmpegSensor::new(self.name.clone(), true);
            video.connect()?;
            self.backend = Some(FileBackend::Video(video));
            Ok(())
        }
        #[cfg(not(feature = "ingest-ffmpeg"))]
        {
            Err(anyhow!(
                "video file {} requires the ingest-ffmpeg feature",
                self.name
            ))
        }
    }

    fn read(&mut self) -> Result<RgbImage> {
        match self.backend.as_mut() {
            Some(FileBackend::Frames(sequence)) => sequence.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            Some(FileBackend::Video(video)) => video.read(),
            None => Err(anyhow!("sensor {} is not connected", self.name)),
        }
    }

    fn disconnect(&mut self) {
        #[cfg(feature = "ingest-ffmpeg")]
        {
            if let Some(FileBackend::Video(video)) = self.backend.as_mut() {
                video.disconnect();
            }
        }
        if self.backend.take().is_some() {
            log::info!("sensor {} disconnected", self.name);
        }
    }
}

// ----------------------------------------------------------------------------
// Still-frame sequence
// ----------------------------------------------------------------------------

struct FrameSequence {
    root: PathBuf,
    frames: Vec<PathBuf>,
    cursor: usize,
}

impl FrameSequence {
    fn scan(root: &Path) -> Result<Self> {
        let frames = list_frames(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            frames,
            cursor: 0,
        })
    }

    fn load(&self, index: usize) -> Result<RgbImage> {
        let path = self
            .frames
            .get(index)
            .ok_or_else(|| anyhow!("frame index {} out of range", index))?;
        Ok(image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?
            .to_rgb8())
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        if self.cursor < self.frames.len() {
            let index = self.cursor;
            self.cursor += 1;
            return self.load(index);
        }

        // End of sequence: rewind, and rescan if the first frame is gone.
        log::debug!("looping frame sequence {}", self.root.display());
        self.cursor = 0;
        match self.load(0) {
            Ok(frame) => {
                self.cursor = 1;
                Ok(frame)
            }
            Err(e) => {
                log::warn!("rewind of {} failed ({}), rescanning", self.root.display(), e);
                self.frames = list_frames(&self.root)?;
                let frame = self.load(0)?;
                self.cursor = 1;
                Ok(frame)
            }
        }
    }
}

fn list_frames(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut frames: Vec<PathBuf> = std::fs::read_dir(root)
        .with_context(|| format!("failed to list {}", root.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    frames.sort();
    if frames.is_empty() {
        return Err(anyhow!("no image frames found in {}", root.display()));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frame(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn directory_plays_in_order_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "0002.png", 20);
        write_frame(dir.path(), "0001.png", 10);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut sensor = FileSensor::new(dir.path().to_path_buf());
        sensor.connect().unwrap();
        let shades: Vec<u8> = (0..5).map(|_| sensor.read().unwrap().get_pixel(0, 0)[0]).collect();
        assert_eq!(shades, vec![10, 20, 10, 20, 10]);
    }

    #[test]
    fn rescans_when_rewind_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "a.png", 10);
        write_frame(dir.path(), "b.png", 20);

        let mut sensor = FileSensor::new(dir.path().to_path_buf());
        sensor.connect().unwrap();
        sensor.read().unwrap();
        sensor.read().unwrap();

        std::fs::remove_file(dir.path().join("a.png")).unwrap();
        write_frame(dir.path(), "c.png", 30);
        assert_eq!(sensor.read().unwrap().get_pixel(0, 0)[0], 20);
        assert_eq!(sensor.read().unwrap().get_pixel(0, 0)[0], 30);
    }

    #[test]
    fn empty_directory_and_unconnected_reads_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut sensor = FileSensor::new(dir.path().to_path_buf());
        assert!(sensor.read().is_err());
        assert!(sensor.connect().is_err());
    }
}
