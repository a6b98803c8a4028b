//! WAV file input and output for the `converse` command.

use std::path::{Path, PathBuf};

use tokio::time::Instant;
use tracing::{error, info};

use super::{ClientError, ClientResult};
use crate::core::audio::codec::{float_to_pcm16, pcm16_to_float};
use crate::core::audio::{AudioOutput, SAMPLE_RATE};

/// Read a mono 16-bit PCM WAV file recorded at [`SAMPLE_RATE`] Hz.
pub fn read_wav_samples(path: &Path) -> ClientResult<Vec<f32>> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels != 1
        || spec.sample_rate != SAMPLE_RATE
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(ClientError::UnsupportedWav(format!(
            "{}: expected mono 16-bit PCM at {} Hz, got {} channel(s) {}-bit {:?} at {} Hz",
            path.display(),
            SAMPLE_RATE,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format,
            spec.sample_rate
        )));
    }

    reader
        .samples::<i16>()
        .map(|sample| sample.map(pcm16_to_float))
        .collect::<Result<Vec<_>, _>>()
        .map_err(ClientError::from)
}

fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Renders scheduled playback onto a timeline and writes it as WAV on close.
///
/// The output clock is wall time since creation. Gaps between chunks become
/// silence, and audio cut by `stop_all` is dropped from the timeline.
pub struct WavOutput {
    path: PathBuf,
    started: Instant,
    timeline: Vec<f32>,
    closed: bool,
}

impl WavOutput {
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started: Instant::now(),
            timeline: Vec::new(),
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples rendered so far.
    pub fn rendered_samples(&self) -> &[f32] {
        &self.timeline
    }

    fn index_at(time: f64) -> usize {
        (time.max(0.0) * SAMPLE_RATE as f64).round() as usize
    }

    fn write(&self) -> ClientResult<()> {
        let mut writer = hound::WavWriter::create(&self.path, wav_spec())?;
        for &sample in &self.timeline {
            writer.write_sample(float_to_pcm16(sample))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

impl AudioOutput for WavOutput {
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) {
        if self.closed {
            return;
        }
        let offset = Self::index_at(start_at);
        let end = offset + samples.len();
        if self.timeline.len() < end {
            self.timeline.resize(end, 0.0);
        }
        self.timeline[offset..end].copy_from_slice(&samples);
    }

    fn stop_all(&mut self) {
        let now = Self::index_at(self.current_time());
        self.timeline.truncate(now);
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.write() {
            Ok(()) => info!(
                path = %self.path.display(),
                seconds = self.timeline.len() as f64 / SAMPLE_RATE as f64,
                "Wrote playback audio"
            ),
            Err(e) => error!(path = %self.path.display(), "Failed to write playback audio: {}", e),
        }
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        self.close();
    }
}
