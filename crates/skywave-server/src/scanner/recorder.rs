use anyhow::Context;
use chrono::{DateTime, Local};
use skywave_core::dsp::wav::encode_wav_pcm16;
use skywave_core::util::generate_unique_id;
use std::path::PathBuf;

/// Minimum clip worth keeping: 50 ms of audio.
const MIN_KEEP_MS: u64 = 50;

/// VOX clip accumulator. Audio is appended while the scanner is parked;
/// on park exit the clip is either WAV-encoded to disk or discarded if it
/// never reached the minimum length.
pub struct VoxRecorder {
    dir: PathBuf,
    sample_rate: u32,
    samples: Vec<f32>,
    armed: bool,
}

impl VoxRecorder {
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            sample_rate,
            samples: Vec::new(),
            armed: false,
        }
    }

    pub fn start(&mut self) {
        self.samples.clear();
        self.armed = true;
    }

    pub fn append(&mut self, audio: &[f32]) {
        if self.armed {
            self.samples.extend_from_slice(audio);
        }
    }

    pub fn recorded_ms(&self) -> u64 {
        (self.samples.len() as u64) * 1000 / u64::from(self.sample_rate)
    }

    /// Writes the clip and disarms. Returns None when the clip was below
    /// the keep threshold; the caller treats that as "no recording".
    pub fn finalize(
        &mut self,
        at: DateTime<Local>,
        frequency_hz: u64,
        channel_label: Option<&str>,
    ) -> anyhow::Result<Option<PathBuf>> {
        self.armed = false;
        if self.recorded_ms() < MIN_KEEP_MS {
            self.samples.clear();
            return Ok(None);
        }

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create recordings dir {}", self.dir.display()))?;
        let mut path = self.dir.join(clip_filename(at, frequency_hz, channel_label));
        if path.exists() {
            // Two hits on the same frequency within a second would
            // otherwise overwrite each other.
            path = self.dir.join(format!(
                "{}_{}.wav",
                path.file_stem().and_then(|s| s.to_str()).unwrap_or("clip"),
                &generate_unique_id()[..8]
            ));
        }
        let wav = encode_wav_pcm16(&self.samples, self.sample_rate);
        std::fs::write(&path, wav).with_context(|| format!("write {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            ms = self.recorded_ms(),
            frequency_hz,
            "vox clip saved"
        );
        self.samples.clear();
        Ok(Some(path))
    }

}

fn clip_filename(at: DateTime<Local>, frequency_hz: u64, channel_label: Option<&str>) -> String {
    let stamp = at.format("%Y-%m-%dT%H-%M-%S");
    let mhz = frequency_hz as f64 / 1e6;
    let label = sanitize_label(channel_label.unwrap_or("scan"));
    format!("{stamp}_{mhz:.4}_{label}.wav")
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "scan".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn short_clips_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = VoxRecorder::new(dir.path(), 8000);
        rec.start();
        rec.append(&[0.1; 399]);
        let out = rec
            .finalize(Local::now(), 446_062_500, None)
            .unwrap();
        assert!(out.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn kept_clips_are_valid_wav_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = VoxRecorder::new(dir.path(), 8000);
        rec.start();
        rec.append(&vec![0.25; 24_000]);
        let at = Local.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let path = rec
            .finalize(at, 446_062_500, Some("PMR446 Ch 3"))
            .unwrap()
            .expect("clip kept");

        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "2026-03-14T15-09-26_446.0625_PMR446_Ch_3.wav");

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 24_000);
    }

    #[test]
    fn append_before_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = VoxRecorder::new(dir.path(), 8000);
        rec.append(&[0.5; 1000]);
        assert_eq!(rec.recorded_ms(), 0);
    }
}
