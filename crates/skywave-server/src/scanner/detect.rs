use skywave_core::frame::FftFrame;
use std::collections::HashMap;

/// Lockout match window: a frequency is locked if any lockout entry lies
/// within this distance of its 1 kHz-rounded value.
pub const LOCKOUT_WINDOW_HZ: u64 = 5_000;

pub fn round_to_khz(frequency_hz: u64) -> u64 {
    (frequency_hz + 500) / 1000 * 1000
}

pub fn is_locked(lockouts: &[u64], frequency_hz: u64) -> bool {
    let rounded = round_to_khz(frequency_hz);
    lockouts
        .iter()
        .any(|l| l.abs_diff(rounded) <= LOCKOUT_WINDOW_HZ)
}

/// Per-slice-center running noise floor: the median power of each visit,
/// low-pass-filtered across visits so a single strong carrier cannot drag
/// the floor up.
pub struct NoiseFloors {
    floors: HashMap<u64, f32>,
}

impl NoiseFloors {
    pub fn new() -> Self {
        Self {
            floors: HashMap::new(),
        }
    }

    pub fn update(&mut self, center_hz: u64, median_db: f32) -> f32 {
        let floor = self
            .floors
            .entry(center_hz)
            .and_modify(|nf| *nf = 0.7 * *nf + 0.3 * median_db)
            .or_insert(median_db);
        *floor
    }

    pub fn get(&self, center_hz: u64) -> Option<f32> {
        self.floors.get(&center_hz).copied()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub frequency_hz: u64,
    pub peak_bin: u32,
    pub peak_db: f32,
    pub noise_floor_db: f32,
}

/// Signal test for one analyzed frame: the shifted peak must clear the
/// running floor by `threshold_db`.
pub fn detect_signal(fft: &FftFrame, noise_floor_db: f32, threshold_db: f32) -> Option<Detection> {
    if fft.peak_db <= noise_floor_db + threshold_db {
        return None;
    }
    Some(Detection {
        frequency_hz: fft.bin_frequency_hz(fft.peak_bin),
        peak_bin: fft.peak_bin,
        peak_db: fft.peak_db,
        noise_floor_db,
    })
}

/// Signal level near a known bin, used while parked: local maximum over
/// a couple of bins absorbs small drift without retuning.
pub fn level_at_bin(fft: &FftFrame, bin: u32) -> f32 {
    let lo = bin.saturating_sub(2) as usize;
    let hi = ((bin + 2) as usize).min(fft.magnitudes_db.len().saturating_sub(1));
    fft.magnitudes_db[lo..=hi]
        .iter()
        .fold(f32::NEG_INFINITY, |a, &b| a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fft_with_peak(peak_bin: u32, peak_db: f32, floor_db: f32) -> FftFrame {
        let mut magnitudes_db = vec![floor_db; 2048];
        magnitudes_db[peak_bin as usize] = peak_db;
        FftFrame {
            magnitudes_db,
            center_freq_hz: 446_050_000,
            sample_rate_hz: 2_048_000,
            fft_size: 2048,
            noise_floor_db: floor_db,
            peak_bin,
            peak_db,
        }
    }

    #[test]
    fn rounding_goes_to_the_nearest_khz() {
        assert_eq!(round_to_khz(446_062_499), 446_062_000);
        assert_eq!(round_to_khz(446_062_500), 446_063_000);
        assert_eq!(round_to_khz(446_062_000), 446_062_000);
    }

    #[test]
    fn lockout_window_spans_five_khz_each_side() {
        let lockouts = vec![446_062_000];
        assert!(is_locked(&lockouts, 446_062_400));
        assert!(is_locked(&lockouts, 446_066_800));
        assert!(is_locked(&lockouts, 446_057_200));
        assert!(!is_locked(&lockouts, 446_070_000));
        assert!(!is_locked(&lockouts, 446_053_000));
    }

    #[test]
    fn noise_floor_filters_across_visits() {
        let mut floors = NoiseFloors::new();
        assert_eq!(floors.update(446_050_000, -90.0), -90.0);
        let second = floors.update(446_050_000, -80.0);
        assert!((second - (-87.0)).abs() < 1e-5);
        // Different center keeps its own floor.
        assert_eq!(floors.update(433_000_000, -95.0), -95.0);
    }

    #[test]
    fn detection_requires_threshold_clearance() {
        let fft = fft_with_peak(1036, -60.0, -90.0);
        assert!(detect_signal(&fft, -90.0, 10.0).is_some());
        assert!(detect_signal(&fft, -90.0, 35.0).is_none());

        let hit = detect_signal(&fft, -90.0, 10.0).unwrap();
        assert_eq!(hit.frequency_hz, 446_062_000);
    }

    #[test]
    fn level_probe_tolerates_small_drift() {
        let fft = fft_with_peak(1036, -55.0, -90.0);
        assert_eq!(level_at_bin(&fft, 1038), -55.0);
        assert_eq!(level_at_bin(&fft, 1034), -55.0);
        assert_eq!(level_at_bin(&fft, 1042), -90.0);
    }
}
