use skywave_core::dsp::fft::{fft_inplace, fft_shift};
use skywave_core::dsp::window::blackman_harris;
use skywave_core::error::DspError;
use skywave_core::frame::{FftFrame, IqFrame};

/// Whole-band spectrum analysis shared by the multiplexer and the scanner:
/// window, FFT, power in dB, FFT-shift, median noise floor, peak. All
/// scratch (including the emitted frame's magnitude buffer) is owned here
/// and reused, so per-frame analysis does not allocate.
pub struct SpectrumAnalyzer {
    fft_size: usize,
    window: Vec<f64>,
    re: Vec<f64>,
    im: Vec<f64>,
    median_scratch: Vec<f32>,
    out: FftFrame,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Result<Self, DspError> {
        if !fft_size.is_power_of_two() {
            return Err(DspError::InvalidFftSize(fft_size));
        }
        Ok(Self {
            fft_size,
            window: blackman_harris(fft_size),
            re: vec![0.0; fft_size],
            im: vec![0.0; fft_size],
            median_scratch: vec![0.0; fft_size],
            out: FftFrame {
                magnitudes_db: vec![0.0; fft_size],
                center_freq_hz: 0,
                sample_rate_hz: 0,
                fft_size: fft_size as u32,
                noise_floor_db: 0.0,
                peak_bin: 0,
                peak_db: 0.0,
            },
        })
    }

    /// Analyzes the most recent `fft_size` complex samples of the frame.
    pub fn analyze(&mut self, frame: &IqFrame) -> &FftFrame {
        let complex_len = frame.complex_len();
        let take = complex_len.min(self.fft_size);
        let skip = complex_len - take;
        let pad = self.fft_size - take;

        self.re[..pad].fill(0.0);
        self.im[..pad].fill(0.0);
        for (k, iq) in frame.samples[skip * 2..].chunks_exact(2).enumerate() {
            let w = self.window[pad + k];
            self.re[pad + k] = w * f64::from(iq[0]);
            self.im[pad + k] = w * f64::from(iq[1]);
        }

        // Size was validated at construction.
        let _ = fft_inplace(&mut self.re, &mut self.im);

        for (dst, (r, i)) in self
            .out
            .magnitudes_db
            .iter_mut()
            .zip(self.re.iter().zip(self.im.iter()))
        {
            *dst = (10.0 * (r * r + i * i + 1e-20).log10()) as f32;
        }
        fft_shift(&mut self.out.magnitudes_db);

        self.median_scratch.copy_from_slice(&self.out.magnitudes_db);
        let mid = self.fft_size / 2;
        let (_, median, _) = self
            .median_scratch
            .select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        self.out.noise_floor_db = *median;

        let (peak_bin, peak_db) = self
            .out
            .magnitudes_db
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, v)| (k as u32, *v))
            .unwrap_or((0, -200.0));
        self.out.peak_bin = peak_bin;
        self.out.peak_db = peak_db;
        self.out.center_freq_hz = frame.center_freq_hz;
        self.out.sample_rate_hz = frame.sample_rate_hz;
        &self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_frame(offset_hz: f64, rate: u32, len: usize) -> IqFrame {
        let mut samples = Vec::with_capacity(len * 2);
        for t in 0..len {
            let ph = 2.0 * std::f64::consts::PI * offset_hz * (t as f64) / f64::from(rate);
            samples.push(ph.cos() as f32 * 0.5);
            samples.push(ph.sin() as f32 * 0.5);
        }
        IqFrame {
            samples,
            sample_rate_hz: rate,
            center_freq_hz: 446_050_000,
            seq: 0,
            wall_ts_ms: 0,
        }
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(SpectrumAnalyzer::new(1000).is_err());
    }

    #[test]
    fn tone_peaks_in_the_expected_shifted_bin() {
        let mut analyzer = SpectrumAnalyzer::new(2048).unwrap();
        let frame = tone_frame(12_500.0, 2_048_000, 4096);
        let fft = analyzer.analyze(&frame);

        // +12.5 kHz at 1 kHz/bin lands ~12-13 bins above center.
        let expected = 1024 + 12;
        assert!(
            (fft.peak_bin as i64 - expected as i64).abs() <= 1,
            "peak at {}",
            fft.peak_bin
        );
        assert!(fft.peak_db > fft.noise_floor_db + 20.0);

        let est = fft.bin_frequency_hz(fft.peak_bin);
        assert!(est.abs_diff(446_062_500) <= 1_000, "estimate {est}");
    }

    #[test]
    fn short_frames_are_zero_padded() {
        let mut analyzer = SpectrumAnalyzer::new(2048).unwrap();
        let frame = tone_frame(0.0, 2_048_000, 512);
        let fft = analyzer.analyze(&frame);
        assert_eq!(fft.magnitudes_db.len(), 2048);
        assert_eq!(fft.peak_bin, 1024);
    }
}
