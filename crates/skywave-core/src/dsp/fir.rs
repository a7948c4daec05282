use crate::dsp::window::blackman_harris;
use crate::error::DspError;
use std::f64::consts::PI;

/// Windowed-sinc lowpass design, Blackman-Harris window, unit DC gain.
///
/// `cutoff_normalized` is the cutoff as a fraction of the sample rate, in
/// (0, 0.5]. Tap count must be odd so the filter has a center tap and
/// integer group delay.
pub fn design_lowpass_fir(num_taps: usize, cutoff_normalized: f64) -> Result<Vec<f64>, DspError> {
    if num_taps < 3 || num_taps % 2 == 0 {
        return Err(DspError::InvalidFirLength(num_taps));
    }
    if !(cutoff_normalized > 0.0 && cutoff_normalized <= 0.5) {
        return Err(DspError::InvalidCutoff(cutoff_normalized));
    }

    let window = blackman_harris(num_taps);
    let center = (num_taps / 2) as f64;
    let mut taps = vec![0.0f64; num_taps];
    for (n, tap) in taps.iter_mut().enumerate() {
        let m = (n as f64) - center;
        let sinc = if m == 0.0 {
            2.0 * cutoff_normalized
        } else {
            (2.0 * PI * cutoff_normalized * m).sin() / (PI * m)
        };
        *tap = sinc * window[n];
    }

    let sum: f64 = taps.iter().sum();
    for tap in taps.iter_mut() {
        *tap /= sum;
    }
    Ok(taps)
}

/// Circular-buffer FIR state. One instance per stream (I and Q keep
/// separate instances); the buffer is reused across frames so the hot
/// path never allocates.
#[derive(Debug, Clone)]
pub struct Fir {
    taps: Vec<f64>,
    buf: Vec<f64>,
    pos: usize,
}

impl Fir {
    pub fn new(taps: Vec<f64>) -> Self {
        let len = taps.len();
        Self {
            taps,
            buf: vec![0.0; len],
            pos: 0,
        }
    }

    pub fn filter(&mut self, sample: f64) -> f64 {
        self.buf[self.pos] = sample;
        let mut acc = 0.0f64;
        let mut idx = self.pos;
        for &tap in self.taps.iter() {
            acc += tap * self.buf[idx];
            idx = if idx == 0 { self.buf.len() - 1 } else { idx - 1 };
        }
        self.pos += 1;
        if self.pos == self.buf.len() {
            self.pos = 0;
        }
        acc
    }

    pub fn reset(&mut self) {
        self.buf.fill(0.0);
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn design_rejects_even_and_tiny_lengths() {
        assert!(design_lowpass_fir(64, 0.1).is_err());
        assert!(design_lowpass_fir(1, 0.1).is_err());
        assert!(design_lowpass_fir(127, 0.0).is_err());
        assert!(design_lowpass_fir(127, 0.6).is_err());
    }

    #[test]
    fn taps_sum_to_unity() {
        for (len, cutoff) in [(63usize, 0.01f64), (127, 0.1), (255, 0.45)] {
            let taps = design_lowpass_fir(len, cutoff).unwrap();
            let sum: f64 = taps.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "len={len} cutoff={cutoff}");
        }
    }

    #[test]
    fn dc_passes_and_near_nyquist_is_rejected() {
        let taps = design_lowpass_fir(127, 0.05).unwrap();
        let mut fir = Fir::new(taps);

        // Long DC run settles to the input level.
        let mut last = 0.0;
        for _ in 0..400 {
            last = fir.filter(1.0);
        }
        assert!((last - 1.0).abs() < 1e-6);

        // Alternating +1/-1 (Nyquist) is strongly attenuated.
        fir.reset();
        let mut peak: f64 = 0.0;
        for k in 0..400 {
            let x = if k % 2 == 0 { 1.0 } else { -1.0 };
            let y = fir.filter(x);
            if k > 200 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 1e-3, "nyquist leak {peak}");
    }
}
