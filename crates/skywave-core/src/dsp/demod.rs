use crate::dsp::nco::Nco;

/// Polar FM discriminator on consecutive complex samples, normalized so a
/// full +/- pi phase step maps to +/- 1.0.
pub fn fm_discriminate(i: f64, q: f64, prev_i: f64, prev_q: f64) -> f64 {
    (q * prev_i - i * prev_q).atan2(i * prev_i + q * prev_q) / std::f64::consts::PI
}

pub fn am_envelope(i: f64, q: f64) -> f64 {
    (i * i + q * q).sqrt()
}

/// Broadcast-FM de-emphasis, single-pole IIR lowpass with time constant
/// `tau_us` (75 us in most regions, 50 in ITU region 1).
#[derive(Debug, Clone)]
pub struct Deemphasis {
    alpha: f64,
    state: f64,
}

impl Deemphasis {
    pub fn new(tau_us: f64, sample_rate_hz: f64) -> Self {
        let tau = tau_us * 1e-6;
        let dt = 1.0 / sample_rate_hz;
        Self {
            alpha: 1.0 - (-dt / tau).exp(),
            state: 0.0,
        }
    }

    pub fn process(&mut self, sample: f64) -> f64 {
        self.state += self.alpha * (sample - self.state);
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

/// SSB product detector: multiplies the filtered baseband by a carrier at
/// half the channel bandwidth and keeps the real part (Weaver-style second
/// mix). `upper` selects the sideband.
#[derive(Debug, Clone)]
pub struct SsbProduct {
    nco: Nco,
}

impl SsbProduct {
    pub fn new(bandwidth_hz: f64, sample_rate_hz: f64, upper: bool) -> Self {
        let shift = bandwidth_hz / 2.0;
        let shift = if upper { shift } else { -shift };
        Self {
            nco: Nco::new(shift, sample_rate_hz),
        }
    }

    pub fn demodulate(&mut self, i: f64, q: f64) -> f64 {
        let (c, s) = self.nco.next();
        i * c - q * s
    }
}

/// DC blocker for demodulated audio, `y[n] = x[n] - x[n-1] + pole * y[n-1]`
/// (differentiator followed by a leaky integrator). AM envelopes carry the
/// carrier level as a constant offset; the pole sets how quickly it is
/// forgotten (0.98 at 8 kHz puts the corner near 25 Hz).
#[derive(Debug, Clone)]
pub struct DcBlocker {
    pole: f64,
    prev_in: f64,
    prev_out: f64,
}

impl DcBlocker {
    pub fn new(pole: f64) -> Self {
        debug_assert!((0.0..1.0).contains(&pole));
        Self {
            pole,
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    pub fn process(&mut self, sample: f64) -> f64 {
        let out = sample - self.prev_in + self.pole * self.prev_out;
        self.prev_in = sample;
        self.prev_out = out;
        out
    }

    pub fn reset(&mut self) {
        self.prev_in = 0.0;
        self.prev_out = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn discriminator_tracks_phase_steps() {
        // A rotating phasor with a constant step of pi/4 per sample.
        let step = PI / 4.0;
        let mut prev = (1.0f64, 0.0f64);
        let mut phase = 0.0f64;
        for _ in 0..32 {
            phase += step;
            let cur = (phase.cos(), phase.sin());
            let d = fm_discriminate(cur.0, cur.1, prev.0, prev.1);
            assert!((d - 0.25).abs() < 1e-12);
            prev = cur;
        }
    }

    #[test]
    fn envelope_is_magnitude() {
        assert!((am_envelope(3.0, 4.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn deemphasis_settles_on_dc() {
        let mut de = Deemphasis::new(75.0, 8000.0);
        let mut y = 0.0;
        for _ in 0..200 {
            y = de.process(1.0);
        }
        assert!((y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dc_blocker_removes_constant_offset() {
        let mut dc = DcBlocker::new(0.995);
        let mut tail = 0.0f64;
        for n in 0..4000 {
            let x = 0.8 + 0.1 * (2.0 * PI * 440.0 * (n as f64) / 8000.0).sin();
            let y = dc.process(x);
            if n > 3000 {
                tail = tail.max(y.abs());
            }
        }
        // The 440 Hz tone survives, the 0.8 offset does not.
        assert!(tail > 0.05 && tail < 0.2, "tail={tail}");
    }

    #[test]
    fn dc_blocker_step_response_decays() {
        let mut dc = DcBlocker::new(0.98);
        let mut y = 0.0;
        for _ in 0..400 {
            y = dc.process(0.5);
        }
        assert!(y.abs() < 1e-3, "residual {y}");
    }
}
