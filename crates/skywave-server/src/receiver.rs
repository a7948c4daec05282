use skywave_core::dsp::demod::{am_envelope, fm_discriminate, DcBlocker, Deemphasis, SsbProduct};
use skywave_core::dsp::fir::{design_lowpass_fir, Fir};
use skywave_core::dsp::nco::Nco;
use skywave_core::error::ControlError;
use skywave_core::frame::IqFrame;
use skywave_core::protocol::{DemodMode, ReceiverSpec};

const CHANNEL_FIR_TAPS: usize = 127;
const FIRST_STAGE_RATE_HZ: u32 = 32_000;
const AUDIO_GAIN: f64 = 5.0;

/// One narrow-band receiver inside the wideband stream: NCO mix to
/// baseband, channel FIR, two-stage integer decimation, demodulation.
/// All state is preallocated; `process` never allocates beyond the reused
/// output buffer.
#[derive(Debug)]
pub struct VirtualReceiver {
    pub spec: ReceiverSpec,
    nco: Nco,
    fir_i: Fir,
    fir_q: Fir,
    stage1_decim: usize,
    stage1_pos: usize,
    stage2_decim: usize,
    stage2_pos: usize,
    prev_i: f64,
    prev_q: f64,
    deemphasis: Deemphasis,
    ssb: SsbProduct,
    dc: DcBlocker,
    audio: Vec<f32>,
}

impl VirtualReceiver {
    pub fn new(
        spec: ReceiverSpec,
        parent_center_hz: u64,
        parent_rate_hz: u32,
        deemphasis_us: f64,
    ) -> Result<Self, ControlError> {
        validate_in_band(&spec, parent_center_hz, parent_rate_hz)?;
        if spec.output_rate_hz == 0 {
            return Err(ControlError::Validation(
                "output_rate_hz must be > 0".to_string(),
            ));
        }

        let cutoff = f64::from(spec.bandwidth_hz) / 2.0 / f64::from(parent_rate_hz);
        let taps = design_lowpass_fir(CHANNEL_FIR_TAPS, cutoff.min(0.5))
            .map_err(|e| ControlError::Validation(e.to_string()))?;

        let stage1_decim = (parent_rate_hz / FIRST_STAGE_RATE_HZ).max(1) as usize;
        let channel_rate = parent_rate_hz / stage1_decim as u32;
        let stage2_decim = (channel_rate / spec.output_rate_hz).max(1) as usize;
        let output_rate = channel_rate / stage2_decim as u32;

        let offset = spec.center_freq_hz as f64 - parent_center_hz as f64;
        Ok(Self {
            nco: Nco::new(offset, f64::from(parent_rate_hz)),
            fir_i: Fir::new(taps.clone()),
            fir_q: Fir::new(taps),
            stage1_decim,
            stage1_pos: 0,
            stage2_decim,
            stage2_pos: 0,
            prev_i: 0.0,
            prev_q: 0.0,
            deemphasis: Deemphasis::new(deemphasis_us, f64::from(output_rate)),
            ssb: SsbProduct::new(
                f64::from(spec.bandwidth_hz),
                f64::from(output_rate),
                spec.mode != DemodMode::Lsb,
            ),
            dc: DcBlocker::new(0.98),
            audio: Vec::new(),
            spec,
        })
    }

    /// NCO retarget only; filter and decimator state carry across tunes.
    pub fn retune(
        &mut self,
        frequency_hz: u64,
        parent_center_hz: u64,
        parent_rate_hz: u32,
    ) -> Result<(), ControlError> {
        let mut spec = self.spec.clone();
        spec.center_freq_hz = frequency_hz;
        validate_in_band(&spec, parent_center_hz, parent_rate_hz)?;
        self.spec = spec;
        let offset = frequency_hz as f64 - parent_center_hz as f64;
        self.nco.set_frequency(offset, f64::from(parent_rate_hz));
        Ok(())
    }

    /// Re-aims the NCO after the device itself moved.
    pub fn parent_retuned(&mut self, parent_center_hz: u64, parent_rate_hz: u32) {
        let offset = self.spec.center_freq_hz as f64 - parent_center_hz as f64;
        self.nco.set_frequency(offset, f64::from(parent_rate_hz));
    }

    /// Runs the whole chain over one IQ frame and returns the audio chunk
    /// for it. Every frame yields exactly one chunk while the receiver is
    /// registered.
    pub fn process(&mut self, frame: &IqFrame) -> &[f32] {
        self.audio.clear();
        for iq in frame.samples.chunks_exact(2) {
            let (c, s) = self.nco.next();
            let i = f64::from(iq[0]);
            let q = f64::from(iq[1]);
            // Multiply by e^{-j*phase} to shift the target down to DC.
            let bb_i = i * c + q * s;
            let bb_q = q * c - i * s;

            let fi = self.fir_i.filter(bb_i);
            let fq = self.fir_q.filter(bb_q);

            self.stage1_pos += 1;
            if self.stage1_pos < self.stage1_decim {
                continue;
            }
            self.stage1_pos = 0;

            self.stage2_pos += 1;
            if self.stage2_pos < self.stage2_decim {
                continue;
            }
            self.stage2_pos = 0;

            let sample = self.demodulate(fi, fq);
            self.audio
                .push((sample * AUDIO_GAIN).clamp(-1.0, 1.0) as f32);
        }
        &self.audio
    }

    fn demodulate(&mut self, i: f64, q: f64) -> f64 {
        match self.spec.mode {
            DemodMode::Nfm => {
                let d = fm_discriminate(i, q, self.prev_i, self.prev_q);
                self.prev_i = i;
                self.prev_q = q;
                d
            }
            DemodMode::Wfm => {
                let d = fm_discriminate(i, q, self.prev_i, self.prev_q);
                self.prev_i = i;
                self.prev_q = q;
                self.deemphasis.process(d)
            }
            DemodMode::Am => self.dc.process(am_envelope(i, q)),
            DemodMode::Usb | DemodMode::Lsb => self.dc.process(self.ssb.demodulate(i, q)),
        }
    }
}

fn validate_in_band(
    spec: &ReceiverSpec,
    parent_center_hz: u64,
    parent_rate_hz: u32,
) -> Result<(), ControlError> {
    let offset = spec.center_freq_hz.abs_diff(parent_center_hz);
    let half_band = u64::from(parent_rate_hz) / 2;
    if offset + u64::from(spec.bandwidth_hz) / 2 > half_band {
        return Err(ControlError::ReceiverOutOfBand);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(center: u64, bw: u32, mode: DemodMode) -> ReceiverSpec {
        ReceiverSpec {
            id: "rx0".to_string(),
            center_freq_hz: center,
            bandwidth_hz: bw,
            output_rate_hz: 8000,
            mode,
            decoder: None,
        }
    }

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
    fn out_of_band_receiver_is_rejected() {
        let err = VirtualReceiver::new(
            spec(447_100_000, 12_500, DemodMode::Nfm),
            446_050_000,
            2_048_000,
            75.0,
        )
        .unwrap_err();
        assert!(matches!(err, ControlError::ReceiverOutOfBand));
    }

    #[test]
    fn edge_of_band_is_accepted() {
        VirtualReceiver::new(
            spec(446_050_000 + 1_017_750, 12_500, DemodMode::Nfm),
            446_050_000,
            2_048_000,
            75.0,
        )
        .unwrap();
    }

    #[test]
    fn every_frame_yields_one_chunk_at_the_decimated_rate() {
        let mut rx = VirtualReceiver::new(
            spec(446_062_500, 12_500, DemodMode::Nfm),
            446_050_000,
            2_048_000,
            75.0,
        )
        .unwrap();
        let frame = tone_frame(12_500.0, 2_048_000, 4096);
        for _ in 0..5 {
            let audio = rx.process(&frame);
            // 2.048e6 / (64 * 4) = 8 kHz, 4096 in -> 16 out.
            assert_eq!(audio.len(), 16);
            assert!(audio.iter().all(|s| s.abs() <= 1.0));
        }
    }

    #[test]
    fn am_receiver_recovers_its_carrier_envelope() {
        let mut rx = VirtualReceiver::new(
            spec(446_050_000, 10_000, DemodMode::Am),
            446_050_000,
            2_048_000,
            75.0,
        )
        .unwrap();
        // Unmodulated carrier at the receiver center: after the DC
        // blocker the audio settles near zero.
        let frame = tone_frame(0.0, 2_048_000, 4096);
        let mut last = 1.0f32;
        for _ in 0..20 {
            let audio = rx.process(&frame);
            last = *audio.last().unwrap();
        }
        assert!(last.abs() < 0.05, "residual {last}");
    }

    #[test]
    fn retune_keeps_the_receiver_in_band() {
        let mut rx = VirtualReceiver::new(
            spec(446_062_500, 12_500, DemodMode::Nfm),
            446_050_000,
            2_048_000,
            75.0,
        )
        .unwrap();
        rx.retune(446_000_000, 446_050_000, 2_048_000).unwrap();
        assert_eq!(rx.spec.center_freq_hz, 446_000_000);
        let err = rx.retune(450_000_000, 446_050_000, 2_048_000).unwrap_err();
        assert!(matches!(err, ControlError::ReceiverOutOfBand));
        assert_eq!(rx.spec.center_freq_hz, 446_000_000);
    }
}
