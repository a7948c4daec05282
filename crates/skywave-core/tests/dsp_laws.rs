use proptest::prelude::*;
use rustfft::{num_complex::Complex64, FftPlanner};
use skywave_core::dsp::{
    fft::{fft_inplace, fft_shift, ifft_inplace},
    fir::design_lowpass_fir,
    nco::Nco,
};

fn l2_error(a_re: &[f64], a_im: &[f64], b_re: &[f64], b_im: &[f64]) -> f64 {
    a_re.iter()
        .zip(a_im)
        .zip(b_re.iter().zip(b_im))
        .map(|((ar, ai), (br, bi))| {
            let dr = ar - br;
            let di = ai - bi;
            (dr * dr + di * di).sqrt()
        })
        .fold(0.0f64, f64::max)
}

proptest! {
    #[test]
    fn fft_round_trips(
        exp in 3u32..12,
        seed in proptest::collection::vec(-1.0f64..1.0, 4096),
    ) {
        let n = 1usize << exp;
        let orig_re: Vec<f64> = seed[..n].to_vec();
        let orig_im: Vec<f64> = seed[n..2 * n].to_vec();

        let mut re = orig_re.clone();
        let mut im = orig_im.clone();
        fft_inplace(&mut re, &mut im).unwrap();
        ifft_inplace(&mut re, &mut im).unwrap();

        prop_assert!(l2_error(&re, &im, &orig_re, &orig_im) < 1e-6);
    }

    #[test]
    fn fft_shift_is_an_involution(
        exp in 1u32..12,
        seed in proptest::collection::vec(-100.0f32..100.0, 4096),
    ) {
        let n = 1usize << exp;
        let orig: Vec<f32> = seed[..n].to_vec();
        let mut buf = orig.clone();
        fft_shift(&mut buf);
        fft_shift(&mut buf);
        prop_assert_eq!(buf, orig);
    }

    #[test]
    fn fir_dc_gain_is_unity(taps_half in 1usize..200, cutoff in 0.001f64..0.5) {
        let taps = design_lowpass_fir(2 * taps_half + 1, cutoff).unwrap();
        let sum: f64 = taps.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn nco_magnitude_is_unity(freq in -500_000.0f64..500_000.0, steps in 1usize..5000) {
        let mut nco = Nco::new(freq, 2_048_000.0);
        for _ in 0..steps {
            let (c, s) = nco.next();
            prop_assert!((c * c + s * s - 1.0).abs() < 1e-9);
        }
    }
}

#[test]
fn forward_transform_matches_rustfft() {
    let n = 2048usize;
    let mut re = vec![0.0f64; n];
    let mut im = vec![0.0f64; n];
    let mut reference: Vec<Complex64> = Vec::with_capacity(n);
    for t in 0..n {
        let x = (t as f64 * 0.37).sin() + 0.25 * (t as f64 * 1.93).cos();
        let y = (t as f64 * 0.11).cos();
        re[t] = x;
        im[t] = y;
        reference.push(Complex64::new(x, y));
    }

    fft_inplace(&mut re, &mut im).unwrap();
    FftPlanner::new().plan_fft_forward(n).process(&mut reference);

    for k in 0..n {
        assert!(
            (re[k] - reference[k].re).abs() < 1e-6,
            "bin {k} re {} vs {}",
            re[k],
            reference[k].re
        );
        assert!((im[k] - reference[k].im).abs() < 1e-6);
    }
}
