use crate::error::DspError;
use std::f64::consts::PI;

/// In-place iterative Cooley-Tukey radix-2 decimation-in-time FFT.
///
/// `re` and `im` must have the same power-of-two length. The output is in
/// natural bin order (not FFT-shifted). No allocation; safe to call from
/// per-frame hot paths with caller-owned scratch buffers.
pub fn fft_inplace(re: &mut [f64], im: &mut [f64]) -> Result<(), DspError> {
    let n = re.len();
    if n == 0 || n != im.len() || !n.is_power_of_two() {
        return Err(DspError::InvalidFftSize(n));
    }
    if n == 1 {
        return Ok(());
    }

    bit_reverse_permute(re, im);

    let mut len = 2usize;
    while len <= n {
        let ang = -2.0 * PI / (len as f64);
        let (step_im, step_re) = ang.sin_cos();
        let mut start = 0usize;
        while start < n {
            let mut w_re = 1.0f64;
            let mut w_im = 0.0f64;
            for k in 0..len / 2 {
                let a = start + k;
                let b = a + len / 2;
                let t_re = re[b] * w_re - im[b] * w_im;
                let t_im = re[b] * w_im + im[b] * w_re;
                re[b] = re[a] - t_re;
                im[b] = im[a] - t_im;
                re[a] += t_re;
                im[a] += t_im;
                let next_re = w_re * step_re - w_im * step_im;
                w_im = w_re * step_im + w_im * step_re;
                w_re = next_re;
            }
            start += len;
        }
        len <<= 1;
    }
    Ok(())
}

/// Inverse transform via conjugation, scaled by 1/N.
pub fn ifft_inplace(re: &mut [f64], im: &mut [f64]) -> Result<(), DspError> {
    for v in im.iter_mut() {
        *v = -*v;
    }
    fft_inplace(re, im)?;
    let scale = 1.0 / (re.len() as f64);
    for v in re.iter_mut() {
        *v *= scale;
    }
    for v in im.iter_mut() {
        *v = -*v * scale;
    }
    Ok(())
}

/// Swaps spectrum halves so bin 0 lands at the center. Involutive for the
/// even lengths used everywhere in this crate.
pub fn fft_shift<T: Copy>(buf: &mut [T]) {
    let half = buf.len() / 2;
    buf.rotate_left(half);
}

/// Magnitude to dB with a floor that keeps log10 well-defined on silence.
pub fn power_db(magnitude: f32) -> f32 {
    20.0 * magnitude.max(1e-10).log10()
}

fn bit_reverse_permute(re: &mut [f64], im: &mut [f64]) {
    let n = re.len();
    let shift = 32 - n.trailing_zeros();
    for i in 0..n {
        let j = ((i as u32).reverse_bits() >> shift) as usize;
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_power_of_two() {
        let mut re = [0.0f64; 3];
        let mut im = [0.0f64; 3];
        assert!(matches!(
            fft_inplace(&mut re, &mut im),
            Err(DspError::InvalidFftSize(3))
        ));
    }

    #[test]
    fn dc_input_concentrates_in_bin_zero() {
        let mut re = [1.0f64; 8];
        let mut im = [0.0f64; 8];
        fft_inplace(&mut re, &mut im).unwrap();
        assert!((re[0] - 8.0).abs() < 1e-12);
        for k in 1..8 {
            assert!(re[k].abs() < 1e-12 && im[k].abs() < 1e-12);
        }
    }

    #[test]
    fn single_tone_lands_in_its_bin() {
        let n = 64usize;
        let bin = 5usize;
        let mut re = vec![0.0f64; n];
        let mut im = vec![0.0f64; n];
        for t in 0..n {
            let ph = 2.0 * PI * (bin as f64) * (t as f64) / (n as f64);
            re[t] = ph.cos();
            im[t] = ph.sin();
        }
        fft_inplace(&mut re, &mut im).unwrap();
        let mags: Vec<f64> = re
            .iter()
            .zip(im.iter())
            .map(|(r, i)| (r * r + i * i).sqrt())
            .collect();
        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(peak, bin);
        assert!((mags[bin] - n as f64).abs() < 1e-9);
    }

    #[test]
    fn power_db_floors_silence() {
        assert!((power_db(0.0) + 200.0).abs() < 1e-3);
        assert!(power_db(1.0).abs() < 1e-6);
    }
}
