use std::f64::consts::PI;

pub const BH_A0: f64 = 0.35875;
pub const BH_A1: f64 = 0.48829;
pub const BH_A2: f64 = 0.14128;
pub const BH_A3: f64 = 0.01168;

/// 4-term Blackman-Harris window, symmetric form (denominator N-1).
pub fn blackman_harris(size: usize) -> Vec<f64> {
    if size <= 1 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f64;
    let mut out = vec![0.0f64; size];
    for (n, v) in out.iter_mut().enumerate() {
        let x = 2.0 * PI * (n as f64) / denom;
        *v = BH_A0 - BH_A1 * x.cos() + BH_A2 * (2.0 * x).cos() - BH_A3 * (3.0 * x).cos();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_symmetric() {
        let w = blackman_harris(256);
        for i in 0..128 {
            assert!((w[i] - w[255 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn window_sum_matches_closed_form() {
        // Summing each cosine term over n = 0..N-1 leaves exactly the
        // n = N-1 sample of each, so sum(w) = A0*N - (A1 - A2 + A3).
        for n in [64usize, 512, 2048] {
            let w = blackman_harris(n);
            let sum: f64 = w.iter().sum();
            let expected = BH_A0 * (n as f64) - (BH_A1 - BH_A2 + BH_A3);
            assert!((sum - expected).abs() < 1e-9, "n={n} sum={sum}");
        }
    }

    #[test]
    fn window_mean_approaches_a0() {
        let n = 8192usize;
        let w = blackman_harris(n);
        let mean: f64 = w.iter().sum::<f64>() / (n as f64);
        assert!((mean - BH_A0).abs() < 1e-4);
    }
}
