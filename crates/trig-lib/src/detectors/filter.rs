use crate::error::{Result, TriggerError};
use realfft::num_complex::Complex;
use realfft::RealFftPlanner;

/// Zero-phase band-pass: keep spectral bins with `low <= f <= high`.
///
/// Bins are zeroed in the frequency domain, so the output has no group delay
/// and stays aligned with the input samples.
pub fn bandpass(data: &[f64], fs: f64, low: f64, high: f64) -> Result<Vec<f64>> {
    validate_band(fs, low, high)?;
    let n = data.len();
    if n < 2 {
        return Ok(data.to_vec());
    }

    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut buffer = data.to_vec();
    let mut spectrum = forward.make_output_vec();
    forward
        .process(&mut buffer, &mut spectrum)
        .map_err(|e| TriggerError::Filter(e.to_string()))?;

    let bin_hz = fs / n as f64;
    for (k, bin) in spectrum.iter_mut().enumerate() {
        let freq = k as f64 * bin_hz;
        if freq < low || freq > high {
            *bin = Complex::new(0.0, 0.0);
        }
    }
    // The inverse transform rejects non-real DC and Nyquist bins.
    spectrum[0].im = 0.0;
    if n % 2 == 0 {
        if let Some(last) = spectrum.last_mut() {
            last.im = 0.0;
        }
    }

    let mut out = inverse.make_output_vec();
    inverse
        .process(&mut spectrum, &mut out)
        .map_err(|e| TriggerError::Filter(e.to_string()))?;
    let scale = 1.0 / n as f64;
    out.iter_mut().for_each(|v| *v *= scale);
    Ok(out)
}

pub fn validate_band(fs: f64, low: f64, high: f64) -> Result<()> {
    if fs.is_nan() || fs <= 0.0 {
        return Err(TriggerError::config(format!(
            "sample rate must be positive, got {fs}"
        )));
    }
    if low.is_nan() || high.is_nan() || low < 0.0 || high <= low || high > fs * 0.5 {
        return Err(TriggerError::config(format!(
            "band [{low}, {high}] Hz must satisfy 0 <= low < high <= {}",
            fs * 0.5
        )));
    }
    Ok(())
}
