use std::f64::consts::PI;
use ndarray::{ArrayView1, ArrayView2};
use rustfft::{num_complex::Complex64, FftPlanner};
use crate::session::channels::ChannelSet;
use crate::session::params::BlockParameters;
use crate::types::PowerSample;
/// Closed frequency interval in Hz.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    pub low_hz: f64,
    pub high_hz: f64,
}
/// Alpha range.
pub const LOW_BAND: Band = Band {
    low_hz: 8.0,
    high_hz: 13.0,
};
/// Beta range.
pub const HIGH_BAND: Band = Band {
    low_hz: 14.0,
    high_hz: 27.0,
};
/// One-sided power spectral density of a single channel.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    pub frequencies_hz: Vec<f64>,
    pub density: Vec<f64>,
    /// Bin spacing `fs / n`, also the Simpson step. It is 1 Hz only when the
    /// block spans exactly one second; a fractional rate gives a block of
    /// `round(fs)` samples and a spacing slightly off 1 Hz.
    pub resolution_hz: f64,
}
impl PowerSpectrum {
    /// Integrates the density over `band` with Simpson's rule.
    pub fn band_power(&self, band: Band) -> f64 {
        let in_band: Vec<f64> = self
            .frequencies_hz
            .iter()
            .zip(&self.density)
            .filter(|(f, _)| **f >= band.low_hz && **f <= band.high_hz)
            .map(|(_, p)| *p)
            .collect();
        simpson(&in_band, self.resolution_hz)
    }
}
/// Raw band powers of a run, kept for the moving average.
#[derive(Clone, Debug, Default)]
pub struct PowerTrail {
    low: Vec<f64>,
    high: Vec<f64>,
}
impl PowerTrail {
    pub fn len(&self) -> usize {
        self.low.len()
    }
    pub fn is_empty(&self) -> bool {
        self.low.is_empty()
    }
    pub fn clear(&mut self) {
        self.low.clear();
        self.high.clear();
    }
    fn push(&mut self, low: f64, high: f64) {
        self.low.push(low);
        self.high.push(high);
    }
    /// Mean of the last `window` values of each band.
    fn average(&self, window: usize) -> (f64, f64) {
        (tail_mean(&self.low, window), tail_mean(&self.high, window))
    }
}
fn tail_mean(values: &[f64], window: usize) -> f64 {
    let tail = &values[values.len().saturating_sub(window.max(1))..];
    if tail.is_empty() {
        return 0.0;
    }
    tail.iter().sum::<f64>() / tail.len() as f64
}
/// Band-power estimator; keeps FFT plans across blocks.
pub struct BandPowerEngine {
    planner: FftPlanner<f64>,
}
impl Default for BandPowerEngine {
    fn default() -> Self {
        Self::new()
    }
}
impl BandPowerEngine {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }
    /// Welch estimate with a single Hann segment spanning the whole signal,
    /// constant detrending and density scaling.
    pub fn spectrum(&mut self, signal: ArrayView1<f32>, sample_rate: f64) -> PowerSpectrum {
        let n = signal.len();
        let resolution_hz = if n == 0 { 0.0 } else { sample_rate / n as f64 };
        if n == 0 {
            return PowerSpectrum {
                frequencies_hz: Vec::new(),
                density: Vec::new(),
                resolution_hz,
            };
        }
        let mean = signal.iter().map(|v| f64::from(*v)).sum::<f64>() / n as f64;
        // periodic Hann window
        let window: Vec<f64> = (0..n)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
            .collect();
        let window_energy: f64 = window.iter().map(|w| w * w).sum();
        let mut buffer: Vec<Complex64> = signal
            .iter()
            .zip(&window)
            .map(|(v, w)| Complex64::new((f64::from(*v) - mean) * w, 0.0))
            .collect();
        self.planner.plan_fft_forward(n).process(&mut buffer);
        let bins = n / 2 + 1;
        let scale = if window_energy > 0.0 {
            1.0 / (sample_rate * window_energy)
        } else {
            0.0
        };
        let mut density: Vec<f64> = buffer
            .iter()
            .take(bins)
            .map(|c| c.norm_sqr() * scale)
            .collect();
        // fold negative frequencies; DC and (for even n) Nyquist appear once
        let folded_end = if n % 2 == 0 { bins - 1 } else { bins };
        for p in density.iter_mut().take(folded_end).skip(1) {
            *p *= 2.0;
        }
        let frequencies_hz = (0..bins).map(|k| k as f64 * resolution_hz).collect();
        PowerSpectrum {
            frequencies_hz,
            density,
            resolution_hz,
        }
    }
    /// Mean band power over the active channels, `None` if there are none.
    pub fn band_power(
        &mut self,
        block: ArrayView2<f32>,
        channels: &ChannelSet,
        sample_rate: f64,
        band: Band,
    ) -> Option<f64> {
        let powers: Vec<f64> = channels
            .iter()
            .filter(|ch| *ch < block.ncols())
            .map(|ch| self.spectrum(block.column(ch), sample_rate).band_power(band))
            .collect();
        if powers.is_empty() {
            return None;
        }
        Some(powers.iter().sum::<f64>() / powers.len() as f64)
    }
    /// Scores one block into a [`PowerSample`], appending the raw powers to
    /// `trail`. `None` while the block is short or no channel is active.
    pub fn score_block(
        &mut self,
        block: ArrayView2<f32>,
        channels: &ChannelSet,
        sample_rate: f64,
        params: &BlockParameters,
        trail: &mut PowerTrail,
    ) -> Option<PowerSample> {
        if channels.is_empty() || block.nrows() < params.block_size() {
            return None;
        }
        let raw_low = self.band_power(block, channels, sample_rate, LOW_BAND)?;
        let raw_high = self.band_power(block, channels, sample_rate, HIGH_BAND)?;
        trail.push(raw_low, raw_high);
        let (avg_low, avg_high) = trail.average(params.average_window());
        Some(PowerSample {
            raw_low,
            raw_high,
            avg_low,
            avg_high,
        })
    }
}
/// Composite Simpson integration of equally spaced samples.
///
/// With an even number of points the last interval uses Cartwright's
/// correction, two points fall back to the trapezoid rule.
pub fn simpson(y: &[f64], dx: f64) -> f64 {
    let n = y.len();
    match n {
        0 | 1 => 0.0,
        2 => 0.5 * dx * (y[0] + y[1]),
        _ if n % 2 == 1 => simpson_odd(y, dx),
        _ => {
            let head = simpson_odd(&y[..n - 1], dx);
            let tail = dx * (5.0 * y[n - 1] + 8.0 * y[n - 2] - y[n - 3]) / 12.0;
            head + tail
        }
    }
}
fn simpson_odd(y: &[f64], dx: f64) -> f64 {
    let sum: f64 = y
        .windows(3)
        .step_by(2)
        .map(|w| w[0] + 4.0 * w[1] + w[2])
        .sum();
    sum * dx / 3.0
}
