use std::sync::Arc;
use std::time::Duration;
use ndarray::{s, Array2};
use crate::error::EngineError;
use crate::events::CancelToken;
use crate::session::spectrum::PowerTrail;
use crate::session::Session;
use crate::types::{CalibrationBounds, CalibrationTarget, ConnectionState, EngineEvent, PowerSample};
/// Captured baselines and the bounds derived from them.
#[derive(Clone, Debug, Default)]
pub struct Calibration {
    low_baseline: Option<Arc<Array2<f32>>>,
    high_baseline: Option<Arc<Array2<f32>>>,
    bounds: CalibrationBounds,
}
impl Calibration {
    pub fn bounds(&self) -> CalibrationBounds {
        self.bounds
    }
    pub fn low_baseline(&self) -> Option<&Array2<f32>> {
        self.low_baseline.as_deref()
    }
    pub fn high_baseline(&self) -> Option<&Array2<f32>> {
        self.high_baseline.as_deref()
    }
    fn assign(&mut self, target: CalibrationTarget, baseline: Array2<f32>) {
        let baseline = Arc::new(baseline);
        if target.low {
            self.low_baseline = Some(Arc::clone(&baseline));
        }
        if target.high {
            self.high_baseline = Some(baseline);
        }
    }
    /// Forgets baselines recorded with a different channel layout.
    pub(crate) fn retain_matching(&mut self, channel_count: usize) {
        for slot in [&mut self.low_baseline, &mut self.high_baseline] {
            if slot.as_ref().is_some_and(|b| b.ncols() != channel_count) {
                log::warn!("dropping baseline recorded with another channel count");
                *slot = None;
            }
        }
    }
}
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationOutcome {
    Completed(CalibrationBounds),
    Cancelled,
}
impl Session {
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }
    /// Checks that a calibration run for `target` could produce values.
    pub fn check_calibration(&self, target: CalibrationTarget) -> Result<(), EngineError> {
        if !target.low && !target.high {
            return Err(EngineError::InvalidArgument(
                "calibration needs the low band, the high band or both".into(),
            ));
        }
        if self.state != ConnectionState::Connected || self.header.is_none() {
            return Err(EngineError::NotConnected);
        }
        if self.channels.is_empty() {
            return Err(EngineError::InvalidArgument(
                "calibration needs at least one active channel".into(),
            ));
        }
        Ok(())
    }
    /// Records `seconds` worth of values as the baseline for `target`.
    ///
    /// Progress is published as a percentage after every value. A cancelled
    /// run leaves earlier baselines and bounds untouched.
    pub fn calibrate(
        &mut self,
        target: CalibrationTarget,
        seconds: u64,
        poll_interval: Duration,
        cancel: &CancelToken,
    ) -> Result<CalibrationOutcome, EngineError> {
        self.check_calibration(target)?;
        self.sync_cursor()?;
        let header = self.header.ok_or(EngineError::NotConnected)?;
        let wanted = self.values_per_second() * seconds as usize;
        if wanted == 0 {
            return Err(EngineError::InvalidArgument(format!(
                "{seconds} s at {} Hz yields no values",
                header.sample_rate
            )));
        }
        log::info!("calibrating {target:?}: {wanted} values");
        let capture_start = self.raw.nrows();
        let mut trail = PowerTrail::default();
        let mut produced = 0;
        while produced < wanted {
            if cancel.is_cancelled() {
                log::info!("calibration cancelled at {produced}/{wanted}");
                return Ok(CalibrationOutcome::Cancelled);
            }
            let block = self.next_block()?;
            if self.header != Some(header) {
                return Err(EngineError::HeaderChanged);
            }
            let Some(block) = block else {
                if !cancel.sleep(poll_interval) {
                    log::info!("calibration cancelled at {produced}/{wanted}");
                    return Ok(CalibrationOutcome::Cancelled);
                }
                continue;
            };
            if self.score(block.view(), &mut trail).is_some() {
                produced += 1;
                let percent = (produced * 100 / wanted) as u8;
                self.events.publish(EngineEvent::CalibrationProgress(percent));
            }
        }
        // 截取本次采集的原始数据作为基线
        let baseline = self.raw.slice(s![capture_start.., ..]).to_owned();
        self.raw = self.raw.slice(s![..capture_start, ..]).to_owned();
        self.calibration.assign(target, baseline);
        self.recalibrate();
        let bounds = self.bounds();
        log::info!("calibration finished: {bounds:?}");
        self.events.publish(EngineEvent::CalibrationFinished(bounds));
        Ok(CalibrationOutcome::Completed(bounds))
    }
    /// Recomputes the bounds from the stored baselines with the current
    /// parameters and channel set.
    pub fn recalibrate(&mut self) {
        let mut bounds = self.calibration.bounds;
        if let Some(baseline) = self.calibration.low_baseline.clone() {
            if let Some((min, max)) = self.replay(&baseline, |s| s.avg_low) {
                bounds.low_min = min;
                bounds.low_max = max;
            }
        }
        if let Some(baseline) = self.calibration.high_baseline.clone() {
            if let Some((min, max)) = self.replay(&baseline, |s| s.avg_high) {
                bounds.high_min = min;
                bounds.high_max = max;
            }
        }
        if bounds != self.calibration.bounds {
            log::debug!("bounds: {bounds:?}");
            self.calibration.bounds = bounds;
            self.events.publish(EngineEvent::BoundsChanged(bounds));
        }
    }
    /// Scores every full block of `baseline` on a private trail and returns
    /// the range of the picked value.
    fn replay(
        &mut self,
        baseline: &Array2<f32>,
        pick: impl Fn(&PowerSample) -> f64,
    ) -> Option<(f64, f64)> {
        let sample_rate = self.header?.sample_rate;
        let block_size = self.params.block_size();
        let step = self.params.step();
        if baseline.nrows() < block_size {
            return None;
        }
        let mut trail = PowerTrail::default();
        let mut range: Option<(f64, f64)> = None;
        for start in (0..=baseline.nrows() - block_size).step_by(step) {
            let block = baseline.slice(s![start..start + block_size, ..]);
            let Some(sample) = self.estimator.score_block(
                block,
                &self.channels,
                sample_rate,
                &self.params,
                &mut trail,
            ) else {
                continue;
            };
            let value = pick(&sample);
            range = Some(match range {
                Some((min, max)) => (min.min(value), max.max(value)),
                None => (value, value),
            });
        }
        range
    }
}
